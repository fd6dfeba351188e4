use glob::{glob, Pattern};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::types::has_image_extension;
use crate::utils::create_output_directory;

/// Paired image and label directories of one split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitDirs {
    pub images_dir: PathBuf,
    pub labels_dir: PathBuf,
}

impl SplitDirs {
    /// `<root>/images/<split>` and `<root>/labels/<split>`.
    pub fn for_split(root: &Path, split: &str) -> Self {
        Self {
            images_dir: root.join("images").join(split),
            labels_dir: root.join("labels").join(split),
        }
    }

    /// `<root>/images` and `<root>/labels`.
    pub fn flat(root: &Path) -> Self {
        Self {
            images_dir: root.join("images"),
            labels_dir: root.join("labels"),
        }
    }
}

/// Set up (fresh) output directories for one split
pub fn setup_split_directories(root: &Path, split: &str) -> std::io::Result<SplitDirs> {
    let dirs = SplitDirs::for_split(root, split);
    create_output_directory(&dirs.images_dir)?;
    create_output_directory(&dirs.labels_dir)?;
    Ok(dirs)
}

/// Set up (fresh) unsplit output directories
pub fn setup_flat_directories(root: &Path) -> std::io::Result<SplitDirs> {
    let dirs = SplitDirs::flat(root);
    create_output_directory(&dirs.images_dir)?;
    create_output_directory(&dirs.labels_dir)?;
    Ok(dirs)
}

/// Entries directly inside `dir` matching a predicate, sorted by path.
fn list_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
    let pattern = format!("{}/*", Pattern::escape(&dir.to_string_lossy()));
    let mut files: Vec<PathBuf> = match glob(&pattern) {
        Ok(paths) => paths
            .filter_map(|entry| entry.ok())
            .filter(|path| keep(path))
            .collect(),
        Err(e) => {
            log::error!("Invalid glob pattern {}: {}", pattern, e);
            Vec::new()
        }
    };
    files.sort();
    files
}

/// Image files directly inside `dir`.
pub fn list_images(dir: &Path) -> Vec<PathBuf> {
    list_entries(dir, |path| path.is_file() && has_image_extension(path))
}

pub fn list_subdirectories(dir: &Path) -> Vec<PathBuf> {
    list_entries(dir, Path::is_dir)
}

/// Files directly inside `dir` with the given extension (case-insensitive).
pub fn list_files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
    list_entries(dir, |path| {
        path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
    })
}

/// Copy every image of `src_dir` into `dst_dir`, optionally lowercasing extensions.
/// Returns the destination paths in source order.
pub fn copy_images(src_dir: &Path, dst_dir: &Path, lowercase_ext: bool) -> std::io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dst_dir)?;
    let mut copied = Vec::new();
    for src in list_images(src_dir) {
        let Some(file_name) = src.file_name() else {
            continue;
        };
        let mut dest = dst_dir.join(file_name);
        if lowercase_ext {
            if let Some(ext) = src.extension().and_then(|e| e.to_str()) {
                dest.set_extension(ext.to_lowercase());
            }
        }
        fs::copy(&src, &dest)?;
        copied.push(dest);
    }
    Ok(copied)
}

/// Write a label file body as-is (empty body gives an empty file).
pub fn write_label_file(path: &Path, body: &str) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(body.as_bytes())?;
    writer.flush()
}

/// Label files in `labels_dir` whose stem has no image among `image_stems`.
pub fn find_orphan_labels(labels_dir: &Path, image_stems: &HashSet<String>) -> Vec<PathBuf> {
    list_files_with_extension(labels_dir, "txt")
        .into_iter()
        .filter(|path| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| !image_stems.contains(stem))
        })
        .collect()
}
