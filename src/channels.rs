//! In-place normalization of dataset images to 3-channel RGB.

use image::ColorType;
use jwalk::WalkDir;
use log::{info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::utils::{create_io_thread_pool, create_progress_bar};

const RGB_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    Converted,
    AlreadyRgb,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub converted: usize,
    pub already_rgb: usize,
    pub failed: usize,
}

impl ChannelStats {
    fn merge(self, other: ChannelStats) -> ChannelStats {
        ChannelStats {
            converted: self.converted + other.converted,
            already_rgb: self.already_rgb + other.already_rgb,
            failed: self.failed + other.failed,
        }
    }

    pub fn print_summary(&self, root: &Path) {
        info!(
            "{}: converted {}, already RGB {}, failed {}",
            root.display(),
            self.converted,
            self.already_rgb,
            self.failed
        );
    }
}

/// Rewrite the image as 8-bit RGB unless it already is.
pub fn normalize_image_channels(path: &Path) -> anyhow::Result<ChannelOutcome> {
    let img = image::open(path)?;
    if img.color() == ColorType::Rgb8 {
        return Ok(ChannelOutcome::AlreadyRgb);
    }
    img.to_rgb8().save(path)?;
    Ok(ChannelOutcome::Converted)
}

fn is_convertible(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| RGB_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// Every jpg/jpeg/png below `dir`, sorted.
pub fn collect_images_recursive(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path())
        .filter(|path| is_convertible(path))
        .collect();
    paths.sort();
    paths
}

/// Convert every image under `<root>/images` to RGB in place.
pub fn convert_dataset_to_rgb(root: &Path, workers: usize) -> anyhow::Result<ChannelStats> {
    let images_dir = root.join("images");
    if !images_dir.is_dir() {
        return Err(ConfigError::MissingRoot(images_dir).into());
    }

    let paths = collect_images_recursive(&images_dir);
    info!("Checking {} images under {}", paths.len(), images_dir.display());
    let pb = create_progress_bar(paths.len() as u64, "to-rgb");
    let pool = create_io_thread_pool(workers)?;

    let stats = pool.install(|| {
        paths
            .par_iter()
            .map(|path| {
                let outcome = normalize_image_channels(path);
                pb.inc(1);
                match outcome {
                    Ok(ChannelOutcome::Converted) => ChannelStats {
                        converted: 1,
                        ..Default::default()
                    },
                    Ok(ChannelOutcome::AlreadyRgb) => ChannelStats {
                        already_rgb: 1,
                        ..Default::default()
                    },
                    Err(e) => {
                        warn!("Failed to convert {}: {:#}", path.display(), e);
                        ChannelStats {
                            failed: 1,
                            ..Default::default()
                        }
                    }
                }
            })
            .reduce(ChannelStats::default, ChannelStats::merge)
    });
    pb.finish_with_message("done");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage};

    #[test]
    fn converts_grayscale_and_skips_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images").join("train");
        std::fs::create_dir_all(&images).unwrap();
        GrayImage::new(8, 8).save(images.join("gray.png")).unwrap();
        RgbImage::new(8, 8).save(images.join("rgb.png")).unwrap();
        std::fs::write(images.join("notes.txt"), "x").unwrap();

        let stats = convert_dataset_to_rgb(dir.path(), 2).unwrap();
        assert_eq!(stats.converted, 1);
        assert_eq!(stats.already_rgb, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(image::open(images.join("gray.png")).unwrap().color(), ColorType::Rgb8);
    }

    #[test]
    fn missing_images_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(convert_dataset_to_rgb(dir.path(), 1).is_err());
    }
}
