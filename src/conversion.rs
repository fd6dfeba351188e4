//! Source-format label conversions into the unified YOLO label set.

use anyhow::Context;
use log::{error, info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::class_map::{ClassLookup, ClassMap};
use crate::coco::{coco_to_yolo, Annotation, CocoFile, Image};
use crate::error::ConfigError;
use crate::io::{copy_images, list_files_with_extension, write_label_file, SplitDirs};
use crate::labels::{format_label_lines, parse_label_line, raw_lines, warn_malformed};
use crate::types::BoundingBox;
use crate::utils::{create_output_directory, create_progress_bar};
use crate::visdrone::parse_visdrone_line;

/// Converted body of one label file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LabelConversion {
    pub body: String,
    pub kept: usize,
    pub malformed: usize,
    pub unexpected: usize,
}

// Struct to hold conversion statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConversionStats {
    pub label_files: usize,
    pub labels_written: usize,
    pub lines_written: usize,
    pub images_copied: usize,
    pub malformed_lines: usize,
    pub unexpected_classes: usize,
    pub skipped_missing_image: usize,
}

impl ConversionStats {
    fn record(&mut self, conversion: &LabelConversion) {
        self.label_files += 1;
        self.malformed_lines += conversion.malformed;
        self.unexpected_classes += conversion.unexpected;
    }

    fn write(&mut self, path: &Path, conversion: &LabelConversion) -> std::io::Result<()> {
        // Files without surviving objects are not written.
        if conversion.kept == 0 {
            return Ok(());
        }
        write_label_file(path, &conversion.body)?;
        self.labels_written += 1;
        self.lines_written += conversion.kept;
        Ok(())
    }

    pub fn print_summary(&self) {
        log::info!("=== Conversion Summary ===");
        log::info!("Label files processed: {}", self.label_files);
        log::info!(
            "Label files written: {} ({} annotations)",
            self.labels_written,
            self.lines_written
        );
        log::info!("Images copied: {}", self.images_copied);
        let skipped = self.malformed_lines + self.unexpected_classes + self.skipped_missing_image;
        if skipped > 0 {
            log::warn!(
                "Skipped: {} (malformed lines: {}, unexpected class ids: {}, labels without image: {})",
                skipped,
                self.malformed_lines,
                self.unexpected_classes,
                self.skipped_missing_image
            );
        }
    }
}

fn conversion_from_boxes(boxes: &[BoundingBox], classes: &ClassMap, source: &str, malformed: usize) -> LabelConversion {
    let (kept, unexpected) = classes.apply(boxes, source);
    LabelConversion {
        body: format_label_lines(&kept),
        kept: kept.len(),
        malformed,
        unexpected,
    }
}

/// Rewrite the class id of every YOLO line, keeping the coordinate fields verbatim.
/// Lines that are not a valid five-field record are skipped as malformed.
pub fn remap_label_text(content: &[u8], classes: &ClassMap, source: &str) -> LabelConversion {
    let mut out = LabelConversion::default();
    for line in raw_lines(content) {
        let parsed = line
            .text()
            .and_then(|text| parse_label_line(text).map(|bbox| bbox.map(|b| (b.class_id, text))));
        let (source_id, text) = match parsed {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                warn_malformed(source, &line, &e);
                out.malformed += 1;
                continue;
            }
        };
        match classes.lookup(source_id) {
            ClassLookup::Mapped(target) => {
                out.body.push_str(&target.to_string());
                for field in text.split_whitespace().skip(1) {
                    out.body.push(' ');
                    out.body.push_str(field);
                }
                out.body.push('\n');
                out.kept += 1;
            }
            ClassLookup::Ignored => {}
            ClassLookup::Unexpected => {
                warn!(
                    "Unexpected class id {} in {}. Line skipped.",
                    source_id, source
                );
                out.unexpected += 1;
            }
        }
    }
    out
}

/// YOLO lines for the COCO annotations of one image.
pub fn coco_label_text(
    annotations: &[&Annotation],
    image: &Image,
    classes: &ClassMap,
    source: &str,
) -> LabelConversion {
    let boxes: Vec<BoundingBox> = annotations
        .iter()
        .map(|ann| {
            let [x, y, w, h] = ann.bbox;
            let (xc, yc, nw, nh) = coco_to_yolo(x, y, w, h, image.width, image.height);
            BoundingBox::new(ann.category_id, xc, yc, nw, nh)
        })
        .collect();
    conversion_from_boxes(&boxes, classes, source, 0)
}

/// YOLO lines for a VisDrone annotation file of an image of the given size.
pub fn visdrone_label_text(
    content: &[u8],
    image_width: u32,
    image_height: u32,
    classes: &ClassMap,
    source: &str,
) -> LabelConversion {
    let mut boxes = Vec::new();
    let mut malformed = 0;
    for line in raw_lines(content) {
        match line.text().and_then(parse_visdrone_line) {
            Ok(Some(rec)) if rec.score != 0 => {
                let (xc, yc, w, h) = coco_to_yolo(
                    rec.left as f64,
                    rec.top as f64,
                    rec.width as f64,
                    rec.height as f64,
                    image_width,
                    image_height,
                );
                boxes.push(BoundingBox::new(rec.category, xc, yc, w, h));
            }
            Ok(_) => {}
            Err(e) => {
                warn_malformed(source, &line, &e);
                malformed += 1;
            }
        }
    }
    conversion_from_boxes(&boxes, classes, source, malformed)
}

fn ensure_root(source_dir: &Path) -> Result<(), ConfigError> {
    if source_dir.is_dir() {
        Ok(())
    } else {
        Err(ConfigError::MissingRoot(source_dir.to_path_buf()))
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Remap class ids of YOLO label files split by split (HIT-UAV layout).
pub fn remap_dataset(
    source_dir: &Path,
    output_dir: &Path,
    classes: &ClassMap,
    splits: &[String],
) -> anyhow::Result<ConversionStats> {
    ensure_root(&source_dir.join("labels"))?;
    let mut stats = ConversionStats::default();

    for split in splits {
        info!("Processing split '{}'...", split);
        let src = SplitDirs::for_split(source_dir, split);
        let out = SplitDirs::for_split(output_dir, split);
        if !src.labels_dir.is_dir() {
            warn!("Directory {} does not exist. Split skipped.", src.labels_dir.display());
            continue;
        }
        fs::create_dir_all(&out.labels_dir)
            .with_context(|| format!("failed to create {}", out.labels_dir.display()))?;

        if src.images_dir.is_dir() {
            let copied = copy_images(&src.images_dir, &out.images_dir, false)
                .with_context(|| format!("failed to copy images of split '{}'", split))?;
            stats.images_copied += copied.len();
        } else {
            warn!("Image directory {} does not exist.", src.images_dir.display());
        }

        let label_files = list_files_with_extension(&src.labels_dir, "txt");
        if label_files.is_empty() {
            info!("No label files found in {}.", src.labels_dir.display());
            continue;
        }
        let pb = create_progress_bar(label_files.len() as u64, split);
        for label_path in &label_files {
            let name = file_label(label_path);
            match fs::read(label_path) {
                Ok(content) => {
                    let conversion = remap_label_text(&content, classes, &name);
                    stats.record(&conversion);
                    if let Err(e) = stats.write(&out.labels_dir.join(&name), &conversion) {
                        error!("Failed to write {}: {}", name, e);
                    }
                }
                Err(e) => error!("Failed to read {}: {}", label_path.display(), e),
            }
            pb.inc(1);
        }
        pb.finish_with_message(format!("{} done", split));
    }
    Ok(stats)
}

/// Convert per-split COCO files `labels/<split>/<split>.json` to YOLO (POP layout).
pub fn convert_coco_dataset(
    source_dir: &Path,
    output_dir: &Path,
    classes: &ClassMap,
    splits: &[String],
) -> anyhow::Result<ConversionStats> {
    ensure_root(source_dir)?;
    let mut stats = ConversionStats::default();

    for split in splits {
        info!("Processing split '{}'...", split);
        let src = SplitDirs::for_split(source_dir, split);
        let out = SplitDirs::for_split(output_dir, split);
        let json_path = src.labels_dir.join(format!("{}.json", split));

        fs::create_dir_all(&out.labels_dir)
            .with_context(|| format!("failed to create {}", out.labels_dir.display()))?;
        if !json_path.is_file() {
            warn!("COCO file {} not found. Split skipped.", json_path.display());
            continue;
        }
        if !src.images_dir.is_dir() {
            warn!("Image directory {} does not exist. Split skipped.", src.images_dir.display());
            continue;
        }

        create_output_directory(&out.images_dir)?;
        let copied = copy_images(&src.images_dir, &out.images_dir, true)
            .with_context(|| format!("failed to copy images of split '{}'", split))?;
        stats.images_copied += copied.len();

        let coco = match CocoFile::read(&json_path) {
            Ok(coco) => coco,
            Err(e) => {
                error!("{:#}. Split skipped.", e);
                continue;
            }
        };
        info!(
            "Converting {} images and {} annotations...",
            coco.images.len(),
            coco.annotations.len()
        );

        let images = coco.image_index();
        for (image_id, annotations) in coco.annotations_by_image() {
            let Some(image) = images.get(&image_id) else {
                warn!("Annotations reference unknown image id {}. Skipped.", image_id);
                continue;
            };
            let Some(stem) = Path::new(&image.file_name).file_stem().and_then(|s| s.to_str()) else {
                warn!("Invalid image file name '{}'. Skipped.", image.file_name);
                continue;
            };
            let conversion = coco_label_text(&annotations, image, classes, &image.file_name);
            stats.record(&conversion);
            let label_path = out.labels_dir.join(format!("{}.txt", stem));
            if let Err(e) = stats.write(&label_path, &conversion) {
                error!("Failed to write {}: {}", label_path.display(), e);
            }
        }
    }
    Ok(stats)
}

/// Convert VisDrone annotation files to YOLO, reading each image's size from its header.
pub fn convert_visdrone_dataset(
    source_dir: &Path,
    output_dir: &Path,
    classes: &ClassMap,
    splits: &[String],
) -> anyhow::Result<ConversionStats> {
    ensure_root(source_dir)?;
    let mut stats = ConversionStats::default();

    for split in splits {
        info!("Processing split '{}'...", split);
        let src = SplitDirs::for_split(source_dir, split);
        let out = SplitDirs::for_split(output_dir, split);
        if !src.labels_dir.is_dir() {
            warn!("Annotation directory {} not found. Split skipped.", src.labels_dir.display());
            continue;
        }
        if !src.images_dir.is_dir() {
            warn!("Image directory {} not found. Split skipped.", src.images_dir.display());
            continue;
        }
        fs::create_dir_all(&out.labels_dir)
            .with_context(|| format!("failed to create {}", out.labels_dir.display()))?;

        let copied = copy_images(&src.images_dir, &out.images_dir, false)
            .with_context(|| format!("failed to copy images of split '{}'", split))?;
        stats.images_copied += copied.len();
        let images_by_stem: HashMap<String, PathBuf> = copied
            .into_iter()
            .filter_map(|p| {
                let stem = p.file_stem()?.to_str()?.to_string();
                Some((stem, p))
            })
            .collect();

        let label_files = list_files_with_extension(&src.labels_dir, "txt");
        let pb = create_progress_bar(label_files.len() as u64, split);
        for label_path in &label_files {
            pb.inc(1);
            let name = file_label(label_path);
            let dims = label_path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|stem| images_by_stem.get(stem))
                .and_then(|image_path| image::image_dimensions(image_path).ok());
            let Some((width, height)) = dims else {
                warn!("No readable image for {}. Annotation file skipped.", name);
                stats.skipped_missing_image += 1;
                continue;
            };
            match fs::read(label_path) {
                Ok(content) => {
                    let conversion = visdrone_label_text(&content, width, height, classes, &name);
                    stats.record(&conversion);
                    if let Err(e) = stats.write(&out.labels_dir.join(&name), &conversion) {
                        error!("Failed to write {}: {}", name, e);
                    }
                }
                Err(e) => error!("Failed to read {}: {}", label_path.display(), e),
            }
        }
        pb.finish_with_message(format!("{} done", split));
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remap_keeps_coordinates_verbatim() {
        let text = b"1 0.5 0.5 0.1 0.1\n3 0.1 0.1 0.1 0.1\n9 0.2 0.2 0.1 0.1\nx 0 0 0 0\n\n2 0.25 0.3 0.05 0.07\n";
        let conv = remap_label_text(text, &ClassMap::hit_uav(), "a.txt");
        assert_eq!(conv.body, "2 0.5 0.5 0.1 0.1\n1 0.25 0.3 0.05 0.07\n");
        assert_eq!(conv.kept, 2);
        assert_eq!(conv.unexpected, 1);
        assert_eq!(conv.malformed, 1);
    }

    #[test]
    fn remap_skips_short_records_and_bad_bytes() {
        let conv = remap_label_text(b"1\n0 0.5 0.5\n2 0.1 \xfe 0.1 0.1\n", &ClassMap::hit_uav(), "b.txt");
        assert_eq!(conv.body, "");
        assert_eq!(conv.kept, 0);
        assert_eq!(conv.malformed, 3);
    }

    #[test]
    fn visdrone_keeps_records_around_a_bad_line() {
        let text = b"100,50,20,10,1,4,0,0\n\xff\xff\n1,2,3\n";
        let conv = visdrone_label_text(text, 200, 100, &ClassMap::visdrone(), "v.txt");
        assert_eq!(conv.kept, 1);
        assert_eq!(conv.malformed, 2);
    }

    #[test]
    fn visdrone_drops_zero_score_and_ignored_categories() {
        let text = b"100,50,20,10,1,4,0,0\n0,0,10,10,0,1,0,0\n5,5,10,10,1,0,0,0\n5,5,10,10,1,11,0,0\n";
        let conv = visdrone_label_text(text, 200, 100, &ClassMap::visdrone(), "v.txt");
        assert_eq!(conv.body, "2 0.550000 0.550000 0.100000 0.100000\n");
        assert_eq!(conv.kept, 1);
        assert_eq!(conv.unexpected, 0);
    }

    #[test]
    fn coco_maps_person_category() {
        let image = Image {
            id: 7,
            file_name: "IMG_1.JPG".to_string(),
            width: 400,
            height: 200,
        };
        let ann = Annotation {
            id: 1,
            image_id: 7,
            category_id: 1,
            bbox: [100.0, 50.0, 40.0, 20.0],
        };
        let conv = coco_label_text(&[&ann], &image, &ClassMap::pop(), "IMG_1.JPG");
        assert_eq!(conv.body, "0 0.300000 0.300000 0.100000 0.100000\n");
    }
}
