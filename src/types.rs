use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

// Supported image formats
pub const IMG_FORMATS: &[&str] = &["bmp", "jpeg", "jpg", "png", "tif", "tiff", "webp"];

// Precomputed HashSet of image extensions for fast lookup
pub static IMAGE_EXTENSIONS_SET: OnceLock<HashSet<String>> = OnceLock::new();

/// Get the image extensions set
pub fn get_image_extensions_set() -> &'static HashSet<String> {
    IMAGE_EXTENSIONS_SET.get_or_init(|| IMG_FORMATS.iter().map(|ext| ext.to_lowercase()).collect())
}

/// True if the path carries one of the supported image extensions (any case).
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| get_image_extensions_set().contains(&ext.to_lowercase()))
}

/// Object box in normalized center-size form, relative to the image it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub class_id: u32,
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(class_id: u32, x_center: f64, y_center: f64, width: f64, height: f64) -> Self {
        Self {
            class_id,
            x_center,
            y_center,
            width,
            height,
        }
    }

    /// Convert to absolute corner coordinates for an image of the given size.
    pub fn to_pixel(&self, image_width: u32, image_height: u32) -> PixelBox {
        let abs_w = self.width * image_width as f64;
        let abs_h = self.height * image_height as f64;
        let x_min = self.x_center * image_width as f64 - abs_w / 2.0;
        let y_min = self.y_center * image_height as f64 - abs_h / 2.0;
        PixelBox {
            class_id: self.class_id,
            x_min,
            y_min,
            x_max: x_min + abs_w,
            y_max: y_min + abs_h,
        }
    }

    /// Render as a YOLO label line (no trailing newline).
    pub fn to_label_line(&self) -> String {
        format!(
            "{} {:.6} {:.6} {:.6} {:.6}",
            self.class_id, self.x_center, self.y_center, self.width, self.height
        )
    }
}

/// Object box in absolute pixel corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox {
    pub class_id: u32,
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl PixelBox {
    pub fn area(&self) -> f64 {
        (self.x_max - self.x_min) * (self.y_max - self.y_min)
    }
}

/// A tile window in source-image pixels. `x_max`/`y_max` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileSpec {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl TileSpec {
    /// Clamped width, possibly smaller than the nominal tile width.
    pub fn width(&self) -> u32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> u32 {
        self.y_max - self.y_min
    }
}

/// A tile and the boxes that survived projection into it.
#[derive(Debug, Clone, PartialEq)]
pub struct TileResult {
    pub tile: TileSpec,
    pub boxes: Vec<BoundingBox>,
}

impl TileResult {
    pub fn is_background(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Label file body, one `\n`-terminated line per box.
    pub fn label_text(&self) -> String {
        crate::labels::format_label_lines(&self.boxes)
    }
}

// Struct to hold processing statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessingStats {
    pub images_processed: usize,
    pub tiles_written: usize,
    pub positive_tiles: usize,
    pub background_tiles: usize,
    pub malformed_lines: usize,
    pub unexpected_classes: usize,
    pub orphan_labels: usize,
    pub failed_images: usize,
    pub metadata_rows: usize,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine counters from two independent workers.
    pub fn merge(mut self, other: ProcessingStats) -> ProcessingStats {
        self.images_processed += other.images_processed;
        self.tiles_written += other.tiles_written;
        self.positive_tiles += other.positive_tiles;
        self.background_tiles += other.background_tiles;
        self.malformed_lines += other.malformed_lines;
        self.unexpected_classes += other.unexpected_classes;
        self.orphan_labels += other.orphan_labels;
        self.failed_images += other.failed_images;
        self.metadata_rows += other.metadata_rows;
        self
    }

    pub fn record_tile(&mut self, result: &TileResult) {
        self.tiles_written += 1;
        if result.is_background() {
            self.background_tiles += 1;
        } else {
            self.positive_tiles += 1;
        }
    }

    pub fn print_summary(&self) {
        log::info!("=== Processing Summary ===");
        log::info!("Source images processed: {}", self.images_processed);
        log::info!(
            "Tiles written: {} (positive: {}, background: {})",
            self.tiles_written,
            self.positive_tiles,
            self.background_tiles
        );
        log::info!("Failed images: {}", self.failed_images);
        if self.metadata_rows > 0 {
            log::info!("Metadata rows: {}", self.metadata_rows);
        }

        let skipped = self.malformed_lines + self.unexpected_classes + self.orphan_labels;
        if skipped > 0 {
            log::warn!(
                "Skipped records: {} (malformed lines: {}, unexpected class ids: {}, labels without image: {})",
                skipped,
                self.malformed_lines,
                self.unexpected_classes,
                self.orphan_labels
            );
        }
    }
}
