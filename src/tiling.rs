//! Overlapping tile grid and projection of boxes into tile-local coordinates.

use crate::class_map::ClassMap;
use crate::error::ConfigError;
use crate::types::{BoundingBox, PixelBox, TileResult, TileSpec};

/// Edge tiles narrower or shorter than this share of the nominal size are dropped.
pub const MIN_EDGE_FRACTION: f64 = 0.5;

/// Geometry and retention parameters for one tiling pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilingConfig {
    pub tile_width: u32,
    pub tile_height: u32,
    pub overlap_ratio: f64,
    /// Minimum visible share of a box (exclusive) for it to be kept in a tile.
    pub iou_threshold: f64,
}

impl TilingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(ConfigError::InvalidTileSize {
                width: self.tile_width,
                height: self.tile_height,
            });
        }
        if !(0.0..1.0).contains(&self.overlap_ratio) {
            return Err(ConfigError::InvalidOverlap(self.overlap_ratio));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(ConfigError::InvalidThreshold(self.iou_threshold));
        }
        Ok(())
    }
}

fn stride(tile_dim: u32, overlap_ratio: f64) -> u32 {
    ((tile_dim as f64 * (1.0 - overlap_ratio)).floor() as u32).max(1)
}

/// Row-major iterator over the tiles of one image.
///
/// Cloning yields an independent iterator from the current position, so a
/// fresh grid can be walked any number of times with identical results.
#[derive(Debug, Clone)]
pub struct TileGrid {
    image_width: u32,
    image_height: u32,
    tile_width: u32,
    tile_height: u32,
    stride_w: u32,
    stride_h: u32,
    x: u32,
    y: u32,
}

impl TileGrid {
    pub fn new(
        image_width: u32,
        image_height: u32,
        tile_width: u32,
        tile_height: u32,
        overlap_ratio: f64,
    ) -> Self {
        Self {
            image_width,
            image_height,
            tile_width,
            tile_height,
            stride_w: stride(tile_width, overlap_ratio),
            stride_h: stride(tile_height, overlap_ratio),
            x: 0,
            y: 0,
        }
    }

    fn keeps(&self, tile: &TileSpec) -> bool {
        tile.width() as f64 >= self.tile_width as f64 * MIN_EDGE_FRACTION
            && tile.height() as f64 >= self.tile_height as f64 * MIN_EDGE_FRACTION
    }
}

impl Iterator for TileGrid {
    type Item = TileSpec;

    fn next(&mut self) -> Option<TileSpec> {
        while self.y < self.image_height {
            if self.x >= self.image_width {
                self.x = 0;
                self.y = self.y.saturating_add(self.stride_h);
                continue;
            }
            let tile = TileSpec {
                x_min: self.x,
                y_min: self.y,
                x_max: self.x.saturating_add(self.tile_width).min(self.image_width),
                y_max: self.y.saturating_add(self.tile_height).min(self.image_height),
            };
            self.x = self.x.saturating_add(self.stride_w);
            if self.keeps(&tile) {
                return Some(tile);
            }
        }
        None
    }
}

/// Tiles covering an image, stepping by `floor(tile * (1 - overlap))`.
pub fn generate_tile_grid(
    image_width: u32,
    image_height: u32,
    tile_width: u32,
    tile_height: u32,
    overlap_ratio: f64,
) -> TileGrid {
    TileGrid::new(image_width, image_height, tile_width, tile_height, overlap_ratio)
}

/// Clip boxes to a tile and express the survivors in the tile's normalized frame.
///
/// A box survives when the visible share of its area is strictly greater than
/// `iou_threshold`. Coordinates are normalized by the clamped tile size.
pub fn project_boxes_to_tile(
    tile: &TileSpec,
    boxes: &[PixelBox],
    iou_threshold: f64,
) -> Vec<BoundingBox> {
    let (tile_x_min, tile_y_min) = (tile.x_min as f64, tile.y_min as f64);
    let (tile_x_max, tile_y_max) = (tile.x_max as f64, tile.y_max as f64);
    let tile_w = tile.width() as f64;
    let tile_h = tile.height() as f64;

    boxes
        .iter()
        .filter_map(|obj| {
            let inter_x_min = obj.x_min.max(tile_x_min);
            let inter_y_min = obj.y_min.max(tile_y_min);
            let inter_x_max = obj.x_max.min(tile_x_max);
            let inter_y_max = obj.y_max.min(tile_y_max);
            let inter_w = inter_x_max - inter_x_min;
            let inter_h = inter_y_max - inter_y_min;
            if inter_w <= 0.0 || inter_h <= 0.0 {
                return None;
            }

            let original_area = obj.area();
            if original_area <= 0.0 || (inter_w * inter_h) / original_area <= iou_threshold {
                return None;
            }

            Some(BoundingBox {
                class_id: obj.class_id,
                x_center: ((inter_x_min - tile_x_min) + inter_w / 2.0) / tile_w,
                y_center: ((inter_y_min - tile_y_min) + inter_h / 2.0) / tile_h,
                width: inter_w / tile_w,
                height: inter_h / tile_h,
            })
        })
        .collect()
}

/// Tiles one image at a time with a fixed configuration and class map.
#[derive(Debug, Clone)]
pub struct TileProjector {
    config: TilingConfig,
    classes: ClassMap,
}

/// Boxes of one image after class remapping, ready to be projected.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub width: u32,
    pub height: u32,
    pub boxes: Vec<PixelBox>,
    pub unexpected_classes: usize,
}

impl TileProjector {
    pub fn new(config: TilingConfig, classes: ClassMap) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, classes })
    }

    pub fn config(&self) -> &TilingConfig {
        &self.config
    }

    /// Remap classes and convert boxes to pixels once per image.
    pub fn prepare(
        &self,
        image_width: u32,
        image_height: u32,
        boxes: &[BoundingBox],
        source: &str,
    ) -> PreparedImage {
        let (mapped, unexpected_classes) = self.classes.apply(boxes, source);
        PreparedImage {
            width: image_width,
            height: image_height,
            boxes: mapped
                .iter()
                .map(|b| b.to_pixel(image_width, image_height))
                .collect(),
            unexpected_classes,
        }
    }

    pub fn grid(&self, image_width: u32, image_height: u32) -> TileGrid {
        generate_tile_grid(
            image_width,
            image_height,
            self.config.tile_width,
            self.config.tile_height,
            self.config.overlap_ratio,
        )
    }

    /// Lazily project a prepared image onto every tile of its grid.
    pub fn tiles<'a>(&'a self, image: &'a PreparedImage) -> impl Iterator<Item = TileResult> + 'a {
        self.grid(image.width, image.height).map(move |tile| TileResult {
            tile,
            boxes: project_boxes_to_tile(&tile, &image.boxes, self.config.iou_threshold),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn square_image_yields_four_tiles() {
        let tiles: Vec<TileSpec> = generate_tile_grid(1000, 1000, 640, 640, 0.25).collect();
        let origins: Vec<(u32, u32)> = tiles.iter().map(|t| (t.x_min, t.y_min)).collect();
        assert_eq!(origins, vec![(0, 0), (480, 0), (0, 480), (480, 480)]);
        assert_eq!(tiles[1].width(), 520);
        assert_eq!(tiles[3].x_max, 1000);
    }

    #[test]
    fn grid_is_deterministic_and_restartable() {
        let grid = generate_tile_grid(1920, 1080, 640, 640, 0.25);
        let first: Vec<TileSpec> = grid.clone().collect();
        let second: Vec<TileSpec> = grid.collect();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn grid_origins_are_unique() {
        let tiles: Vec<TileSpec> = generate_tile_grid(3000, 2000, 1024, 1024, 0.25).collect();
        let origins: HashSet<(u32, u32)> = tiles.iter().map(|t| (t.x_min, t.y_min)).collect();
        assert_eq!(origins.len(), tiles.len());
    }

    #[test]
    fn grid_covers_image_outside_dropped_strips() {
        let (w, h) = (1500u32, 900u32);
        let tiles: Vec<TileSpec> = generate_tile_grid(w, h, 640, 640, 0.25).collect();
        let max_x = tiles.iter().map(|t| t.x_max).max().unwrap();
        let max_y = tiles.iter().map(|t| t.y_max).max().unwrap();
        // Whatever remains uncovered is narrower than half a tile.
        assert!((w - max_x) < 320);
        assert!((h - max_y) < 320);
        for px in (0..max_x).step_by(7) {
            for py in (0..max_y).step_by(7) {
                assert!(tiles
                    .iter()
                    .any(|t| px >= t.x_min && px < t.x_max && py >= t.y_min && py < t.y_max));
            }
        }
    }

    #[test]
    fn image_smaller_than_half_tile_has_no_tiles() {
        assert_eq!(generate_tile_grid(200, 200, 640, 640, 0.25).count(), 0);
    }

    #[test]
    fn image_smaller_than_tile_keeps_single_clamped_tile() {
        let tiles: Vec<TileSpec> = generate_tile_grid(512, 400, 640, 640, 0.25).collect();
        assert_eq!(
            tiles,
            vec![TileSpec {
                x_min: 0,
                y_min: 0,
                x_max: 512,
                y_max: 400
            }]
        );
    }

    #[test]
    fn contained_box_is_only_rescaled() {
        let tile = TileSpec {
            x_min: 400,
            y_min: 400,
            x_max: 1000,
            y_max: 1000,
        };
        let pixel = BoundingBox::new(0, 0.5, 0.5, 0.2, 0.2).to_pixel(1000, 1000);
        let projected = project_boxes_to_tile(&tile, &[pixel], 0.99);
        assert_eq!(projected.len(), 1);
        let b = projected[0];
        assert!(approx(b.x_center, 100.0 / 600.0));
        assert!(approx(b.y_center, 100.0 / 600.0));
        assert!(approx(b.width, 200.0 / 600.0));
        assert!(approx(b.height, 200.0 / 600.0));
        assert_eq!(b.to_label_line(), "0 0.166667 0.166667 0.333333 0.333333");
    }

    #[test]
    fn threshold_is_strict() {
        let tile = TileSpec {
            x_min: 50,
            y_min: 0,
            x_max: 690,
            y_max: 640,
        };
        let half_visible = PixelBox {
            class_id: 1,
            x_min: 0.0,
            y_min: 0.0,
            x_max: 100.0,
            y_max: 100.0,
        };
        assert!(project_boxes_to_tile(&tile, &[half_visible], 0.5).is_empty());
        assert_eq!(project_boxes_to_tile(&tile, &[half_visible], 0.49).len(), 1);
    }

    #[test]
    fn disjoint_and_touching_boxes_are_dropped() {
        let tile = TileSpec {
            x_min: 0,
            y_min: 0,
            x_max: 100,
            y_max: 100,
        };
        let touching = PixelBox {
            class_id: 0,
            x_min: 100.0,
            y_min: 10.0,
            x_max: 150.0,
            y_max: 50.0,
        };
        assert!(project_boxes_to_tile(&tile, &[touching], 0.0).is_empty());
    }

    #[test]
    fn full_image_tile_round_trips() {
        let tile = TileSpec {
            x_min: 0,
            y_min: 0,
            x_max: 1000,
            y_max: 800,
        };
        let original = BoundingBox::new(3, 0.31, 0.42, 0.12, 0.07);
        let projected = project_boxes_to_tile(&tile, &[original.to_pixel(1000, 800)], 0.25);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].to_label_line(), original.to_label_line());
    }

    #[test]
    fn projector_remaps_before_projection() {
        let config = TilingConfig {
            tile_width: 640,
            tile_height: 640,
            overlap_ratio: 0.25,
            iou_threshold: 0.25,
        };
        let projector = TileProjector::new(config, ClassMap::hit_uav()).unwrap();
        let boxes = [
            BoundingBox::new(1, 0.1, 0.1, 0.05, 0.05),
            BoundingBox::new(4, 0.1, 0.1, 0.05, 0.05),
            BoundingBox::new(9, 0.1, 0.1, 0.05, 0.05),
        ];
        let prepared = projector.prepare(1000, 1000, &boxes, "test");
        assert_eq!(prepared.unexpected_classes, 1);
        let results: Vec<TileResult> = projector.tiles(&prepared).collect();
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].boxes.len(), 1);
        assert_eq!(results[0].boxes[0].class_id, 2);
        assert!(results[3].is_background());
    }

    #[test]
    fn rejects_overlap_of_one() {
        let config = TilingConfig {
            tile_width: 640,
            tile_height: 640,
            overlap_ratio: 1.0,
            iou_threshold: 0.25,
        };
        assert!(matches!(
            TileProjector::new(config, ClassMap::identity()),
            Err(ConfigError::InvalidOverlap(_))
        ));
    }
}
