//! Aerial dataset tiling and conversion toolkit
//!
//! This library splits YOLO detection datasets into overlapping fixed-size
//! tiles, re-projects their labels, and converts source-specific annotation
//! formats (HIT-UAV, POP COCO, VisDrone) into one unified class taxonomy.
//! Batch-organised sources (SAVI) are tiled with a per-tile metadata CSV.

pub mod channels;
pub mod class_map;
pub mod coco;
pub mod config;
pub mod conversion;
pub mod dataset;
pub mod error;
pub mod io;
pub mod labels;
pub mod metadata;
pub mod sampling;
pub mod tiling;
pub mod types;
pub mod utils;
pub mod visdrone;

// Re-export commonly used types and functions
pub use class_map::{ClassLookup, ClassMap};
pub use config::{
    Args, BackgroundMode, ClassPreset, ConvertArgs, ConvertCommand, NamingScheme, SourceLayout, TileSize,
};
pub use dataset::{process_dataset, tile_dataset, BackgroundPolicy, DatasetLayout, TileJob, TileNaming};
pub use error::{ConfigError, RecordError};
pub use tiling::{generate_tile_grid, project_boxes_to_tile, TileProjector, TilingConfig};
pub use types::{BoundingBox, PixelBox, ProcessingStats, TileResult, TileSpec};

// Conversion exports
pub use channels::convert_dataset_to_rgb;
pub use conversion::{convert_coco_dataset, convert_visdrone_dataset, remap_dataset, ConversionStats};
