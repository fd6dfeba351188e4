use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::tiling::TilingConfig;

/// Split a YOLO dataset into overlapping tiles and re-project its labels.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct Args {
    /// Dataset root containing images/<split> and labels/<split>
    #[arg(short = 's', long = "source_dir")]
    pub source_dir: PathBuf,

    /// Directory receiving one <name>_tiled_<W>x<H> dataset per tile size
    #[arg(short = 'o', long = "output_dir")]
    pub output_dir: PathBuf,

    /// Tile sizes as WIDTHxHEIGHT (or a single number for square tiles)
    #[arg(
        long = "tile_size",
        value_delimiter = ',',
        value_parser = parse_tile_size,
        default_values_t = [TileSize::new(640, 640)]
    )]
    pub tile_sizes: Vec<TileSize>,

    /// Overlap between neighbouring tiles, in [0, 1)
    #[arg(long = "overlap", default_value_t = 0.25, value_parser = validate_overlap)]
    pub overlap: f64,

    /// Keep a box in a tile only if more than this share of it is visible
    #[arg(long = "iou_threshold", default_value_t = 0.25, value_parser = validate_size)]
    pub iou_threshold: f64,

    /// Dataset splits to process
    #[arg(
        long = "splits",
        value_delimiter = ',',
        default_values_t = [String::from("train"), String::from("val"), String::from("test")]
    )]
    pub splits: Vec<String>,

    /// Source layout: split folders, or capture batches with metadata.txt
    #[arg(long = "layout", value_enum, default_value = "splits")]
    pub layout: SourceLayout,

    /// Region written to the metadata CSV in batch layout
    #[arg(long = "region", default_value = "rural")]
    pub region: String,

    /// Built-in class remapping applied to source labels
    #[arg(long = "class_preset", value_enum, default_value = "identity")]
    pub class_preset: ClassPreset,

    /// JSON class map file; overrides --class_preset
    #[arg(long = "class_map")]
    pub class_map: Option<PathBuf>,

    /// Tile file naming scheme
    #[arg(long = "naming", value_enum, default_value = "origin")]
    pub naming: NamingScheme,

    /// Prefix used by the row-span naming scheme (defaults to the source directory name)
    #[arg(long = "name_prefix")]
    pub name_prefix: Option<String>,

    /// What to do with tiles that contain no objects
    #[arg(long = "background", value_enum, default_value = "skip")]
    pub background: BackgroundMode,

    /// Target share of background tiles when --background ratio is used
    #[arg(long = "background_ratio", default_value_t = 0.15, value_parser = validate_ratio)]
    pub background_ratio: f64,

    /// Seed for background sampling
    #[arg(long = "seed", default_value_t = 42)]
    pub seed: u64,

    /// Number of worker threads used to tile images
    #[arg(long = "workers", default_value_t = 1)]
    pub workers: usize,
}

impl Args {
    /// One tiling configuration per requested tile size.
    pub fn tiling_configs(&self) -> Vec<TilingConfig> {
        self.tile_sizes
            .iter()
            .map(|size| TilingConfig {
                tile_width: size.width,
                tile_height: size.height,
                overlap_ratio: self.overlap,
                iou_threshold: self.iou_threshold,
            })
            .collect()
    }
}

/// Label conversion and image normalization utilities.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct ConvertArgs {
    #[command(subcommand)]
    pub command: ConvertCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConvertCommand {
    /// Remap class ids of YOLO label files (HIT-UAV)
    Remap(LabelConvertArgs),
    /// Convert COCO JSON annotations to YOLO labels (POP)
    Coco(LabelConvertArgs),
    /// Convert VisDrone annotations to YOLO labels
    Visdrone(LabelConvertArgs),
    /// Convert grayscale or RGBA images to 3-channel RGB in place
    ToRgb(ToRgbArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct LabelConvertArgs {
    /// Original dataset root
    #[arg(short = 's', long = "source_dir")]
    pub source_dir: PathBuf,

    /// Converted dataset root
    #[arg(short = 'o', long = "output_dir")]
    pub output_dir: PathBuf,

    /// Built-in class remapping (defaults to the one matching the subcommand)
    #[arg(long = "class_preset", value_enum)]
    pub class_preset: Option<ClassPreset>,

    /// JSON class map file; overrides --class_preset
    #[arg(long = "class_map")]
    pub class_map: Option<PathBuf>,

    /// Dataset splits to process
    #[arg(
        long = "splits",
        value_delimiter = ',',
        default_values_t = [String::from("train"), String::from("val"), String::from("test")]
    )]
    pub splits: Vec<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ToRgbArgs {
    /// Dataset roots whose images/ directory is converted
    #[arg(required = true)]
    pub roots: Vec<PathBuf>,

    /// Number of worker threads
    #[arg(long = "workers", default_value_t = 1)]
    pub workers: usize,
}

// Built-in source class tables
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum ClassPreset {
    Identity,
    HitUav,
    Pop,
    Visdrone,
}

// Where source images and labels live
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum SourceLayout {
    /// images/<split> with labels/<split>
    Splits,
    /// images/<batch> with labels/<batch>/labels/train and a per-batch metadata.txt
    Batches,
}

// File stem scheme for generated tiles
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum NamingScheme {
    /// "{stem}__{x}_{y}"
    Origin,
    /// "{prefix}_{stem}_{y_min}_{y_max}"
    RowSpan,
}

// Handling of tiles without retained boxes
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum BackgroundMode {
    Skip,
    Keep,
    Ratio,
}

/// Nominal tile dimensions in pixels.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

impl TileSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for TileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// Accept "640x480" or "640"
pub fn parse_tile_size(s: &str) -> Result<TileSize, String> {
    let (w, h) = match s.trim().split_once(['x', 'X']) {
        Some((w, h)) => (w, h),
        None => (s.trim(), s.trim()),
    };
    match (u32::from_str(w.trim()), u32::from_str(h.trim())) {
        (Ok(width), Ok(height)) if width > 0 && height > 0 => Ok(TileSize::new(width, height)),
        _ => Err(format!("TILE_SIZE must look like 640x640, got '{}'", s)),
    }
}

// Validate that the size is between 0.0 and 1.0
pub fn validate_size(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("SIZE must be between 0.0 and 1.0".to_string()),
    }
}

// Overlap of 1.0 would give a zero stride
pub fn validate_overlap(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..1.0).contains(&val) => Ok(val),
        _ => Err("OVERLAP must be in [0.0, 1.0)".to_string()),
    }
}

pub fn validate_ratio(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if val > 0.0 && val < 1.0 => Ok(val),
        _ => Err("RATIO must be strictly between 0.0 and 1.0".to_string()),
    }
}
