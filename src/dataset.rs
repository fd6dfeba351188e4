//! Tiling of a whole YOLO dataset, laid out either as `images/<split>` +
//! `labels/<split>` or as capture batches with per-batch metadata.

use anyhow::{anyhow, Context};
use image::{DynamicImage, GenericImageView};
use log::{error, info, warn};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::class_map::ClassMap;
use crate::config::{Args, BackgroundMode, NamingScheme, SourceLayout};
use crate::error::ConfigError;
use crate::io::{
    find_orphan_labels, list_images, list_subdirectories, setup_flat_directories, setup_split_directories,
    write_label_file, SplitDirs,
};
use crate::labels::read_label_file;
use crate::metadata::{metadata_csv_path, write_metadata_csv, BatchMetadata, MetadataRow, METADATA_FILE};
use crate::sampling::balance_background;
use crate::tiling::{TileProjector, TilingConfig};
use crate::types::{ProcessingStats, TileResult, TileSpec};
use crate::utils::{create_io_thread_pool, create_progress_bar};

/// How generated tile files are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileNaming {
    pub scheme: NamingScheme,
    pub prefix: String,
}

impl TileNaming {
    pub fn origin() -> Self {
        Self {
            scheme: NamingScheme::Origin,
            prefix: String::new(),
        }
    }

    pub fn row_span(prefix: impl Into<String>) -> Self {
        Self {
            scheme: NamingScheme::RowSpan,
            prefix: prefix.into(),
        }
    }

    pub fn stem(&self, source_stem: &str, tile: &TileSpec) -> String {
        let stem = match self.scheme {
            NamingScheme::Origin => format!("{}__{}_{}", source_stem, tile.x_min, tile.y_min),
            NamingScheme::RowSpan => format!(
                "{}_{}_{}_{}",
                self.prefix, source_stem, tile.y_min, tile.y_max
            ),
        };
        sanitize_filename::sanitize(stem)
    }
}

/// Which tiles without boxes end up on disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackgroundPolicy {
    Skip,
    Keep,
    /// Subsample backgrounds over the whole pass to about `target_ratio` of all tiles.
    Ratio { target_ratio: f64, seed: u64 },
}

impl BackgroundPolicy {
    pub fn new(mode: BackgroundMode, target_ratio: f64, seed: u64) -> Result<Self, ConfigError> {
        match mode {
            BackgroundMode::Skip => Ok(BackgroundPolicy::Skip),
            BackgroundMode::Keep => Ok(BackgroundPolicy::Keep),
            BackgroundMode::Ratio if target_ratio > 0.0 && target_ratio < 1.0 => {
                Ok(BackgroundPolicy::Ratio { target_ratio, seed })
            }
            BackgroundMode::Ratio => Err(ConfigError::InvalidBackgroundRatio(target_ratio)),
        }
    }

    fn writes(&self, result: &TileResult) -> bool {
        match self {
            BackgroundPolicy::Skip => !result.is_background(),
            BackgroundPolicy::Keep | BackgroundPolicy::Ratio { .. } => true,
        }
    }
}

/// How source images are grouped under the dataset root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetLayout {
    /// `images/<split>` with `labels/<split>`; tiles go to `{images,labels}/<split>`.
    Splits(Vec<String>),
    /// `images/<batch>` with `labels/<batch>/labels/train` and `images/<batch>/metadata.txt`.
    /// Tiles go to flat `images/` and `labels/`, and one metadata row per tile
    /// is written to `metadata_csv`.
    Batches { region: String, metadata_csv: PathBuf },
}

/// Everything needed for one dataset / tile-size pass.
#[derive(Debug, Clone)]
pub struct TileJob {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub layout: DatasetLayout,
    pub projector: TileProjector,
    pub naming: TileNaming,
    pub background: BackgroundPolicy,
    pub workers: usize,
}

impl TileJob {
    pub fn from_args(args: &Args, config: TilingConfig, classes: ClassMap) -> Result<Self, ConfigError> {
        let projector = TileProjector::new(config, classes)?;
        let naming = match args.naming {
            NamingScheme::Origin => TileNaming::origin(),
            NamingScheme::RowSpan => TileNaming::row_span(
                args.name_prefix
                    .clone()
                    .unwrap_or_else(|| dataset_name(&args.source_dir)),
            ),
        };
        let layout = match args.layout {
            SourceLayout::Splits => DatasetLayout::Splits(args.splits.clone()),
            SourceLayout::Batches => DatasetLayout::Batches {
                region: args.region.clone(),
                metadata_csv: metadata_csv_path(&args.output_dir, &args.source_dir, &config),
            },
        };
        Ok(Self {
            source_dir: args.source_dir.clone(),
            output_dir: output_dataset_dir(&args.output_dir, &args.source_dir, &config),
            layout,
            projector,
            naming,
            background: BackgroundPolicy::new(args.background, args.background_ratio, args.seed)?,
            workers: args.workers,
        })
    }
}

fn dataset_name(source_dir: &Path) -> String {
    source_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string())
}

/// `<output_root>/<source name>_tiled_<W>x<H>`
pub fn output_dataset_dir(output_root: &Path, source_dir: &Path, config: &TilingConfig) -> PathBuf {
    output_root.join(format!(
        "{}_tiled_{}x{}",
        dataset_name(source_dir),
        config.tile_width,
        config.tile_height
    ))
}

/// A folder of source images tiled together: one split or one capture batch.
#[derive(Debug, Clone)]
struct TileGroup {
    name: String,
    images_dir: PathBuf,
    labels_dir: PathBuf,
    out: SplitDirs,
    /// Batch name prepended to source stems so tiles of different batches never collide.
    stem_prefix: Option<String>,
    metadata: Option<BatchMetadata>,
}

impl TileGroup {
    fn source_stem(&self, image_stem: &str) -> String {
        match &self.stem_prefix {
            Some(prefix) => format!("{}_{}", prefix, image_stem),
            None => image_stem.to_string(),
        }
    }
}

/// Counters and metadata rows produced by tiling some images.
#[derive(Debug, Default)]
struct GroupOutput {
    stats: ProcessingStats,
    rows: Vec<MetadataRow>,
}

impl GroupOutput {
    fn merge(mut self, other: GroupOutput) -> GroupOutput {
        self.stats = self.stats.merge(other.stats);
        self.rows.extend(other.rows);
        self
    }
}

/// Tiles of one source image waiting for the background draw.
struct ImageTiles {
    image_path: PathBuf,
    group: usize,
    results: Vec<TileResult>,
}

/// Run every tile-size pass requested on the command line.
/// A failing pass is logged and the remaining passes still run.
pub fn process_dataset(args: &Args) -> anyhow::Result<()> {
    let classes = ClassMap::resolve_source(args.class_preset, args.class_map.as_deref())?;

    for config in args.tiling_configs() {
        info!(
            "Tiling '{}' into {}x{} tiles...",
            args.source_dir.display(),
            config.tile_width,
            config.tile_height
        );
        let outcome = TileJob::from_args(args, config, classes.clone())
            .map_err(anyhow::Error::from)
            .and_then(|job| {
                info!("Output dataset: {}", job.output_dir.display());
                tile_dataset(&job)
            });
        match outcome {
            Ok(stats) => stats.print_summary(),
            Err(e) => error!(
                "Tiling pass {}x{} aborted: {:#}",
                config.tile_width, config.tile_height, e
            ),
        }
    }
    Ok(())
}

fn split_groups(job: &TileJob, splits: &[String]) -> anyhow::Result<Vec<TileGroup>> {
    let mut groups = Vec::new();
    for split in splits {
        let src = SplitDirs::for_split(&job.source_dir, split);
        if !src.images_dir.is_dir() {
            info!("No '{}' split in {}. Skipped.", split, job.source_dir.display());
            continue;
        }
        let out = setup_split_directories(&job.output_dir, split)
            .with_context(|| format!("failed to create output directories for split '{}'", split))?;
        groups.push(TileGroup {
            name: split.clone(),
            images_dir: src.images_dir,
            labels_dir: src.labels_dir,
            out,
            stem_prefix: None,
            metadata: None,
        });
    }
    Ok(groups)
}

fn batch_groups(job: &TileJob) -> anyhow::Result<Vec<TileGroup>> {
    let images_root = job.source_dir.join("images");
    if !images_root.is_dir() {
        return Err(ConfigError::MissingRoot(images_root).into());
    }
    let out = setup_flat_directories(&job.output_dir)
        .with_context(|| format!("failed to create output directories in {}", job.output_dir.display()))?;

    let mut groups = Vec::new();
    for batch_dir in list_subdirectories(&images_root) {
        let Some(batch) = batch_dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let metadata_path = batch_dir.join(METADATA_FILE);
        let metadata = match BatchMetadata::read(&metadata_path) {
            Ok(Some(metadata)) if !metadata.is_empty() => metadata,
            Ok(Some(_)) => {
                warn!("{} has no 'key: value' lines. Batch skipped.", metadata_path.display());
                continue;
            }
            Ok(None) => {
                warn!("No {} in {}. Batch skipped.", METADATA_FILE, batch_dir.display());
                continue;
            }
            Err(e) => {
                warn!("Failed to read {}: {}. Batch skipped.", metadata_path.display(), e);
                continue;
            }
        };
        groups.push(TileGroup {
            name: batch.clone(),
            images_dir: batch_dir,
            labels_dir: job
                .source_dir
                .join("labels")
                .join(&batch)
                .join("labels")
                .join("train"),
            out: out.clone(),
            stem_prefix: Some(batch),
            metadata: Some(metadata),
        });
    }
    Ok(groups)
}

/// Tile every split (or batch) of a dataset and return the pass statistics.
pub fn tile_dataset(job: &TileJob) -> anyhow::Result<ProcessingStats> {
    if !job.source_dir.is_dir() {
        return Err(ConfigError::MissingRoot(job.source_dir.clone()).into());
    }
    let thread_pool = create_io_thread_pool(job.workers)?;
    let groups = match &job.layout {
        DatasetLayout::Splits(splits) => split_groups(job, splits)?,
        DatasetLayout::Batches { .. } => batch_groups(job)?,
    };

    let mut output = GroupOutput::default();
    let mut pending: Vec<ImageTiles> = Vec::new();

    for (group_idx, group) in groups.iter().enumerate() {
        let images = list_images(&group.images_dir);
        let image_stems: HashSet<String> = images
            .iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        for orphan in find_orphan_labels(&group.labels_dir, &image_stems) {
            warn!(
                "No image found for label file {}. Label skipped.",
                orphan.display()
            );
            output.stats.orphan_labels += 1;
        }

        let pb = create_progress_bar(images.len() as u64, &group.name);
        match job.background {
            BackgroundPolicy::Skip | BackgroundPolicy::Keep => {
                let tiled: Vec<GroupOutput> = thread_pool.install(|| {
                    images
                        .par_iter()
                        .map(|image_path| {
                            let o = tile_image(job, group, image_path);
                            pb.inc(1);
                            o
                        })
                        .collect()
                });
                output = tiled.into_iter().fold(output, GroupOutput::merge);
            }
            BackgroundPolicy::Ratio { .. } => {
                let discovered: Vec<(Option<Vec<TileResult>>, ProcessingStats)> = thread_pool.install(|| {
                    images
                        .par_iter()
                        .map(|image_path| {
                            let d = discover_image(job, group, image_path);
                            pb.inc(1);
                            d
                        })
                        .collect()
                });
                for (image_path, (results, image_stats)) in images.iter().zip(discovered) {
                    output.stats = output.stats.merge(image_stats);
                    if let Some(results) = results {
                        pending.push(ImageTiles {
                            image_path: image_path.clone(),
                            group: group_idx,
                            results,
                        });
                    }
                }
            }
        }
        pb.finish_with_message(format!("{} done", group.name));
    }

    if let BackgroundPolicy::Ratio { target_ratio, seed } = job.background {
        output = output.merge(write_balanced(job, &groups, pending, target_ratio, seed, &thread_pool));
    }

    if let DatasetLayout::Batches { metadata_csv, .. } = &job.layout {
        if output.rows.is_empty() {
            info!("No tiles written, so no metadata file was created.");
        } else {
            write_metadata_csv(metadata_csv, &output.rows)?;
            info!(
                "Wrote {} metadata rows to {}",
                output.rows.len(),
                metadata_csv.display()
            );
        }
    }
    output.stats.metadata_rows = output.rows.len();

    Ok(output.stats)
}

/// Decode, project and write the tiles of one image.
fn tile_image(job: &TileJob, group: &TileGroup, image_path: &Path) -> GroupOutput {
    let mut output = GroupOutput::default();
    let outcome = (|| -> anyhow::Result<()> {
        let img = image::open(image_path)
            .with_context(|| format!("failed to decode {}", image_path.display()))?;
        let (width, height) = img.dimensions();
        let results = project_image(job, group, image_path, width, height, &mut output.stats)?;
        let selected: Vec<TileResult> = results
            .into_iter()
            .filter(|r| job.background.writes(r))
            .collect();
        write_tiles(job, group, &img, image_path, &selected, &mut output)
    })();
    match outcome {
        Ok(()) => output.stats.images_processed += 1,
        Err(e) => {
            error!("Failed to tile {}: {:#}", image_path.display(), e);
            output.stats.failed_images += 1;
        }
    }
    output
}

/// Read the header and labels of one image and keep all of its tile results.
/// The image is only counted once its tiles are written.
fn discover_image(
    job: &TileJob,
    group: &TileGroup,
    image_path: &Path,
) -> (Option<Vec<TileResult>>, ProcessingStats) {
    let mut stats = ProcessingStats::new();
    let outcome = image::image_dimensions(image_path)
        .with_context(|| format!("failed to read dimensions of {}", image_path.display()))
        .and_then(|(width, height)| project_image(job, group, image_path, width, height, &mut stats));
    match outcome {
        Ok(results) => (Some(results), stats),
        Err(e) => {
            error!("Failed to tile {}: {:#}", image_path.display(), e);
            stats.failed_images += 1;
            (None, stats)
        }
    }
}

fn image_stem(image_path: &Path) -> anyhow::Result<&str> {
    image_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("file name is not valid UTF-8: {}", image_path.display()))
}

fn project_image(
    job: &TileJob,
    group: &TileGroup,
    image_path: &Path,
    width: u32,
    height: u32,
    stats: &mut ProcessingStats,
) -> anyhow::Result<Vec<TileResult>> {
    let stem = image_stem(image_path)?;
    let label_path = group.labels_dir.join(format!("{}.txt", stem));
    let labels = read_label_file(&label_path)
        .with_context(|| format!("failed to read {}", label_path.display()))?;
    stats.malformed_lines += labels.malformed;

    let prepared = job
        .projector
        .prepare(width, height, &labels.boxes, &label_path.display().to_string());
    stats.unexpected_classes += prepared.unexpected_classes;
    Ok(job.projector.tiles(&prepared).collect())
}

fn write_tiles(
    job: &TileJob,
    group: &TileGroup,
    img: &DynamicImage,
    image_path: &Path,
    results: &[TileResult],
    output: &mut GroupOutput,
) -> anyhow::Result<()> {
    let source_stem = group.source_stem(image_stem(image_path)?);
    let extension = image_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg");
    let mut written: HashSet<String> = HashSet::with_capacity(results.len());

    for result in results {
        let tile_stem = job.naming.stem(&source_stem, &result.tile);
        if !written.insert(tile_stem.clone()) {
            warn!(
                "Tile name {} is used twice for {}. The earlier tile is overwritten.",
                tile_stem,
                image_path.display()
            );
        }
        let tile = &result.tile;
        let crop = img.crop_imm(tile.x_min, tile.y_min, tile.width(), tile.height());
        let tile_image_path = group.out.images_dir.join(format!("{}.{}", tile_stem, extension));
        crop.save(&tile_image_path)
            .with_context(|| format!("failed to save {}", tile_image_path.display()))?;

        let tile_label_path = group.out.labels_dir.join(format!("{}.txt", tile_stem));
        write_label_file(&tile_label_path, &result.label_text())
            .with_context(|| format!("failed to write {}", tile_label_path.display()))?;
        output.stats.record_tile(result);

        if let (Some(metadata), DatasetLayout::Batches { region, .. }) = (&group.metadata, &job.layout) {
            output.rows.push(MetadataRow::new(tile_stem, metadata, region, tile));
        }
    }
    Ok(())
}

/// Draw backgrounds over the whole pass, then write the surviving tiles image by image.
fn write_balanced(
    job: &TileJob,
    groups: &[TileGroup],
    mut pending: Vec<ImageTiles>,
    target_ratio: f64,
    seed: u64,
    thread_pool: &rayon::ThreadPool,
) -> GroupOutput {
    let flat: Vec<(usize, TileResult)> = pending
        .iter_mut()
        .enumerate()
        .flat_map(|(idx, tiles)| {
            std::mem::take(&mut tiles.results)
                .into_iter()
                .map(move |r| (idx, r))
        })
        .collect();
    let discovered_background = flat.iter().filter(|(_, r)| r.is_background()).count();
    let kept = balance_background(flat, target_ratio, seed, |(_, r)| r.is_background());
    let kept_background = kept.iter().filter(|(_, r)| r.is_background()).count();
    info!(
        "Background tiles: keeping {} of {} discovered (target ratio {:.2}).",
        kept_background, discovered_background, target_ratio
    );
    for (idx, result) in kept {
        pending[idx].results.push(result);
    }

    let pb = create_progress_bar(pending.len() as u64, "Write");
    let written: Vec<GroupOutput> = thread_pool.install(|| {
        pending
            .par_iter()
            .map(|tiles| {
                let mut output = GroupOutput::default();
                let group = &groups[tiles.group];
                // Images whose every tile was dropped by the draw are done without decoding.
                let outcome = if tiles.results.is_empty() {
                    Ok(())
                } else {
                    image::open(&tiles.image_path)
                        .with_context(|| format!("failed to decode {}", tiles.image_path.display()))
                        .and_then(|img| {
                            write_tiles(job, group, &img, &tiles.image_path, &tiles.results, &mut output)
                        })
                };
                match outcome {
                    Ok(()) => output.stats.images_processed += 1,
                    Err(e) => {
                        error!("Failed to write tiles of {}: {:#}", tiles.image_path.display(), e);
                        output.stats.failed_images += 1;
                    }
                }
                pb.inc(1);
                output
            })
            .collect()
    });
    pb.finish_with_message("tiles written");
    written.into_iter().fold(GroupOutput::default(), GroupOutput::merge)
}
