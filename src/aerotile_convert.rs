use aerotile::class_map::ClassMap;
use aerotile::config::{ClassPreset, LabelConvertArgs};
use aerotile::{
    convert_coco_dataset, convert_dataset_to_rgb, convert_visdrone_dataset, remap_dataset,
    ConversionStats, ConvertArgs, ConvertCommand,
};
use clap::Parser;
use log::{error, info, warn};
use std::path::Path;

type Pipeline = fn(&Path, &Path, &ClassMap, &[String]) -> anyhow::Result<ConversionStats>;

fn run_label_conversion(args: &LabelConvertArgs, default_preset: ClassPreset, pipeline: Pipeline) -> anyhow::Result<()> {
    let preset = args.class_preset.unwrap_or(default_preset);
    let classes = ClassMap::resolve_source(preset, args.class_map.as_deref())?;
    let stats = pipeline(&args.source_dir, &args.output_dir, &classes, &args.splits)?;
    stats.print_summary();
    Ok(())
}

fn main() {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = ConvertArgs::parse();

    let outcome = match &args.command {
        ConvertCommand::Remap(a) => {
            info!("Starting HIT-UAV label remapping...");
            run_label_conversion(a, ClassPreset::HitUav, remap_dataset)
        }
        ConvertCommand::Coco(a) => {
            info!("Starting COCO to YOLO conversion...");
            run_label_conversion(a, ClassPreset::Pop, convert_coco_dataset)
        }
        ConvertCommand::Visdrone(a) => {
            info!("Starting VisDrone to YOLO conversion...");
            run_label_conversion(a, ClassPreset::Visdrone, convert_visdrone_dataset)
        }
        ConvertCommand::ToRgb(a) => {
            for root in &a.roots {
                match convert_dataset_to_rgb(root, a.workers) {
                    Ok(stats) => stats.print_summary(root),
                    Err(e) => warn!("Skipping {}: {:#}", root.display(), e),
                }
            }
            Ok(())
        }
    };

    if let Err(e) = outcome {
        error!("Conversion failed: {:#}", e);
        std::process::exit(1);
    }
}
