use aerotile::{process_dataset, Args};
use clap::Parser;
use log::{error, info};

fn main() {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if !args.source_dir.is_dir() {
        error!(
            "The specified source_dir does not exist: {}",
            args.source_dir.display()
        );
        std::process::exit(1);
    }

    info!("Starting the tiling process...");

    if let Err(e) = process_dataset(&args) {
        error!("Failed to process dataset: {:#}", e);
        std::process::exit(1);
    }
}
