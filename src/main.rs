//! wsi-cellularity - Superpixel cellularity detection for Whole Slide Images.
//!
//! This binary runs the detector on one slide from a local directory and
//! writes the detection as JSON.

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_cellularity::{CellularityDetector, Cli, Detection, DetectorConfig, LocalSlideSource};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.detector_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config);
    run_detect(&cli, config).await
}

// =============================================================================
// Detect Command
// =============================================================================

async fn run_detect(cli: &Cli, config: DetectorConfig) -> ExitCode {
    info!("Slide: {}", cli.slide_dir.join(&cli.slide).display());
    info!(
        "  Native magnification: {}x, working magnification: {}x",
        cli.native_mag, config.mag
    );

    let source = LocalSlideSource::new(&cli.slide_dir)
        .with_magnification(cli.native_mag)
        .with_thumbnail_size(cli.thumbnail_size);
    let detector = CellularityDetector::new(source, cli.slide.clone(), config);

    let detection = match detector.run().await {
        Ok(detection) => detection,
        Err(e) => {
            error!("Detection failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Found {} contiguous region(s) in {} tissue piece(s)",
        detection.regions.len(),
        detection.tissue_pieces.len()
    );

    if let Err(e) = write_detection(&detection, cli.output.as_deref(), cli.pretty) {
        error!("Failed to write result: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Serialize the detection to `output`, or stdout when absent.
fn write_detection(detection: &Detection, output: Option<&Path>, pretty: bool) -> Result<(), String> {
    let json = if pretty {
        serde_json::to_string_pretty(detection)
    } else {
        serde_json::to_string(detection)
    }
    .map_err(|e| e.to_string())?;

    match output {
        Some(path) => {
            std::fs::write(path, json).map_err(|e| format!("{}: {}", path.display(), e))?;
            info!("Wrote detection to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &DetectorConfig) {
    let env_filter = format!("wsi_cellularity={}", config.log_level());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
