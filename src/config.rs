//! Configuration management for the cellularity detector.
//!
//! Two layers:
//! - [`DetectorConfig`]: the full, serializable detector configuration with
//!   sensible defaults for every setting. It can be built in code or loaded
//!   from a JSON file.
//! - [`Cli`]: command-line arguments (with `CELL_` environment variables)
//!   for the `wsi-cellularity` binary. Explicit flags override values from an
//!   optional JSON config file, which in turn overrides the defaults.
//!
//! # Example
//!
//! ```ignore
//! use wsi_cellularity::config::DetectorConfig;
//!
//! let mut config = DetectorConfig::default();
//! config.mag = 2.5;
//! config.tissue.min_size = 1000;
//! config.validate()?;
//! ```
//!
//! # Environment Variables
//!
//! - `CELL_SLIDE_DIR` - Directory holding slide image files (required)
//! - `CELL_SLIDE` - Slide file name inside that directory (required)
//! - `CELL_CONFIG` - JSON file with a `DetectorConfig`
//! - `CELL_NATIVE_MAG` - Objective magnification of the files (default: 40)
//! - `CELL_THUMBNAIL_SIZE` - Longer thumbnail side in pixels (default: 1024)
//! - `CELL_MAG` - Working magnification (default: 3.0)
//! - `CELL_MAX_CELLULARITY` - Highest cellularity bin (default: 40)
//! - `CELL_LABEL_PREFIX` - Prefix for log and label output

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::color::{NormalizationProfile, NormalizationProfiles};
use crate::error::DetectorError;
use crate::score::DEFAULT_MAX_CELLULARITY;
use crate::segment::SuperpixelParams;
use crate::slide::{DEFAULT_NATIVE_MAGNIFICATION, DEFAULT_THUMBNAIL_SIZE};
use crate::tissue::TissueMaskParams;

// =============================================================================
// Default Values
// =============================================================================

/// Default working magnification for superpixel segmentation.
pub const DEFAULT_MAG: f64 = 3.0;

/// Default edge length (working pixels) of main-image fetch tiles.
pub const DEFAULT_MAIN_TILE_SIZE: u32 = 2048;

/// Default number of salient regions of interest reported.
pub const DEFAULT_TOPK_SALIENT_ROIS: usize = 8;

/// Default zoom-out factor applied to salient region boxes.
pub const DEFAULT_ZOOMOUT: f64 = 1.5;

/// Highest supported verbosity level.
pub const MAX_VERBOSE: u8 = 2;

/// Reference lαβ statistics for H&E thumbnails.
pub const REFERENCE_THUMBNAIL_PROFILE: NormalizationProfile = NormalizationProfile {
    mu: [9.24496373, -0.00966569, 0.01757247],
    sigma: [0.35686209, 0.02566772, 0.02500282],
};

/// Reference lαβ statistics for H&E regions at working magnification.
pub const REFERENCE_MAIN_PROFILE: NormalizationProfile = NormalizationProfile {
    mu: [8.74108109, -0.12440419, 0.0444982],
    sigma: [0.6135447, 0.10989545, 0.0286032],
};

// =============================================================================
// Detector Configuration
// =============================================================================

/// Everything that controls a detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Working magnification for segmentation and scoring
    pub mag: f64,

    /// Highest cellularity bin; bins are `0..=max_cellularity`
    pub max_cellularity: u32,

    pub tissue: TissueMaskParams,

    pub superpixel: SuperpixelParams,

    /// Statistic range `[lo, hi]` spread over the bins
    pub cellularity_range: [f64; 2],

    /// Main-image fetch tile edge, in working pixels
    pub main_tile_size: u32,

    /// Number of salient regions of interest to report
    pub topk_salient_rois: usize,

    /// Scale applied to salient region boxes around their centers
    pub zoomout: f64,

    /// 0 = summaries, 1 = per-stage detail, 2 = everything
    pub verbose: u8,

    /// Prefix attached to log output and result labels
    pub label_prefix: String,

    /// Silence non-fatal warnings in the log (they are still recorded)
    pub suppress_warnings: bool,

    /// Keep tissue piece outlines in the result
    pub visualize_tissue_boundary: bool,

    /// Keep scored superpixels in the result
    pub visualize_spixels: bool,

    /// Keep per-piece region label rasters in the result
    pub visualize_contiguous: bool,

    /// Color normalization targets per scope
    pub normalization: NormalizationProfiles,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            mag: DEFAULT_MAG,
            max_cellularity: DEFAULT_MAX_CELLULARITY,
            tissue: TissueMaskParams::default(),
            superpixel: SuperpixelParams::default(),
            cellularity_range: [0.0, 1.0],
            main_tile_size: DEFAULT_MAIN_TILE_SIZE,
            topk_salient_rois: DEFAULT_TOPK_SALIENT_ROIS,
            zoomout: DEFAULT_ZOOMOUT,
            verbose: 0,
            label_prefix: String::new(),
            suppress_warnings: false,
            visualize_tissue_boundary: true,
            visualize_spixels: true,
            visualize_contiguous: true,
            normalization: NormalizationProfiles::default(),
        }
    }
}

impl DetectorConfig {
    /// Validate every parameter; the first problem found is returned.
    pub fn validate(&self) -> Result<(), DetectorError> {
        if !self.mag.is_finite() || self.mag <= 0.0 {
            return Err(DetectorError::config(
                "mag",
                format!("must be a positive magnification, got {}", self.mag),
            ));
        }
        if self.max_cellularity == 0 {
            return Err(DetectorError::config(
                "max_cellularity",
                "must be at least 1",
            ));
        }
        let [lo, hi] = self.cellularity_range;
        if !lo.is_finite() || !hi.is_finite() || hi <= lo {
            return Err(DetectorError::config(
                "cellularity_range",
                format!("must be finite with lo < hi, got [{}, {}]", lo, hi),
            ));
        }
        if self.main_tile_size == 0 {
            return Err(DetectorError::config(
                "main_tile_size",
                "must be greater than 0",
            ));
        }
        if !self.zoomout.is_finite() || self.zoomout <= 0.0 {
            return Err(DetectorError::config(
                "zoomout",
                format!("must be positive, got {}", self.zoomout),
            ));
        }
        if self.verbose > MAX_VERBOSE {
            return Err(DetectorError::config(
                "verbose",
                format!("must be between 0 and {}, got {}", MAX_VERBOSE, self.verbose),
            ));
        }
        self.tissue.validate()?;
        self.superpixel.validate()?;
        self.normalization.validate()?;
        Ok(())
    }

    /// Default log filter directive for the configured verbosity.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Set both normalization profiles to the H&E reference statistics.
    pub fn with_reference_normalization(mut self) -> Self {
        self.normalization = NormalizationProfiles {
            thumbnail: Some(REFERENCE_THUMBNAIL_PROFILE),
            main: Some(REFERENCE_MAIN_PROFILE),
        };
        self
    }

    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, DetectorError> {
        serde_json::from_str(json).map_err(|e| DetectorError::config("config", e.to_string()))
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// wsi-cellularity - Superpixel cellularity detection for Whole Slide Images.
///
/// Detects tissue on a slide, partitions it into superpixels at the working
/// magnification, scores each by hematoxylin density and reports contiguous
/// regions of equal cellularity as JSON.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-cellularity")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    // =========================================================================
    // Input
    // =========================================================================
    /// Slide file name, relative to the slide directory.
    #[arg(env = "CELL_SLIDE")]
    pub slide: String,

    /// Directory containing slide image files.
    #[arg(long, env = "CELL_SLIDE_DIR")]
    pub slide_dir: PathBuf,

    /// Objective magnification of the slide files' pixels.
    #[arg(long, default_value_t = DEFAULT_NATIVE_MAGNIFICATION, env = "CELL_NATIVE_MAG")]
    pub native_mag: f64,

    /// Longer side of the tissue detection thumbnail, in pixels.
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_SIZE, env = "CELL_THUMBNAIL_SIZE")]
    pub thumbnail_size: u32,

    /// JSON file with detector settings.
    #[arg(long, env = "CELL_CONFIG")]
    pub config: Option<PathBuf>,

    // =========================================================================
    // Detector Overrides
    // =========================================================================
    /// Working magnification.
    #[arg(long, env = "CELL_MAG")]
    pub mag: Option<f64>,

    /// Highest cellularity bin.
    #[arg(long, env = "CELL_MAX_CELLULARITY")]
    pub max_cellularity: Option<u32>,

    /// Gaussian sigma applied before tissue thresholding.
    #[arg(long)]
    pub sigma: Option<f32>,

    /// Minimum tissue piece size in thumbnail pixels.
    #[arg(long)]
    pub min_size: Option<u32>,

    /// Number of Otsu thresholding rounds.
    #[arg(long)]
    pub n_thresholding_steps: Option<u32>,

    /// Threshold inverted luminance instead of hematoxylin density.
    #[arg(long, default_value_t = false)]
    pub no_deconvolve: bool,

    /// Superpixel area at native magnification, in pixels.
    #[arg(long)]
    pub spixel_area: Option<f64>,

    /// SLIC compactness.
    #[arg(long)]
    pub compactness: Option<f64>,

    /// Number of salient regions of interest to report.
    #[arg(long)]
    pub topk: Option<usize>,

    /// Zoom-out factor for salient region boxes.
    #[arg(long)]
    pub zoomout: Option<f64>,

    /// Prefix for log output and labels.
    #[arg(long, env = "CELL_LABEL_PREFIX")]
    pub label_prefix: Option<String>,

    /// Normalize colors toward the built-in H&E reference statistics.
    #[arg(long, default_value_t = false)]
    pub reference_normalization: bool,

    /// Do not log non-fatal warnings.
    #[arg(long, default_value_t = false)]
    pub suppress_warnings: bool,

    // =========================================================================
    // Output
    // =========================================================================
    /// Write the JSON result here instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Pretty-print the JSON result.
    #[arg(long, default_value_t = false)]
    pub pretty: bool,

    /// Increase log verbosity (repeat for more).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Build the detector configuration: defaults, then the config file,
    /// then explicit flags.
    pub fn detector_config(&self) -> Result<DetectorConfig, DetectorError> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|e| {
                    DetectorError::config("config", format!("{}: {}", path.display(), e))
                })?;
                DetectorConfig::from_json(&json)?
            }
            None => DetectorConfig::default(),
        };

        if self.reference_normalization {
            config = config.with_reference_normalization();
        }
        if let Some(mag) = self.mag {
            config.mag = mag;
        }
        if let Some(max) = self.max_cellularity {
            config.max_cellularity = max;
        }
        if let Some(sigma) = self.sigma {
            config.tissue.sigma = sigma;
        }
        if let Some(min_size) = self.min_size {
            config.tissue.min_size = min_size;
        }
        if let Some(steps) = self.n_thresholding_steps {
            config.tissue.n_thresholding_steps = steps;
        }
        if self.no_deconvolve {
            config.tissue.deconvolve_first = false;
        }
        if let Some(area) = self.spixel_area {
            config.superpixel.spixel_area_base_mag = area;
        }
        if let Some(compactness) = self.compactness {
            config.superpixel.compactness = compactness;
        }
        if let Some(topk) = self.topk {
            config.topk_salient_rois = topk;
        }
        if let Some(zoomout) = self.zoomout {
            config.zoomout = zoomout;
        }
        if let Some(prefix) = &self.label_prefix {
            config.label_prefix = prefix.clone();
        }
        if self.suppress_warnings {
            config.suppress_warnings = true;
        }
        if self.verbose > 0 {
            config.verbose = self.verbose.min(MAX_VERBOSE);
        }

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Tests
// =============================================================================
