//! Detection runs.
//!
//! [`CellularityDetector`] binds a slide source, a slide id and a
//! [`DetectorConfig`]. [`run`](CellularityDetector::run) drives the whole
//! chain; callers wanting to inspect intermediates can drive the typestate
//! stages themselves:
//!
//! ```ignore
//! use wsi_cellularity::{CellularityDetector, DetectorConfig, LocalSlideSource};
//!
//! let source = LocalSlideSource::new("/data/slides");
//! let detector = CellularityDetector::new(source, "case-042.png", DetectorConfig::default());
//!
//! let masked = detector.configure().await?.build_mask().await?;
//! println!("{} tissue pieces", masked.tissue().pieces.len());
//! let detection = masked.segment().await?.score()?.aggregate().finish().into_detection();
//! ```
//!
//! Every run recomputes everything from the slide source; nothing is cached
//! between runs. For fixed source data and configuration the resulting
//! [`Detection`] is identical from run to run.

mod fetch;
mod stages;

use std::fmt;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info_span, Instrument};

use crate::aggregate::ContiguousRegion;
use crate::color::{NormalizationProfile, NormalizationScope};
use crate::config::DetectorConfig;
use crate::error::DetectorError;
use crate::geometry::{GridPoint, Polygon};
use crate::salient::SalientRoi;
use crate::score::ScoredSuperpixel;
use crate::slide::SlideSource;
use crate::tissue::TissuePiece;

pub use fetch::WorkingGrid;
pub use stages::{Aggregated, Configured, Done, MaskBuilt, Scored, Segmented};

// =============================================================================
// Detector
// =============================================================================

/// Superpixel cellularity detector for one slide.
pub struct CellularityDetector<S> {
    source: S,
    slide_id: String,
    config: DetectorConfig,
}

impl<S: SlideSource> CellularityDetector<S> {
    pub fn new(source: S, slide_id: impl Into<String>, config: DetectorConfig) -> Self {
        Self {
            source,
            slide_id: slide_id.into(),
            config,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn slide_id(&self) -> &str {
        &self.slide_id
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Set the color normalization target for `scope`.
    ///
    /// Replaces any profile previously set for the same scope.
    pub fn set_color_normalization_values(
        &mut self,
        mu: [f64; 3],
        sigma: [f64; 3],
        scope: NormalizationScope,
    ) -> Result<(), DetectorError> {
        let profile = NormalizationProfile::new(mu, sigma);
        profile.validate()?;
        self.config.normalization.set(scope, profile);
        Ok(())
    }

    /// Validate the configuration and resolve the slide: the first stage.
    pub async fn configure(&self) -> Result<Configured<'_, S>, DetectorError> {
        Configured::resolve(&self.source, &self.slide_id, &self.config).await
    }

    /// Run the full detection.
    ///
    /// Any error aborts the run; no partial result is returned.
    pub async fn run(&self) -> Result<Detection, DetectorError> {
        let span = info_span!(
            "detect",
            prefix = %self.config.label_prefix,
            slide = %self.slide_id
        );
        self.run_stages().instrument(span).await
    }

    async fn run_stages(&self) -> Result<Detection, DetectorError> {
        let started = Instant::now();
        let detection = self
            .configure()
            .await?
            .build_mask()
            .await?
            .segment()
            .await?
            .score()?
            .aggregate()
            .finish()
            .into_detection();
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Run finished");
        Ok(detection)
    }
}

// =============================================================================
// Results
// =============================================================================

/// Non-fatal conditions met during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// Images of this scope were left unnormalized
    NormalizationProfileMissing { scope: NormalizationScope },

    /// A tissue piece covered no working-magnification pixel and was skipped
    EmptyPiece { piece: u32 },
}

impl fmt::Display for RunWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunWarning::NormalizationProfileMissing { scope } => {
                write!(f, "no color normalization profile for {} images", scope)
            }
            RunWarning::EmptyPiece { piece } => {
                write!(f, "tissue piece {} is empty at working magnification", piece)
            }
        }
    }
}

/// Outline of one tissue piece in slide coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TissueBoundary {
    pub piece: u32,
    pub polygons: Vec<Polygon>,
}

/// Region ids of one tissue piece on the working grid, run-length encoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionLabelRaster {
    pub piece: u32,

    /// Working-grid position of the top-left pixel
    pub origin: GridPoint,

    pub width: u32,
    pub height: u32,

    /// `(region id, run length)` in raster order; id 0 is outside the piece
    pub runs: Vec<(u32, u32)>,
}

impl RegionLabelRaster {
    pub fn from_labels(
        piece: u32,
        origin: GridPoint,
        width: u32,
        height: u32,
        labels: impl IntoIterator<Item = u32>,
    ) -> Self {
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for label in labels {
            match runs.last_mut() {
                Some((last, count)) if *last == label => *count += 1,
                _ => runs.push((label, 1)),
            }
        }
        Self {
            piece,
            origin,
            width,
            height,
            runs,
        }
    }

    /// Expand to one region id per pixel.
    pub fn to_dense(&self) -> Vec<u32> {
        self.runs
            .iter()
            .flat_map(|&(label, count)| std::iter::repeat(label).take(count as usize))
            .collect()
    }
}

/// Intermediate results kept for visualization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Artifacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tissue_boundaries: Option<Vec<TissueBoundary>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub superpixels: Option<Vec<ScoredSuperpixel>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_labels: Option<Vec<RegionLabelRaster>>,
}

/// Result of a detection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub slide_id: String,
    pub label_prefix: String,

    /// Working magnification
    pub magnification: f64,

    /// Magnification of slide level 0
    pub native_magnification: f64,

    pub tissue_pieces: Vec<TissuePiece>,

    /// Contiguous regions, ordered by id
    pub regions: Vec<ContiguousRegion>,

    pub salient_rois: Vec<SalientRoi>,
    pub warnings: Vec<RunWarning>,
    pub artifacts: Artifacts,
}
