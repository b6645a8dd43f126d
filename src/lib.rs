//! # WSI Cellularity
//!
//! Unsupervised, superpixel-based cellularity detection for Whole Slide
//! Images (WSI) stained with hematoxylin and eosin.
//!
//! Given a slide, the detector finds the tissue on a low-magnification
//! thumbnail, partitions every tissue piece into superpixels at a working
//! magnification, scores each superpixel by its hematoxylin density, and
//! merges adjacent superpixels of equal score into contiguous regions.
//!
//! ## Features
//!
//! - **Reinhard color normalization**: separate reference profiles for the
//!   thumbnail and the working-magnification images
//! - **Iterative Otsu tissue detection**: optional refinement rounds and
//!   small-piece removal
//! - **Masked SLIC superpixels**: constant physical size across scan
//!   resolutions, pixel-exact outlines
//! - **Contiguous regions**: exact polygon unions with holes, plus the most
//!   cellular regions as salient regions of interest
//!
//! ## Architecture
//!
//! - [`slide`] - Slide source trait, local image-file source, decoding
//! - [`color`] - Color spaces, stain deconvolution, normalization
//! - [`tissue`] - Tissue mask on the thumbnail
//! - [`segment`] - Superpixel segmentation of tissue pieces
//! - [`score`] - Cellularity statistic and bins
//! - [`aggregate`] - Contiguous regions of equal bin
//! - [`salient`] - Salient regions of interest
//! - [`pipeline`] - The detector and its typestate stages
//! - [`config`] - Detector configuration and CLI
//! - [`geometry`] - Lattice outlines and slide-space shapes
//!
//! ## Example
//!
//! ```rust,no_run
//! use wsi_cellularity::{CellularityDetector, DetectorConfig, LocalSlideSource, NormalizationScope};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = LocalSlideSource::new("/data/slides").with_magnification(20.0);
//!     let mut detector = CellularityDetector::new(source, "case-042.png", DetectorConfig::default());
//!     detector.set_color_normalization_values(
//!         [8.74108109, -0.12440419, 0.0444982],
//!         [0.6135447, 0.10989545, 0.0286032],
//!         NormalizationScope::Main,
//!     )?;
//!
//!     let detection = detector.run().await?;
//!     println!("{} regions", detection.regions.len());
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod color;
pub mod config;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod salient;
pub mod score;
pub mod segment;
pub mod slide;
pub mod tissue;

// Re-export commonly used types
pub use aggregate::{Adjacency, ContiguousRegion, RegionAggregator};
pub use color::{ColorNormalizer, NormalizationProfile, NormalizationProfiles, NormalizationScope};
pub use config::{Cli, DetectorConfig};
pub use error::{DetectorError, PipelineStage, SourceError};
pub use geometry::{GridPoint, GridShape, Polygon, SlidePoint, SlideRect};
pub use pipeline::{
    Artifacts, CellularityDetector, Detection, RegionLabelRaster, RunWarning, TissueBoundary,
};
pub use salient::{select_salient_rois, SalientRoi};
pub use score::{CellularityBin, CellularityScorer, ScoredSuperpixel};
pub use segment::{PieceRaster, Superpixel, SuperpixelParams, SuperpixelSegmenter};
pub use slide::{LevelInfo, LocalSlideSource, SlidePyramid, SlideReference, SlideSource};
pub use tissue::{TissueMask, TissueMaskBuilder, TissueMaskParams, TissuePiece};
