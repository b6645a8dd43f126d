use std::fmt;

use thiserror::Error;

/// Errors raised by a slide source when fetching slide data.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Slide does not exist in the source
    #[error("Slide not found: {0}")]
    NotFound(String),

    /// Network, storage or connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Fetched bytes could not be decoded into an RGB raster
    #[error("Failed to decode image: {message}")]
    Decode { message: String },

    /// Failed to encode a raster before handing it out
    #[error("Failed to encode image: {message}")]
    Encode { message: String },

    /// Requested region does not intersect the slide
    #[error("Invalid region: {x},{y} {width}x{height} on a {slide_width}x{slide_height} slide")]
    InvalidRegion {
        x: u64,
        y: u64,
        width: u64,
        height: u64,
        slide_width: u64,
        slide_height: u64,
    },
}

/// Stages of a detection run, used to tag errors with where they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum PipelineStage {
    Configured,
    MaskBuilt,
    Segmented,
    Scored,
    Aggregated,
    Done,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Configured => "configured",
            PipelineStage::MaskBuilt => "mask-built",
            PipelineStage::Segmented => "segmented",
            PipelineStage::Scored => "scored",
            PipelineStage::Aggregated => "aggregated",
            PipelineStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Errors that abort a cellularity detection run.
#[derive(Debug, Clone, Error)]
pub enum DetectorError {
    /// A configuration parameter is invalid (reported before any fetch)
    #[error("Invalid configuration for `{parameter}`: {message}")]
    Configuration {
        parameter: &'static str,
        message: String,
    },

    /// Thresholding left no tissue in the thumbnail
    #[error(
        "No tissue detected (n_thresholding_steps={n_thresholding_steps}, sigma={sigma}, min_size={min_size})"
    )]
    EmptyTissue {
        n_thresholding_steps: u32,
        sigma: f32,
        min_size: u32,
    },

    /// Superpixel generation produced degenerate output
    #[error("Segmentation failed for tissue piece {piece}: {message}")]
    Segmentation { piece: u32, message: String },

    /// The slide source failed while the pipeline was in `stage`
    #[error("Slide source error during {stage}: {source}")]
    Source {
        stage: PipelineStage,
        #[source]
        source: SourceError,
    },
}

impl DetectorError {
    /// Shorthand for a configuration error.
    pub fn config(parameter: &'static str, message: impl Into<String>) -> Self {
        DetectorError::Configuration {
            parameter,
            message: message.into(),
        }
    }

    /// Wrap a source error with the stage it happened in.
    pub fn fetch(stage: PipelineStage, source: SourceError) -> Self {
        DetectorError::Source { stage, source }
    }

    /// Whether retrying the same run could succeed.
    ///
    /// Only transient source failures qualify; everything else is a pure
    /// function of the inputs and would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DetectorError::Source {
                source: SourceError::Connection(_),
                ..
            }
        )
    }
}
