//! Tissue detection on the low-magnification thumbnail.
//!
//! The thumbnail is reduced to a single "stain signal" (hematoxylin density
//! or inverted luminance), smoothed, and split into tissue and glass with
//! Otsu's method. Thresholding can be repeated inside the foreground to
//! peel off faintly stained areas. Connected pieces smaller than `min_size`
//! pixels are discarded; what remains is labeled piece by piece.
//!
//! # Example
//!
//! ```ignore
//! use wsi_cellularity::tissue::{TissueMaskBuilder, TissueMaskParams};
//!
//! let mask = TissueMaskBuilder::new(TissueMaskParams::default())
//!     .build(&thumbnail, 32.0)?;
//! println!("{} tissue pieces", mask.pieces.len());
//! ```

pub mod components;
pub mod threshold;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::color::StainMatrix;
use crate::error::DetectorError;
use crate::geometry::{trace_labeled_shapes, GridPoint, PixelBox, Polygon, SlideRect};

pub use components::{label_components, Component, Labeling, UnionFind};
pub use threshold::{gaussian_smooth, otsu_threshold};

// =============================================================================
// Parameters
// =============================================================================

/// Default Gaussian smoothing sigma, in thumbnail pixels.
pub const DEFAULT_SIGMA: f32 = 2.0;

/// Default minimum tissue piece size, in thumbnail pixels.
pub const DEFAULT_MIN_SIZE: u32 = 500;

/// Parameters controlling tissue detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TissueMaskParams {
    /// Threshold hematoxylin density instead of inverted luminance
    pub deconvolve_first: bool,

    /// Otsu rounds; each round after the first re-thresholds the foreground
    pub n_thresholding_steps: u32,

    /// Gaussian smoothing sigma before thresholding
    pub sigma: f32,

    /// Pieces with fewer pixels than this are dropped
    pub min_size: u32,
}

impl Default for TissueMaskParams {
    fn default() -> Self {
        Self {
            deconvolve_first: true,
            n_thresholding_steps: 1,
            sigma: DEFAULT_SIGMA,
            min_size: DEFAULT_MIN_SIZE,
        }
    }
}

impl TissueMaskParams {
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.n_thresholding_steps == 0 {
            return Err(DetectorError::config(
                "tissue.n_thresholding_steps",
                "must be at least 1",
            ));
        }
        if !self.sigma.is_finite() || self.sigma <= 0.0 {
            return Err(DetectorError::config(
                "tissue.sigma",
                format!("must be a positive number, got {}", self.sigma),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tissue Mask
// =============================================================================

/// A retained connected piece of tissue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TissuePiece {
    /// Label of the piece in [`TissueMask::labels`]
    pub label: u32,

    /// Pixel count on the thumbnail
    pub pixel_count: u32,

    /// Bounds on the thumbnail
    pub bbox: PixelBox,

    /// Bounds in level-0 slide coordinates
    pub slide_bounds: SlideRect,
}

/// Labeled tissue raster aligned with the thumbnail.
#[derive(Debug, Clone)]
pub struct TissueMask {
    pub width: u32,
    pub height: u32,

    /// Piece label per thumbnail pixel, 0 for background
    pub labels: Vec<u32>,

    /// Level-0 pixels per thumbnail pixel along x
    pub downsample_x: f64,

    /// Level-0 pixels per thumbnail pixel along y
    pub downsample_y: f64,

    /// Retained pieces, ordered by label
    pub pieces: Vec<TissuePiece>,
}

impl TissueMask {
    /// Piece label at thumbnail pixel `(x, y)`; 0 outside the raster.
    pub fn label_at(&self, x: u32, y: u32) -> u32 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.labels[(y * self.width + x) as usize]
    }

    pub fn is_tissue(&self, x: u32, y: u32) -> bool {
        self.label_at(x, y) != 0
    }

    /// Number of tissue pixels.
    pub fn area(&self) -> u64 {
        self.labels.iter().filter(|&&l| l != 0).count() as u64
    }

    /// Piece label at a level-0 slide coordinate (nearest thumbnail pixel).
    pub fn label_at_slide(&self, x: f64, y: f64) -> u32 {
        if x < 0.0 || y < 0.0 {
            return 0;
        }
        let tx = (x / self.downsample_x).floor();
        let ty = (y / self.downsample_y).floor();
        if tx >= self.width as f64 || ty >= self.height as f64 {
            return 0;
        }
        self.label_at(tx as u32, ty as u32)
    }

    /// Tissue outlines per piece in slide coordinates.
    pub fn boundaries(&self) -> Vec<(u32, Vec<Polygon>)> {
        trace_labeled_shapes(&self.labels, self.width, self.height, GridPoint::new(0, 0))
            .into_iter()
            .map(|(label, shapes)| {
                let polygons = shapes
                    .iter()
                    .map(|s| s.to_slide_scaled(self.downsample_x, self.downsample_y))
                    .collect();
                (label, polygons)
            })
            .collect()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builds a [`TissueMask`] from a thumbnail.
#[derive(Debug, Clone)]
pub struct TissueMaskBuilder {
    params: TissueMaskParams,
    stains: StainMatrix,
}

impl TissueMaskBuilder {
    pub fn new(params: TissueMaskParams) -> Self {
        Self {
            params,
            stains: StainMatrix::hematoxylin_eosin(),
        }
    }

    pub fn params(&self) -> &TissueMaskParams {
        &self.params
    }

    /// Detect tissue on `thumbnail`, whose pixels span `downsample` level-0
    /// pixels along both axes.
    pub fn build(&self, thumbnail: &RgbImage, downsample: f64) -> Result<TissueMask, DetectorError> {
        self.build_scaled(thumbnail, downsample, downsample)
    }

    /// Like [`build`](Self::build) with separate x and y scales, for
    /// thumbnails whose sides were rounded independently.
    pub fn build_scaled(
        &self,
        thumbnail: &RgbImage,
        downsample_x: f64,
        downsample_y: f64,
    ) -> Result<TissueMask, DetectorError> {
        self.params.validate()?;
        let (width, height) = thumbnail.dimensions();

        let signal = self.signal(thumbnail);
        let smoothed = gaussian_smooth(&signal, width, height, self.params.sigma);
        let foreground = self.threshold(&smoothed);

        let keys: Vec<u32> = foreground.iter().map(|&f| f as u32).collect();
        let labeling = label_components(&keys, width, height, 0);
        let found = labeling.components.len();
        let labeling = labeling.retain_min_size(self.params.min_size);
        debug!(
            found,
            retained = labeling.components.len(),
            min_size = self.params.min_size,
            "Labeled tissue pieces"
        );

        if labeling.is_empty() {
            return Err(DetectorError::EmptyTissue {
                n_thresholding_steps: self.params.n_thresholding_steps,
                sigma: self.params.sigma,
                min_size: self.params.min_size,
            });
        }

        let pieces = labeling
            .components
            .iter()
            .map(|c| TissuePiece {
                label: c.label,
                pixel_count: c.pixel_count,
                bbox: c.bbox,
                slide_bounds: SlideRect::new(
                    c.bbox.x0 as f64 * downsample_x,
                    c.bbox.y0 as f64 * downsample_y,
                    c.bbox.width() as f64 * downsample_x,
                    c.bbox.height() as f64 * downsample_y,
                ),
            })
            .collect();

        Ok(TissueMask {
            width,
            height,
            labels: labeling.labels,
            downsample_x,
            downsample_y,
            pieces,
        })
    }

    /// Per-pixel stain signal: high where tissue is dense.
    pub fn signal(&self, image: &RgbImage) -> Vec<f32> {
        if self.params.deconvolve_first {
            self.stains
                .hematoxylin_density(image)
                .iter()
                .map(|&h| h as f32)
                .collect()
        } else {
            image
                .pixels()
                .map(|p| {
                    let [r, g, b] = p.0.map(f32::from);
                    255.0 - (0.299 * r + 0.587 * g + 0.114 * b)
                })
                .collect()
        }
    }

    /// Iterative Otsu thresholding of a smoothed signal.
    ///
    /// Returns the foreground (tissue) mask. Round one splits the whole
    /// signal; later rounds split only the current foreground and keep its
    /// upper class. A round whose population has no contrast ends the loop.
    pub fn threshold(&self, signal: &[f32]) -> Vec<bool> {
        let mut foreground = vec![false; signal.len()];

        let Some(t) = otsu_threshold(signal.iter().copied()) else {
            debug!("Thumbnail signal has no contrast");
            return foreground;
        };
        for (f, &v) in foreground.iter_mut().zip(signal) {
            *f = v > t;
        }
        debug!(round = 1, threshold = t, "Otsu threshold");

        for round in 2..=self.params.n_thresholding_steps {
            let population = signal
                .iter()
                .zip(foreground.iter())
                .filter(|(_, &f)| f)
                .map(|(&v, _)| v);
            let Some(t) = otsu_threshold(population) else {
                debug!(round, "Foreground has no contrast, stopping refinement");
                break;
            };
            for (f, &v) in foreground.iter_mut().zip(signal) {
                *f = *f && v > t;
            }
            debug!(round, threshold = t, "Otsu threshold");
        }
        foreground
    }
}

// =============================================================================
// Tests
// =============================================================================
