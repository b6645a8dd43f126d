//! Slide access layer.
//!
//! The detector never touches slide files directly. Everything it needs goes
//! through a [`SlideSource`]:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          CellularityDetector            │
//! └────────────────────┬────────────────────┘
//!                      │  slide_reference / fetch_thumbnail / fetch_region
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           SlideSource Trait             │
//! │   (encoded RGB images, level-0 coords)  │
//! └────────────────────┬────────────────────┘
//!                      │
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//! ┌─────────────────┐    ┌─────────────────────┐
//! │LocalSlideSource │    │  your own source    │
//! │ (image files)   │    │  (e.g. tile server) │
//! └─────────────────┘    └─────────────────────┘
//! ```
//!
//! Sources return encoded image bytes (PNG, JPEG); [`decode`] turns them
//! into RGB rasters. Regions are always requested in level-0 slide
//! coordinates plus the magnification to render them at.

pub mod decode;
mod local;
mod pyramid;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::error::SourceError;
use crate::geometry::SlideRect;

pub use decode::{decode_rgb, encode_png, resize_exact};
pub use local::{LocalSlideSource, DEFAULT_NATIVE_MAGNIFICATION, DEFAULT_THUMBNAIL_SIZE};
pub use pyramid::SlidePyramid;

// =============================================================================
// Slide Reference
// =============================================================================

/// Information about a single pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelInfo {
    /// Width of this level in pixels
    pub width: u32,

    /// Height of this level in pixels
    pub height: u32,

    /// Downsample factor relative to level 0
    pub downsample: f64,
}

/// Metadata of a slide, resolved once before a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlideReference {
    pub slide_id: String,

    /// Objective magnification of level 0 (e.g. 20 or 40)
    pub magnification: f64,

    /// Level-0 width in pixels
    pub width: u64,

    /// Level-0 height in pixels
    pub height: u64,

    /// Pyramid levels, finest first
    pub levels: Vec<LevelInfo>,
}

impl SlideReference {
    /// Level-0 dimensions as `(width, height)`.
    pub fn dimensions(&self) -> (u64, u64) {
        (self.width, self.height)
    }

    /// Level-0 pixels per output pixel when rendering at `magnification`.
    pub fn downsample_for(&self, magnification: f64) -> f64 {
        self.magnification / magnification
    }

    /// Find the best level to read for a given downsample factor.
    ///
    /// Returns the coarsest level that is still at least as fine as
    /// requested, so reads only ever shrink. Falls back to level 0.
    pub fn best_level_for_downsample(&self, downsample: f64) -> usize {
        best_level(&self.levels, downsample)
    }
}

pub(crate) fn best_level(levels: &[LevelInfo], downsample: f64) -> usize {
    levels
        .iter()
        .enumerate()
        .filter(|(_, l)| l.downsample <= downsample + 1e-9)
        .max_by(|a, b| a.1.downsample.total_cmp(&b.1.downsample))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

// =============================================================================
// SlideSource Trait
// =============================================================================

/// Provider of slide metadata and pixels.
///
/// Implementations may be slow (network, disk); the detector awaits each call
/// before continuing.
#[async_trait]
pub trait SlideSource: Send + Sync {
    /// Resolve metadata for a slide.
    async fn slide_reference(&self, slide_id: &str) -> Result<SlideReference, SourceError>;

    /// Fetch an encoded low-magnification image of the whole slide.
    ///
    /// The source picks the size; the detector derives the downsample from
    /// the returned width.
    async fn fetch_thumbnail(&self, slide_id: &str) -> Result<Bytes, SourceError>;

    /// Fetch an encoded image of `region` (level-0 coordinates) rendered at
    /// `magnification`.
    ///
    /// The result should be `region.width · magnification / native`
    /// pixels wide; callers resize if it is not. Parts of the region outside
    /// the slide are rendered as background.
    async fn fetch_region(
        &self,
        slide_id: &str,
        region: SlideRect,
        magnification: f64,
    ) -> Result<Bytes, SourceError>;
}

#[async_trait]
impl<T: SlideSource + ?Sized> SlideSource for Arc<T> {
    async fn slide_reference(&self, slide_id: &str) -> Result<SlideReference, SourceError> {
        (**self).slide_reference(slide_id).await
    }

    async fn fetch_thumbnail(&self, slide_id: &str) -> Result<Bytes, SourceError> {
        (**self).fetch_thumbnail(slide_id).await
    }

    async fn fetch_region(
        &self,
        slide_id: &str,
        region: SlideRect,
        magnification: f64,
    ) -> Result<Bytes, SourceError> {
        (**self).fetch_region(slide_id, region, magnification).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> SlideReference {
        SlideReference {
            slide_id: "s".to_string(),
            magnification: 40.0,
            width: 4096,
            height: 2048,
            levels: vec![
                LevelInfo {
                    width: 4096,
                    height: 2048,
                    downsample: 1.0,
                },
                LevelInfo {
                    width: 1024,
                    height: 512,
                    downsample: 4.0,
                },
                LevelInfo {
                    width: 256,
                    height: 128,
                    downsample: 16.0,
                },
            ],
        }
    }

    #[test]
    fn test_best_level_never_upsamples() {
        let r = reference();
        assert_eq!(r.best_level_for_downsample(1.0), 0);
        assert_eq!(r.best_level_for_downsample(3.9), 0);
        assert_eq!(r.best_level_for_downsample(4.0), 1);
        assert_eq!(r.best_level_for_downsample(13.3), 1);
        assert_eq!(r.best_level_for_downsample(100.0), 2);
        assert_eq!(r.best_level_for_downsample(0.5), 0);
    }

    #[test]
    fn test_downsample_for_magnification() {
        let r = reference();
        assert_eq!(r.downsample_for(3.0), 40.0 / 3.0);
        assert_eq!(r.downsample_for(40.0), 1.0);
        assert_eq!(r.dimensions(), (4096, 2048));
    }
}
