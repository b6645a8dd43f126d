//! Test utilities for integration tests.
//!
//! This module provides a mock slide source backed by an in-memory pyramid,
//! with request tracking and failure injection, plus builders for synthetic
//! H&E-like slides.

use async_trait::async_trait;
use bytes::Bytes;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use wsi_cellularity::error::SourceError;
use wsi_cellularity::geometry::SlideRect;
use wsi_cellularity::slide::{encode_png, SlidePyramid, SlideReference, SlideSource};

// =============================================================================
// Colors
// =============================================================================

/// Unstained glass.
pub const GLASS: Rgb<u8> = Rgb([235, 232, 238]);

/// Lightly cellular tissue (hematoxylin density ~38).
pub const LIGHT: Rgb<u8> = Rgb([150, 90, 170]);

/// Densely cellular tissue (hematoxylin density ~54).
pub const DENSE: Rgb<u8> = Rgb([120, 70, 150]);

// =============================================================================
// Mock Slide Source with Request Tracking
// =============================================================================

/// Which call a [`MockSlideSource`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Reference,
    Thumbnail,
    Region,
}

/// A slide source serving one in-memory slide.
pub struct MockSlideSource {
    slide_id: String,
    pyramid: SlidePyramid,
    thumbnail_size: u32,
    fail_at: Option<FailAt>,
    reference_count: AtomicUsize,
    thumbnail_count: AtomicUsize,
    regions: RwLock<Vec<(SlideRect, f64)>>,
}

impl MockSlideSource {
    pub fn new(slide_id: impl Into<String>, level0: RgbImage, magnification: f64) -> Self {
        Self {
            slide_id: slide_id.into(),
            pyramid: SlidePyramid::from_image(level0, magnification),
            thumbnail_size: 256,
            fail_at: None,
            reference_count: AtomicUsize::new(0),
            thumbnail_count: AtomicUsize::new(0),
            regions: RwLock::new(Vec::new()),
        }
    }

    pub fn failing_at(mut self, fail_at: FailAt) -> Self {
        self.fail_at = Some(fail_at);
        self
    }

    pub fn reference_count(&self) -> usize {
        self.reference_count.load(Ordering::SeqCst)
    }

    pub fn thumbnail_count(&self) -> usize {
        self.thumbnail_count.load(Ordering::SeqCst)
    }

    pub async fn region_requests(&self) -> Vec<(SlideRect, f64)> {
        self.regions.read().await.clone()
    }

    fn check(&self, slide_id: &str, at: FailAt) -> Result<(), SourceError> {
        if slide_id != self.slide_id {
            return Err(SourceError::NotFound(slide_id.to_string()));
        }
        if self.fail_at == Some(at) {
            return Err(SourceError::Connection("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SlideSource for MockSlideSource {
    async fn slide_reference(&self, slide_id: &str) -> Result<SlideReference, SourceError> {
        self.reference_count.fetch_add(1, Ordering::SeqCst);
        self.check(slide_id, FailAt::Reference)?;
        Ok(self.pyramid.reference(slide_id))
    }

    async fn fetch_thumbnail(&self, slide_id: &str) -> Result<Bytes, SourceError> {
        self.thumbnail_count.fetch_add(1, Ordering::SeqCst);
        self.check(slide_id, FailAt::Thumbnail)?;
        encode_png(&self.pyramid.thumbnail(self.thumbnail_size))
    }

    async fn fetch_region(
        &self,
        slide_id: &str,
        region: SlideRect,
        magnification: f64,
    ) -> Result<Bytes, SourceError> {
        self.regions.write().await.push((region, magnification));
        self.check(slide_id, FailAt::Region)?;
        encode_png(&self.pyramid.region(region, magnification)?)
    }
}

// =============================================================================
// Synthetic Slides
// =============================================================================

/// 1024×1024 glass slide with a centered 512×512 tissue block whose left
/// half is dense and right half light.
pub fn two_class_slide() -> RgbImage {
    RgbImage::from_fn(1024, 1024, |x, y| {
        if !(256..768).contains(&x) || !(256..768).contains(&y) {
            GLASS
        } else if x < 512 {
            DENSE
        } else {
            LIGHT
        }
    })
}

/// Glass with two separate tissue blocks.
pub fn two_piece_slide() -> RgbImage {
    RgbImage::from_fn(1024, 1024, |x, y| {
        if (128..448).contains(&x) && (128..896).contains(&y) {
            DENSE
        } else if (640..896).contains(&x) && (256..768).contains(&y) {
            LIGHT
        } else {
            GLASS
        }
    })
}

/// A slide with nothing on it.
pub fn blank_slide() -> RgbImage {
    RgbImage::from_pixel(1024, 1024, GLASS)
}

/// `cells × cells` grid of `cell`-pixel squares colored by `class(col, row)`.
pub fn cell_grid(cells: u32, cell: u32, class: impl Fn(u32, u32) -> Rgb<u8>) -> RgbImage {
    RgbImage::from_fn(cells * cell, cells * cell, |x, y| class(x / cell, y / cell))
}
