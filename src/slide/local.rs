//! Slide source backed by image files in a local directory.
//!
//! Each slide is a single PNG or JPEG file whose pixels are level 0. The file
//! is decoded once into a [`SlidePyramid`] and kept in an LRU cache, so a run
//! fetching many regions of the same slide only pays for decoding once.
//!
//! # Example
//!
//! ```ignore
//! use wsi_cellularity::slide::{LocalSlideSource, SlideSource};
//!
//! let source = LocalSlideSource::new("/data/slides").with_magnification(20.0);
//! let reference = source.slide_reference("case-042.png").await?;
//! ```

use std::num::NonZeroUsize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SourceError;
use crate::geometry::SlideRect;

use super::decode::{decode_rgb, encode_png};
use super::pyramid::SlidePyramid;
use super::{SlideReference, SlideSource};

/// Magnification assumed for level 0 of local files.
pub const DEFAULT_NATIVE_MAGNIFICATION: f64 = 40.0;

/// Longer side of served thumbnails, in pixels.
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 1024;

/// Number of decoded slides kept in memory.
const DEFAULT_SLIDE_CACHE_CAPACITY: usize = 4;

/// Serves slides stored as image files under a root directory.
pub struct LocalSlideSource {
    root: PathBuf,
    magnification: f64,
    thumbnail_size: u32,
    cache: Mutex<LruCache<String, Arc<SlidePyramid>>>,
}

impl LocalSlideSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            magnification: DEFAULT_NATIVE_MAGNIFICATION,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_SLIDE_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Set the magnification reported for level 0.
    pub fn with_magnification(mut self, magnification: f64) -> Self {
        self.magnification = magnification;
        self
    }

    /// Set the longer side of served thumbnails.
    pub fn with_thumbnail_size(mut self, size: u32) -> Self {
        self.thumbnail_size = size.max(1);
        self
    }

    /// Set how many decoded slides are kept in memory.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = Mutex::new(LruCache::new(
            NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
        ));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of slides currently decoded in memory.
    pub async fn cached_count(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Resolve a slide id to a file below the root.
    ///
    /// Absolute ids and ids with `..` components are rejected.
    fn resolve(&self, slide_id: &str) -> Result<PathBuf, SourceError> {
        let relative = Path::new(slide_id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if slide_id.is_empty() || escapes {
            return Err(SourceError::NotFound(slide_id.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Get the decoded pyramid of a slide, loading it on a cache miss.
    async fn pyramid(&self, slide_id: &str) -> Result<Arc<SlidePyramid>, SourceError> {
        {
            let mut cache = self.cache.lock().await;
            if let Some(pyramid) = cache.get(slide_id) {
                return Ok(pyramid.clone());
            }
        }

        let path = self.resolve(slide_id)?;
        let data = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SourceError::NotFound(slide_id.to_string()),
            _ => SourceError::Connection(format!("{}: {}", path.display(), e)),
        })?;

        let magnification = self.magnification;
        let pyramid = tokio::task::spawn_blocking(move || {
            decode_rgb(&data).map(|img| SlidePyramid::from_image(img, magnification))
        })
        .await
        .map_err(|e| SourceError::Decode {
            message: e.to_string(),
        })??;
        debug!(
            slide_id,
            levels = pyramid.levels().len(),
            "Decoded slide into pyramid"
        );

        let pyramid = Arc::new(pyramid);
        let mut cache = self.cache.lock().await;
        cache.put(slide_id.to_string(), pyramid.clone());
        Ok(pyramid)
    }
}

#[async_trait]
impl SlideSource for LocalSlideSource {
    async fn slide_reference(&self, slide_id: &str) -> Result<SlideReference, SourceError> {
        Ok(self.pyramid(slide_id).await?.reference(slide_id))
    }

    async fn fetch_thumbnail(&self, slide_id: &str) -> Result<Bytes, SourceError> {
        let pyramid = self.pyramid(slide_id).await?;
        encode_png(&pyramid.thumbnail(self.thumbnail_size))
    }

    async fn fetch_region(
        &self,
        slide_id: &str,
        region: SlideRect,
        magnification: f64,
    ) -> Result<Bytes, SourceError> {
        let pyramid = self.pyramid(slide_id).await?;
        encode_png(&pyramid.region(region, magnification)?)
    }
}
