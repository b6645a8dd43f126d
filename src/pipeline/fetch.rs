//! Main-image fetching for tissue pieces.
//!
//! A piece's bounds are mapped onto the working grid (one pixel per
//! `downsample` level-0 pixels), split into `tile_size` tiles, fetched from
//! the slide source and stitched into one raster. The piece mask for that
//! raster is sampled from the thumbnail-resolution tissue mask.

use image::{imageops, RgbImage};
use tracing::trace;

use crate::error::SourceError;
use crate::geometry::{PixelBox, SlideRect};
use crate::slide::{decode_rgb, resize_exact, SlideSource};
use crate::tissue::{TissueMask, TissuePiece};

/// The working grid covering a whole slide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkingGrid {
    /// Level-0 pixels per working pixel
    pub downsample: f64,
    pub width: u32,
    pub height: u32,
}

impl WorkingGrid {
    pub fn new(slide_width: u64, slide_height: u64, downsample: f64) -> Self {
        Self {
            downsample,
            width: (slide_width as f64 / downsample).ceil() as u32,
            height: (slide_height as f64 / downsample).ceil() as u32,
        }
    }

    /// Smallest box of working pixels covering `bounds`, clipped to the grid.
    ///
    /// Returns `None` when nothing of `bounds` lies on the grid.
    pub fn cover(&self, bounds: &SlideRect) -> Option<PixelBox> {
        let x0 = (bounds.x / self.downsample).floor().max(0.0) as u32;
        let y0 = (bounds.y / self.downsample).floor().max(0.0) as u32;
        let x1 = (((bounds.x + bounds.width) / self.downsample).ceil().max(0.0) as u32).min(self.width);
        let y1 = (((bounds.y + bounds.height) / self.downsample).ceil().max(0.0) as u32).min(self.height);
        (x1 > x0 && y1 > y0).then_some(PixelBox { x0, y0, x1, y1 })
    }

    /// Level-0 rectangle covered by a box of working pixels.
    pub fn slide_rect(&self, area: &PixelBox) -> SlideRect {
        SlideRect::new(
            area.x0 as f64 * self.downsample,
            area.y0 as f64 * self.downsample,
            area.width() as f64 * self.downsample,
            area.height() as f64 * self.downsample,
        )
    }
}

/// Piece membership of every working pixel in `area`, sampled at pixel
/// centers.
pub fn piece_mask(tissue: &TissueMask, piece: &TissuePiece, grid: &WorkingGrid, area: &PixelBox) -> Vec<bool> {
    let mut mask = Vec::with_capacity((area.width() * area.height()) as usize);
    for gy in area.y0..area.y1 {
        let sy = (gy as f64 + 0.5) * grid.downsample;
        for gx in area.x0..area.x1 {
            let sx = (gx as f64 + 0.5) * grid.downsample;
            mask.push(tissue.label_at_slide(sx, sy) == piece.label);
        }
    }
    mask
}

/// Tiles of at most `tile_size` working pixels covering `area`, row by row.
pub fn tiles(area: &PixelBox, tile_size: u32) -> Vec<PixelBox> {
    let step = tile_size.max(1);
    let mut tiles = Vec::new();
    let mut y0 = area.y0;
    while y0 < area.y1 {
        let y1 = (y0 + step).min(area.y1);
        let mut x0 = area.x0;
        while x0 < area.x1 {
            let x1 = (x0 + step).min(area.x1);
            tiles.push(PixelBox { x0, y0, x1, y1 });
            x0 = x1;
        }
        y0 = y1;
    }
    tiles
}

/// Fetch the working-magnification image of `area`.
///
/// Tiles whose decoded size differs from the request are resized to fit.
pub async fn fetch_area<S: SlideSource + ?Sized>(
    source: &S,
    slide_id: &str,
    grid: &WorkingGrid,
    magnification: f64,
    area: &PixelBox,
    tile_size: u32,
) -> Result<RgbImage, SourceError> {
    let mut canvas = RgbImage::new(area.width(), area.height());
    for tile in tiles(area, tile_size) {
        let rect = grid.slide_rect(&tile);
        let bytes = source.fetch_region(slide_id, rect, magnification).await?;
        let decoded = decode_rgb(&bytes)?;
        let fetched = decoded.dimensions();
        let image = resize_exact(decoded, tile.width(), tile.height());
        trace!(
            x = tile.x0,
            y = tile.y0,
            width = tile.width(),
            height = tile.height(),
            fetched_width = fetched.0,
            fetched_height = fetched.1,
            "Fetched main-image tile"
        );
        imageops::replace(
            &mut canvas,
            &image,
            (tile.x0 - area.x0) as i64,
            (tile.y0 - area.y0) as i64,
        );
    }
    Ok(canvas)
}
