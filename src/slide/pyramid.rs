//! In-memory slide pyramid.
//!
//! A decoded level-0 raster plus successively downsampled copies (factor 4
//! per level, like most scanner pyramids). Serves thumbnails and arbitrary
//! regions at any magnification by reading the best level and resizing.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::error::SourceError;
use crate::geometry::SlideRect;

use super::decode::resize_exact;
use super::{best_level, LevelInfo, SlideReference};

/// Downsample factor between consecutive levels.
const LEVEL_FACTOR: u32 = 4;

/// Levels stop once the longer side would drop below this.
const MIN_LEVEL_SIDE: u32 = 256;

/// Fill for region parts outside the slide (glass).
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// A multi-resolution slide held in memory.
#[derive(Debug, Clone)]
pub struct SlidePyramid {
    magnification: f64,
    levels: Vec<RgbImage>,
    info: Vec<LevelInfo>,
}

impl SlidePyramid {
    /// Build a pyramid from a level-0 raster scanned at `magnification`.
    pub fn from_image(level0: RgbImage, magnification: f64) -> Self {
        let (width, height) = level0.dimensions();
        let mut levels = vec![level0];
        let mut info = vec![LevelInfo {
            width,
            height,
            downsample: 1.0,
        }];

        let mut factor = LEVEL_FACTOR;
        while width.max(height) / factor >= MIN_LEVEL_SIDE {
            let w = (width / factor).max(1);
            let h = (height / factor).max(1);
            let previous = &levels[levels.len() - 1];
            levels.push(imageops::resize(previous, w, h, FilterType::Triangle));
            info.push(LevelInfo {
                width: w,
                height: h,
                downsample: width as f64 / w as f64,
            });
            factor *= LEVEL_FACTOR;
        }

        Self {
            magnification,
            levels,
            info,
        }
    }

    pub fn magnification(&self) -> f64 {
        self.magnification
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.info[0].width, self.info[0].height)
    }

    pub fn levels(&self) -> &[LevelInfo] {
        &self.info
    }

    pub fn reference(&self, slide_id: &str) -> SlideReference {
        let (width, height) = self.dimensions();
        SlideReference {
            slide_id: slide_id.to_string(),
            magnification: self.magnification,
            width: width as u64,
            height: height as u64,
            levels: self.info.clone(),
        }
    }

    /// Whole-slide image whose longer side is at most `max_side`.
    pub fn thumbnail(&self, max_side: u32) -> RgbImage {
        let (width, height) = self.dimensions();
        let downsample = (width.max(height) as f64 / max_side.max(1) as f64).max(1.0);
        let tw = ((width as f64 / downsample).round() as u32).max(1);
        let th = ((height as f64 / downsample).round() as u32).max(1);
        let level = best_level(&self.info, downsample);
        resize_exact(self.levels[level].clone(), tw, th)
    }

    /// Render `region` (level-0 coordinates) at `magnification`.
    pub fn region(&self, region: SlideRect, magnification: f64) -> Result<RgbImage, SourceError> {
        let (width, height) = self.dimensions();
        let (sw, sh) = (width as f64, height as f64);
        let invalid = || SourceError::InvalidRegion {
            x: region.x.max(0.0) as u64,
            y: region.y.max(0.0) as u64,
            width: region.width.max(0.0) as u64,
            height: region.height.max(0.0) as u64,
            slide_width: width as u64,
            slide_height: height as u64,
        };
        if !(magnification > 0.0)
            || region.width <= 0.0
            || region.height <= 0.0
            || region.x >= sw
            || region.y >= sh
            || region.x + region.width <= 0.0
            || region.y + region.height <= 0.0
        {
            return Err(invalid());
        }

        let downsample = self.magnification / magnification;
        let out_w = ((region.width / downsample).round() as u32).max(1);
        let out_h = ((region.height / downsample).round() as u32).max(1);

        // In-slide part of the region, level 0
        let ix0 = region.x.max(0.0);
        let iy0 = region.y.max(0.0);
        let ix1 = (region.x + region.width).min(sw);
        let iy1 = (region.y + region.height).min(sh);

        // Where that part lands in the output
        let ox0 = (((ix0 - region.x) / downsample).round() as u32).min(out_w);
        let oy0 = (((iy0 - region.y) / downsample).round() as u32).min(out_h);
        let ox1 = (((ix1 - region.x) / downsample).round() as u32).min(out_w);
        let oy1 = (((iy1 - region.y) / downsample).round() as u32).min(out_h);

        let mut out = RgbImage::from_pixel(out_w, out_h, BACKGROUND);
        if ox1 <= ox0 || oy1 <= oy0 {
            return Ok(out);
        }

        let level = best_level(&self.info, downsample);
        let info = self.info[level];
        let source = &self.levels[level];
        let lx0 = ((ix0 / info.downsample).floor() as u32).min(info.width - 1);
        let ly0 = ((iy0 / info.downsample).floor() as u32).min(info.height - 1);
        let lx1 = ((ix1 / info.downsample).ceil() as u32).clamp(lx0 + 1, info.width);
        let ly1 = ((iy1 / info.downsample).ceil() as u32).clamp(ly0 + 1, info.height);

        let crop = imageops::crop_imm(source, lx0, ly0, lx1 - lx0, ly1 - ly0).to_image();
        let scaled = resize_exact(crop, ox1 - ox0, oy1 - oy0);
        imageops::replace(&mut out, &scaled, ox0 as i64, oy0 as i64);
        Ok(out)
    }
}
