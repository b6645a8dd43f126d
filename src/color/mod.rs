//! Color-space transforms used by the detector.
//!
//! - [`lab`]: Ruderman lαβ space, where stain appearance is standardized
//! - [`cielab`]: CIELAB, the perceptual space superpixels cluster in
//! - [`stain`]: H&E color deconvolution into stain densities
//! - [`normalize`]: Reinhard mean/std color normalization per scope
//!
//! Transforms work on `n × 3` pixel matrices (one row per pixel, raster
//! order) built from 8-bit RGB rasters, values 0 to 255.

pub mod cielab;
pub mod lab;
pub mod normalize;
pub mod stain;

use image::{Rgb, RgbImage};
use ndarray::{arr2, Array2, ArrayView2};

pub use cielab::srgb_to_cielab;
pub use lab::{lab_to_rgb, rgb_to_lab};
pub use normalize::{
    ColorNormalizer, NormalizationProfile, NormalizationProfiles, NormalizationScope,
};
pub use stain::{StainMatrix, SDA_MAX};

/// Row-major 3×3 color transform.
pub type Mat3 = [[f64; 3]; 3];

/// The pixels of `image` as an `n × 3` matrix.
pub fn pixel_matrix(image: &RgbImage) -> Array2<f64> {
    let n = image.width() as usize * image.height() as usize;
    let raw = image.as_raw();
    Array2::from_shape_fn((n, 3), |(i, c)| f64::from(raw[i * 3 + c]))
}

/// Rebuild an image from an `n × 3` matrix, rounding and clamping to 8 bits.
pub fn matrix_to_image(pixels: ArrayView2<'_, f64>, width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let row = pixels.row(y as usize * width as usize + x as usize);
        Rgb([0, 1, 2].map(|c| row[c].round().clamp(0.0, 255.0) as u8))
    })
}

/// Apply `m` to every row of an `n × 3` matrix.
pub fn transform_rows(pixels: &Array2<f64>, m: &Mat3) -> Array2<f64> {
    pixels.dot(&arr2(m).t())
}
