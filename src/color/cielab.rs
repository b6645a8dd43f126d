//! sRGB to CIELAB (D65) conversion.
//!
//! Superpixel clustering measures color distance in CIELAB because Euclidean
//! distances there roughly track perceived differences.

use image::RgbImage;
use ndarray::{Array2, Zip};

use super::{pixel_matrix, transform_rows, Mat3};

const SRGB_TO_XYZ: Mat3 = [
    [0.4124564, 0.3575761, 0.1804375],
    [0.2126729, 0.7151522, 0.0721750],
    [0.0193339, 0.1191920, 0.9503041],
];

/// D65 reference white.
const WHITE: [f64; 3] = [0.95047, 1.0, 1.08883];

const DELTA: f64 = 6.0 / 29.0;

#[inline]
fn linearize(channel: f64) -> f64 {
    let c = channel / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
fn lab_f(t: f64) -> f64 {
    if t > DELTA * DELTA * DELTA {
        t.cbrt()
    } else {
        t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
    }
}

/// Convert every pixel of an 8-bit sRGB image to CIELAB `[L, a, b]`.
///
/// Returns an `n × 3` matrix in raster order. L is in 0 to 100; a and b are
/// roughly in -128 to 127.
pub fn srgb_to_cielab(image: &RgbImage) -> Array2<f64> {
    let linear = pixel_matrix(image).mapv(linearize);
    let xyz = transform_rows(&linear, &SRGB_TO_XYZ);

    let mut lab = Array2::zeros(xyz.raw_dim());
    Zip::from(lab.rows_mut())
        .and(xyz.rows())
        .for_each(|mut out, xyz| {
            let fx = lab_f(xyz[0] / WHITE[0]);
            let fy = lab_f(xyz[1] / WHITE[1]);
            let fz = lab_f(xyz[2] / WHITE[2]);
            out[0] = 116.0 * fy - 16.0;
            out[1] = 500.0 * (fx - fy);
            out[2] = 200.0 * (fy - fz);
        });
    lab
}
