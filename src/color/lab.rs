//! Ruderman lαβ color space.
//!
//! RGB is mapped to LMS cone space, log-compressed, then decorrelated into
//! one achromatic (l) and two chromatic (α, β) channels. Channel statistics
//! in this space are close to independent, which is what makes per-channel
//! mean/std transfer (Reinhard normalization) work on stained tissue.

use ndarray::Array2;

use super::{transform_rows, Mat3};

const RGB_TO_LMS: Mat3 = [
    [0.3811, 0.5783, 0.0402],
    [0.1967, 0.7244, 0.0782],
    [0.0241, 0.1288, 0.8444],
];

const LMS_TO_RGB: Mat3 = [
    [4.468669863496255, -3.588675903472126, 0.11960436657860118],
    [-1.2197166276177631, 2.3830879129554567, -0.16263011175140052],
    [0.05850847693854588, -0.2610784390276936, 1.205665908525623],
];

// diag(1/√3, 1/√6, 1/√2) · [[1, 1, 1], [1, 1, -2], [1, -1, 0]]
const LMS_TO_LAB: Mat3 = [
    [0.5773502691896258, 0.5773502691896258, 0.5773502691896258],
    [0.4082482904638631, 0.4082482904638631, -0.8164965809277261],
    [0.7071067811865476, -0.7071067811865476, 0.0],
];

// LMS_TO_LAB has orthonormal rows, so its inverse is the transpose.
const LAB_TO_LMS: Mat3 = [
    [0.5773502691896258, 0.4082482904638631, 0.7071067811865476],
    [0.5773502691896258, 0.4082482904638631, -0.7071067811865476],
    [0.5773502691896258, -0.8164965809277261, 0.0],
];

/// Convert an `n × 3` matrix of RGB pixels (0 to 255) to lαβ.
pub fn rgb_to_lab(rgb: &Array2<f64>) -> Array2<f64> {
    let mut lms = transform_rows(rgb, &RGB_TO_LMS);
    // log(0) is undefined; black maps to the smallest representable log
    lms.mapv_inplace(|v| v.max(f64::EPSILON).ln());
    transform_rows(&lms, &LMS_TO_LAB)
}

/// Convert lαβ pixels back to RGB (unclamped, 0 to 255 scale).
pub fn lab_to_rgb(lab: &Array2<f64>) -> Array2<f64> {
    let mut lms = transform_rows(lab, &LAB_TO_LMS);
    lms.mapv_inplace(f64::exp);
    transform_rows(&lms, &LMS_TO_RGB)
}
