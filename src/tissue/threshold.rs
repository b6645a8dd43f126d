//! Gaussian smoothing and Otsu thresholding on single-channel rasters.

use image::{ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;

/// Gaussian blur with clamped edges. `sigma <= 0` is a no-op.
pub fn gaussian_smooth(values: &[f32], width: u32, height: u32, sigma: f32) -> Vec<f32> {
    if sigma <= 0.0 || values.is_empty() {
        return values.to_vec();
    }
    match ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(width, height, values.to_vec()) {
        Some(raster) => gaussian_blur_f32(&raster, sigma).into_raw(),
        None => values.to_vec(),
    }
}

/// Number of histogram bins used by [`otsu_threshold`].
pub const OTSU_BINS: usize = 256;

/// Otsu threshold of a set of samples.
///
/// The samples are binned into [`OTSU_BINS`] equal bins between their
/// minimum and maximum; the returned value is the upper edge of the bin that
/// maximizes between-class variance, so `value > threshold` selects the
/// upper class. Returns `None` for fewer than two distinct values.
pub fn otsu_threshold(samples: impl IntoIterator<Item = f32> + Clone) -> Option<f32> {
    let (min, max) = samples
        .clone()
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if max <= min {
        return None;
    }

    let span = max - min;
    let bin_width = span / OTSU_BINS as f32;
    let mut histogram = [0u64; OTSU_BINS];
    let mut total = 0u64;
    for v in samples.into_iter().filter(|v| v.is_finite()) {
        let bin = (((v - min) / span) * OTSU_BINS as f32) as usize;
        histogram[bin.min(OTSU_BINS - 1)] += 1;
        total += 1;
    }

    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut best_bin = None;
    let mut best_variance = -1.0f64;
    let mut weight_low = 0u64;
    let mut sum_low = 0.0f64;
    for (i, &count) in histogram.iter().enumerate().take(OTSU_BINS - 1) {
        weight_low += count;
        sum_low += i as f64 * count as f64;
        if weight_low == 0 {
            continue;
        }
        let weight_high = total - weight_low;
        if weight_high == 0 {
            break;
        }
        let mean_low = sum_low / weight_low as f64;
        let mean_high = (weighted_total - sum_low) / weight_high as f64;
        let diff = mean_low - mean_high;
        let variance = weight_low as f64 * weight_high as f64 * diff * diff;
        if variance > best_variance {
            best_variance = variance;
            best_bin = Some(i);
        }
    }

    best_bin.map(|bin| min + (bin + 1) as f32 * bin_width)
}
