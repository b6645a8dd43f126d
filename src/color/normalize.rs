//! Reinhard color normalization.
//!
//! Each image is converted to lαβ, every channel is standardized against the
//! image's own mean and standard deviation, then rescaled to the target
//! `(mu, sigma)` of a [`NormalizationProfile`] and converted back to RGB.
//!
//! Profiles are kept per [`NormalizationScope`]: the low-magnification
//! thumbnail and the working-magnification main image are normalized toward
//! different references, since stain appearance shifts with magnification.

use std::fmt;

use image::RgbImage;
use ndarray::{arr1, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DetectorError;

use super::lab::{lab_to_rgb, rgb_to_lab};
use super::{matrix_to_image, pixel_matrix};

/// Channel deviations below this are treated as zero.
const MIN_CHANNEL_STD: f64 = 1e-9;

// =============================================================================
// Profiles
// =============================================================================

/// Which image a normalization profile applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationScope {
    /// The low-magnification thumbnail used for tissue detection
    Thumbnail,
    /// Regions fetched at the working magnification
    Main,
}

impl fmt::Display for NormalizationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationScope::Thumbnail => f.write_str("thumbnail"),
            NormalizationScope::Main => f.write_str("main"),
        }
    }
}

/// Target per-channel mean and standard deviation in lαβ space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationProfile {
    pub mu: [f64; 3],
    pub sigma: [f64; 3],
}

impl NormalizationProfile {
    pub fn new(mu: [f64; 3], sigma: [f64; 3]) -> Self {
        Self { mu, sigma }
    }

    /// Check that all values are finite and every sigma is positive.
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.mu.iter().any(|v| !v.is_finite()) {
            return Err(DetectorError::config(
                "normalization.mu",
                format!("must be finite, got {:?}", self.mu),
            ));
        }
        if self.sigma.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(DetectorError::config(
                "normalization.sigma",
                format!("must be finite and positive, got {:?}", self.sigma),
            ));
        }
        Ok(())
    }
}

/// One optional profile slot per scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationProfiles {
    #[serde(default)]
    pub thumbnail: Option<NormalizationProfile>,
    #[serde(default)]
    pub main: Option<NormalizationProfile>,
}

impl NormalizationProfiles {
    /// Set the profile for a scope, replacing any previous one.
    pub fn set(&mut self, scope: NormalizationScope, profile: NormalizationProfile) {
        match scope {
            NormalizationScope::Thumbnail => self.thumbnail = Some(profile),
            NormalizationScope::Main => self.main = Some(profile),
        }
    }

    /// Get the profile for a scope, if one has been set.
    pub fn get(&self, scope: NormalizationScope) -> Option<&NormalizationProfile> {
        match scope {
            NormalizationScope::Thumbnail => self.thumbnail.as_ref(),
            NormalizationScope::Main => self.main.as_ref(),
        }
    }

    pub fn validate(&self) -> Result<(), DetectorError> {
        for profile in [&self.thumbnail, &self.main].into_iter().flatten() {
            profile.validate()?;
        }
        Ok(())
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Applies the configured profiles to RGB rasters.
#[derive(Debug, Clone)]
pub struct ColorNormalizer<'a> {
    profiles: &'a NormalizationProfiles,
    suppress_warnings: bool,
}

impl<'a> ColorNormalizer<'a> {
    pub fn new(profiles: &'a NormalizationProfiles) -> Self {
        Self {
            profiles,
            suppress_warnings: false,
        }
    }

    /// Silence the warning emitted when a scope has no profile.
    pub fn with_suppressed_warnings(mut self, suppress: bool) -> Self {
        self.suppress_warnings = suppress;
        self
    }

    /// Whether `normalize` will change images of this scope.
    pub fn has_profile(&self, scope: NormalizationScope) -> bool {
        self.profiles.get(scope).is_some()
    }

    /// Normalize an image using statistics from all of its pixels.
    pub fn normalize(&self, image: &RgbImage, scope: NormalizationScope) -> RgbImage {
        self.normalize_masked(image, scope, None)
    }

    /// Normalize an image, computing source statistics only over `mask`.
    ///
    /// Every pixel is transformed; the mask only decides which pixels
    /// describe the source distribution (e.g. tissue, not glass). An empty
    /// or absent mask falls back to all pixels. Without a profile for
    /// `scope` the image is returned unchanged.
    pub fn normalize_masked(
        &self,
        image: &RgbImage,
        scope: NormalizationScope,
        mask: Option<&[bool]>,
    ) -> RgbImage {
        let Some(profile) = self.profiles.get(scope) else {
            if !self.suppress_warnings {
                warn!(%scope, "no color normalization profile set, leaving image unchanged");
            }
            return image.clone();
        };

        let lab = rgb_to_lab(&pixel_matrix(image));
        let (src_mu, src_sigma) = channel_stats(&lab, mask);
        let scale = Array1::from_shape_fn(3, |c| {
            if src_sigma[c] > MIN_CHANNEL_STD {
                profile.sigma[c] / src_sigma[c]
            } else {
                0.0
            }
        });

        let target = (&lab - &src_mu) * &scale + &arr1(&profile.mu);
        matrix_to_image(lab_to_rgb(&target).view(), image.width(), image.height())
    }
}

/// Per-channel mean and population standard deviation of an `n × 3`
/// matrix, over the rows selected by `mask` (all rows when the mask is
/// absent, empty, or the wrong length).
fn channel_stats(lab: &Array2<f64>, mask: Option<&[bool]>) -> (Array1<f64>, Array1<f64>) {
    let masked = match mask {
        Some(m) if m.len() == lab.nrows() && m.iter().any(|&v| v) => {
            let rows: Vec<usize> = m
                .iter()
                .enumerate()
                .filter(|(_, &v)| v)
                .map(|(i, _)| i)
                .collect();
            Some(lab.select(Axis(0), &rows))
        }
        _ => None,
    };
    let sample = masked.as_ref().unwrap_or(lab);

    match sample.mean_axis(Axis(0)) {
        Some(mu) => (mu, sample.std_axis(Axis(0), 0.0)),
        None => (Array1::zeros(3), Array1::zeros(3)),
    }
}

// =============================================================================
// Tests
// =============================================================================
