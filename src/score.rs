//! Cellularity scoring.
//!
//! The cellularity statistic of a superpixel is its mean hematoxylin density
//! scaled to `0..=1`: nuclei bind hematoxylin, so densely cellular tissue is
//! darker in that channel. The statistic is quantized linearly into
//! `max_cellularity + 1` equal-width bins over a configured range.

use serde::{Deserialize, Serialize};

use crate::color::SDA_MAX;
use crate::error::DetectorError;
use crate::segment::Superpixel;

/// Default number of the highest cellularity bin.
pub const DEFAULT_MAX_CELLULARITY: u32 = 40;

/// A quantized cellularity level in `0..=max_cellularity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellularityBin(pub u32);

impl CellularityBin {
    pub fn value(self) -> u32 {
        self.0
    }
}

/// A superpixel with its statistic and bin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredSuperpixel {
    #[serde(flatten)]
    pub superpixel: Superpixel,
    pub statistic: f64,
    pub bin: CellularityBin,
}

/// Maps superpixels to cellularity bins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellularityScorer {
    max_cellularity: u32,
    range: [f64; 2],
}

impl CellularityScorer {
    /// Create a scorer quantizing `range = [lo, hi]` into
    /// `max_cellularity + 1` bins.
    pub fn new(max_cellularity: u32, range: [f64; 2]) -> Result<Self, DetectorError> {
        let [lo, hi] = range;
        if !lo.is_finite() || !hi.is_finite() || hi <= lo {
            return Err(DetectorError::config(
                "cellularity_range",
                format!("must be finite with lo < hi, got [{}, {}]", lo, hi),
            ));
        }
        Ok(Self {
            max_cellularity,
            range,
        })
    }

    pub fn max_cellularity(&self) -> u32 {
        self.max_cellularity
    }

    /// Mean hematoxylin density of the superpixel in `0..=1`.
    pub fn statistic(&self, superpixel: &Superpixel) -> f64 {
        (superpixel.features.mean_hematoxylin / SDA_MAX).clamp(0.0, 1.0)
    }

    /// Linear quantization of a statistic.
    ///
    /// `floor((s - lo) / (hi - lo) · (max + 1))`, clamped to `0..=max`.
    pub fn quantize(&self, statistic: f64) -> CellularityBin {
        let [lo, hi] = self.range;
        let levels = self.max_cellularity as f64 + 1.0;
        let scaled = ((statistic - lo) / (hi - lo) * levels).floor();
        if scaled.is_nan() || scaled < 0.0 {
            return CellularityBin(0);
        }
        CellularityBin((scaled as u64).min(self.max_cellularity as u64) as u32)
    }

    pub fn score(&self, superpixel: &Superpixel) -> CellularityBin {
        self.quantize(self.statistic(superpixel))
    }

    pub fn score_all(&self, superpixels: Vec<Superpixel>) -> Vec<ScoredSuperpixel> {
        superpixels
            .into_iter()
            .map(|superpixel| {
                let statistic = self.statistic(&superpixel);
                ScoredSuperpixel {
                    bin: self.quantize(statistic),
                    statistic,
                    superpixel,
                }
            })
            .collect()
    }
}

impl Default for CellularityScorer {
    fn default() -> Self {
        Self {
            max_cellularity: DEFAULT_MAX_CELLULARITY,
            range: [0.0, 1.0],
        }
    }
}
