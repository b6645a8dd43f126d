//! H&E color deconvolution.
//!
//! Pixels are converted to scaled optical density (SDA, 0 to 255, where 0
//! means no absorbance) and unmixed with the inverse of a stain matrix whose
//! columns are unit stain vectors. The first channel is hematoxylin, which
//! binds nuclei and is the density signal both the tissue mask and the
//! cellularity statistic are built on.

use image::RgbImage;
use ndarray::{arr1, arr2, Array1, Array2, ArrayView2};

use super::Mat3;

/// Upper bound of the scaled optical density scale.
pub const SDA_MAX: f64 = 255.0;

/// Unit Ruifrok & Johnston stain vectors as columns: hematoxylin
/// `(0.65, 0.70, 0.29)`, eosin `(0.07, 0.99, 0.11)` and their normalized
/// cross product.
const HE_STAINS: Mat3 = [
    [0.6511078257574492, 0.0701017212973667, -0.3321168641376976],
    [0.7011930431234068, 0.9914386297770432, -0.08093471415445082],
    [0.29049426072255424, 0.1101598477530048, 0.9397595227504105],
];

/// Inverse of [`HE_STAINS`].
const HE_UNMIX: Mat3 = [
    [1.4822222889492151, -0.1614614925512118, 0.5099210672659512],
    [-1.0754107302418396, 1.1162216340136333, -0.28392472121499146],
    [-0.33211686413769764, -0.08093471415445083, 0.9397595227504106],
];

/// Scaled optical density of one 8-bit channel value.
#[inline]
pub fn channel_sda(value: u8) -> f64 {
    let intensity = (value.max(1)) as f64;
    -(intensity / 255.0).ln() * SDA_MAX / 255f64.ln()
}

/// Stain basis for two-stain color deconvolution.
#[derive(Debug, Clone)]
pub struct StainMatrix {
    stains: Array2<f64>,
    unmix: Array2<f64>,
    sda_lut: [f64; 256],
}

impl StainMatrix {
    /// Standard hematoxylin/eosin basis.
    pub fn hematoxylin_eosin() -> Self {
        let mut sda_lut = [0.0; 256];
        for (value, slot) in sda_lut.iter_mut().enumerate() {
            *slot = channel_sda(value as u8);
        }
        Self {
            stains: arr2(&HE_STAINS),
            unmix: arr2(&HE_UNMIX),
            sda_lut,
        }
    }

    /// The stain vectors as matrix columns.
    pub fn stains(&self) -> ArrayView2<'_, f64> {
        self.stains.view()
    }

    /// SDA of every pixel as an `n × 3` matrix.
    pub fn sda(&self, image: &RgbImage) -> Array2<f64> {
        let n = image.width() as usize * image.height() as usize;
        let raw = image.as_raw();
        Array2::from_shape_fn((n, 3), |(i, c)| self.sda_lut[raw[i * 3 + c] as usize])
    }

    /// Unmixed stain concentrations (SDA units, unclamped) of every pixel.
    pub fn concentrations_image(&self, image: &RgbImage) -> Array2<f64> {
        self.sda(image).dot(&self.unmix.t())
    }

    /// Hematoxylin density of every pixel, clamped to `0..=SDA_MAX`.
    pub fn hematoxylin_density(&self, image: &RgbImage) -> Array1<f64> {
        self.sda(image)
            .dot(&self.unmix.row(0))
            .mapv(|v| v.clamp(0.0, SDA_MAX))
    }

    /// Unmixed stain concentrations of one pixel.
    pub fn concentrations(&self, rgb: [u8; 3]) -> [f64; 3] {
        let sda = arr1(&rgb.map(|v| self.sda_lut[v as usize]));
        let c = self.unmix.dot(&sda);
        [c[0], c[1], c[2]]
    }

    /// Hematoxylin density of one pixel, clamped to `0..=SDA_MAX`.
    pub fn hematoxylin(&self, rgb: [u8; 3]) -> f64 {
        self.concentrations(rgb)[0].clamp(0.0, SDA_MAX)
    }
}

impl Default for StainMatrix {
    fn default() -> Self {
        Self::hematoxylin_eosin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::Array2;

    #[test]
    fn test_channel_sda_range() {
        assert_eq!(channel_sda(255), 0.0);
        assert!((channel_sda(1) - SDA_MAX).abs() < 1e-9);
        assert!((channel_sda(0) - SDA_MAX).abs() < 1e-9);
    }

    #[test]
    fn test_basis_is_unit_and_inverted() {
        let matrix = StainMatrix::hematoxylin_eosin();
        for column in matrix.stains().columns() {
            assert!((column.dot(&column) - 1.0).abs() < 1e-12);
        }
        let product = arr2(&HE_UNMIX).dot(&matrix.stains());
        let identity = Array2::<f64>::eye(3);
        assert!(product.iter().zip(identity.iter()).all(|(a, b)| (a - b).abs() < 1e-12));
    }

    #[test]
    fn test_white_has_no_stain() {
        let matrix = StainMatrix::hematoxylin_eosin();
        let conc = matrix.concentrations([255, 255, 255]);
        assert!(conc.iter().all(|c| c.abs() < 1e-9));
    }

    #[test]
    fn test_hematoxylin_grows_with_darkness() {
        let matrix = StainMatrix::hematoxylin_eosin();
        let light = matrix.hematoxylin([200, 200, 200]);
        let dark = matrix.hematoxylin([80, 80, 80]);
        assert!((light - 20.47).abs() < 0.1);
        assert!((dark - 97.66).abs() < 0.1);
    }

    #[test]
    fn test_purple_is_more_hematoxylin_than_pink() {
        let matrix = StainMatrix::hematoxylin_eosin();
        let nuclear = matrix.concentrations([90, 60, 140]);
        let stromal = matrix.concentrations([230, 150, 190]);
        assert!(nuclear[0] > stromal[0]);
        assert!(stromal[1] > stromal[0]);
    }

    #[test]
    fn test_image_density_matches_pixels() {
        let matrix = StainMatrix::hematoxylin_eosin();
        let image = RgbImage::from_fn(4, 3, |x, y| Rgb([60 + x as u8 * 40, 50 + y as u8 * 60, 140]));
        let density = matrix.hematoxylin_density(&image);
        let concentrations = matrix.concentrations_image(&image);
        assert_eq!(density.len(), 12);
        for (i, px) in image.pixels().enumerate() {
            assert!((density[i] - matrix.hematoxylin(px.0)).abs() < 1e-9);
            let single = matrix.concentrations(px.0);
            for c in 0..3 {
                assert!((concentrations[[i, c]] - single[c]).abs() < 1e-9);
            }
        }
    }
}
