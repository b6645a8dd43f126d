//! Superpixel segmentation of tissue pieces at the working magnification.
//!
//! A tissue piece arrives as a [`PieceRaster`]: the color-normalized main
//! image covering the piece's bounding box, the piece mask on the same grid,
//! and the raster's position on the global working grid. The segmenter runs
//! masked SLIC on it and turns every cluster into a [`Superpixel`] with:
//!
//! - a pixel-exact outline on the working-grid lattice (used for adjacency
//!   and union during aggregation)
//! - the same outline scaled to level-0 slide coordinates
//! - color and stain features of its pixels
//!
//! # Superpixel size
//!
//! The target area is given at the slide's native magnification
//! (`spixel_area_base_mag`) and scaled by `(mag / native_mag)²`, so a
//! superpixel covers the same physical area whatever the scan resolution.

pub mod slic;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::color::{srgb_to_cielab, StainMatrix, SDA_MAX};
use crate::error::DetectorError;
use crate::geometry::{trace_labeled_shapes, GridPoint, GridShape, Polygon, SlidePoint};

pub use slic::{slic, SlicParams};

// =============================================================================
// Parameters
// =============================================================================

/// Default superpixel area at native magnification, in pixels.
pub const DEFAULT_SPIXEL_AREA_BASE_MAG: f64 = 256.0 * 256.0;

/// Default SLIC compactness.
pub const DEFAULT_COMPACTNESS: f64 = 10.0;

/// Default number of SLIC iterations.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Superpixel generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperpixelParams {
    /// Target superpixel area at native magnification (pixels)
    pub spixel_area_base_mag: f64,

    /// SLIC color/space trade-off
    pub compactness: f64,

    /// SLIC iterations
    pub max_iterations: u32,
}

impl Default for SuperpixelParams {
    fn default() -> Self {
        Self {
            spixel_area_base_mag: DEFAULT_SPIXEL_AREA_BASE_MAG,
            compactness: DEFAULT_COMPACTNESS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl SuperpixelParams {
    pub fn validate(&self) -> Result<(), DetectorError> {
        if !self.spixel_area_base_mag.is_finite() || self.spixel_area_base_mag <= 0.0 {
            return Err(DetectorError::config(
                "superpixel.spixel_area_base_mag",
                format!("must be positive, got {}", self.spixel_area_base_mag),
            ));
        }
        if !self.compactness.is_finite() || self.compactness <= 0.0 {
            return Err(DetectorError::config(
                "superpixel.compactness",
                format!("must be positive, got {}", self.compactness),
            ));
        }
        if self.max_iterations == 0 {
            return Err(DetectorError::config(
                "superpixel.max_iterations",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Superpixels
// =============================================================================

/// Color and stain statistics of a superpixel's pixels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuperpixelFeatures {
    /// Mean RGB (0–255)
    pub mean_rgb: [f64; 3],

    /// Mean CIELAB
    pub mean_lab: [f64; 3],

    /// Mean hematoxylin density (0–255)
    pub mean_hematoxylin: f64,

    /// Population standard deviation of hematoxylin density
    pub std_hematoxylin: f64,
}

/// One superpixel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Superpixel {
    /// Unique within a run
    pub id: u32,

    /// Tissue piece label the superpixel belongs to
    pub piece: u32,

    /// Outline on the working-magnification lattice
    #[serde(skip)]
    pub outline: Vec<GridShape>,

    /// Outline in level-0 slide coordinates
    pub boundary: Vec<Polygon>,

    /// Area in working-magnification pixels
    pub area: u64,

    /// Centroid in level-0 slide coordinates
    pub centroid: SlidePoint,

    pub features: SuperpixelFeatures,
}

/// A normalized main-image raster covering one tissue piece.
#[derive(Debug, Clone)]
pub struct PieceRaster {
    /// Tissue piece label
    pub piece: u32,

    /// Position of the raster's top-left pixel on the working grid
    pub origin: GridPoint,

    pub image: RgbImage,

    /// Piece membership per raster pixel
    pub mask: Vec<bool>,
}

impl PieceRaster {
    pub fn mask_area(&self) -> u64 {
        self.mask.iter().filter(|&&m| m).count() as u64
    }
}

/// Superpixels of one piece plus their pixel assignment.
#[derive(Debug, Clone)]
pub struct PieceSegmentation {
    pub superpixels: Vec<Superpixel>,
    pub width: u32,
    pub height: u32,

    /// Superpixel id per raster pixel, 0 outside the piece
    pub ids: Vec<u32>,
}

// =============================================================================
// Segmenter
// =============================================================================

#[derive(Debug, Clone, Default)]
struct Accumulator {
    count: u64,
    rgb: [f64; 3],
    lab: [f64; 3],
    h: f64,
    h_sq: f64,
    x: f64,
    y: f64,
}

/// Generates superpixels for tissue pieces.
#[derive(Debug, Clone)]
pub struct SuperpixelSegmenter {
    params: SuperpixelParams,
    native_magnification: f64,
    magnification: f64,
    stains: StainMatrix,
}

impl SuperpixelSegmenter {
    pub fn new(params: SuperpixelParams, native_magnification: f64, magnification: f64) -> Self {
        Self {
            params,
            native_magnification,
            magnification,
            stains: StainMatrix::hematoxylin_eosin(),
        }
    }

    /// Level-0 pixels per working-grid pixel.
    pub fn downsample(&self) -> f64 {
        self.native_magnification / self.magnification
    }

    /// Target superpixel area in working-grid pixels.
    pub fn target_area(&self) -> f64 {
        let scale = self.magnification / self.native_magnification;
        self.params.spixel_area_base_mag * scale * scale
    }

    /// Segment one piece; superpixel ids start at `first_id`.
    ///
    /// Fails if the piece mask does not match the raster or yields no
    /// superpixels.
    pub fn segment(&self, raster: &PieceRaster, first_id: u32) -> Result<Vec<Superpixel>, DetectorError> {
        Ok(self.segment_piece(raster, first_id)?.superpixels)
    }

    /// Like [`segment`](Self::segment), also returning the superpixel id of
    /// every raster pixel.
    pub fn segment_piece(
        &self,
        raster: &PieceRaster,
        first_id: u32,
    ) -> Result<PieceSegmentation, DetectorError> {
        let (width, height) = raster.image.dimensions();
        if raster.mask.len() != (width * height) as usize {
            return Err(DetectorError::Segmentation {
                piece: raster.piece,
                message: format!(
                    "mask has {} pixels but the image is {}x{}",
                    raster.mask.len(),
                    width,
                    height
                ),
            });
        }

        let lab: Vec<[f32; 3]> = srgb_to_cielab(&raster.image)
            .rows()
            .into_iter()
            .map(|row| [row[0] as f32, row[1] as f32, row[2] as f32])
            .collect();
        let slic_params = SlicParams {
            region_area: self.target_area(),
            compactness: self.params.compactness,
            max_iterations: self.params.max_iterations,
        };
        let labels = slic(&lab, &raster.mask, width, height, &slic_params);
        let count = labels.iter().copied().max().unwrap_or(0) as usize;
        if count == 0 {
            return Err(DetectorError::Segmentation {
                piece: raster.piece,
                message: "no superpixels generated".to_string(),
            });
        }

        let hematoxylin = self.stains.hematoxylin_density(&raster.image);
        let mut acc = vec![Accumulator::default(); count];
        for (i, (&label, px)) in labels.iter().zip(raster.image.pixels()).enumerate() {
            if label == 0 {
                continue;
            }
            let a = &mut acc[label as usize - 1];
            let h = hematoxylin[i];
            a.count += 1;
            for c in 0..3 {
                a.rgb[c] += px.0[c] as f64;
                a.lab[c] += lab[i][c] as f64;
            }
            a.h += h;
            a.h_sq += h * h;
            a.x += (i as u32 % width) as f64 + 0.5;
            a.y += (i as u32 / width) as f64 + 0.5;
        }

        let mut outlines = trace_labeled_shapes(&labels, width, height, raster.origin);
        let downsample = self.downsample();

        let superpixels: Vec<Superpixel> = acc
            .iter()
            .enumerate()
            .map(|(k, a)| {
                let label = k as u32 + 1;
                let n = a.count as f64;
                let mean_h = a.h / n;
                let var_h = (a.h_sq / n - mean_h * mean_h).max(0.0);
                let outline = outlines.remove(&label).unwrap_or_default();
                let boundary = outline.iter().map(|s| s.to_slide(downsample)).collect();
                Superpixel {
                    id: first_id + k as u32,
                    piece: raster.piece,
                    outline,
                    boundary,
                    area: a.count,
                    centroid: SlidePoint {
                        x: (raster.origin.x as f64 + a.x / n) * downsample,
                        y: (raster.origin.y as f64 + a.y / n) * downsample,
                    },
                    features: SuperpixelFeatures {
                        mean_rgb: a.rgb.map(|v| v / n),
                        mean_lab: a.lab.map(|v| v / n),
                        mean_hematoxylin: mean_h.min(SDA_MAX),
                        std_hematoxylin: var_h.sqrt(),
                    },
                }
            })
            .collect();

        debug!(
            piece = raster.piece,
            superpixels = superpixels.len(),
            target_area = self.target_area(),
            "Segmented tissue piece"
        );
        let ids = labels
            .iter()
            .map(|&l| if l == 0 { 0 } else { first_id + l - 1 })
            .collect();
        Ok(PieceSegmentation {
            superpixels,
            width,
            height,
            ids,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn segmenter(base_area: f64) -> SuperpixelSegmenter {
        SuperpixelSegmenter::new(
            SuperpixelParams {
                spixel_area_base_mag: base_area,
                ..Default::default()
            },
            20.0,
            20.0,
        )
    }

    fn raster(image: RgbImage, mask: Vec<bool>) -> PieceRaster {
        PieceRaster {
            piece: 1,
            origin: GridPoint::new(10, 20),
            image,
            mask,
        }
    }

    #[test]
    fn test_target_area_scales_with_magnification() {
        let s = SuperpixelSegmenter::new(SuperpixelParams::default(), 40.0, 10.0);
        assert_eq!(s.target_area(), 256.0 * 256.0 / 16.0);
        assert_eq!(s.downsample(), 4.0);
    }

    #[test]
    fn test_areas_sum_to_mask_area() {
        let image = RgbImage::from_fn(48, 40, |x, y| Rgb([(x * 5) as u8, (y * 6) as u8, 150]));
        let mask: Vec<bool> = (0..48 * 40).map(|i| (i % 48) > 4 && (i / 48) < 35).collect();
        let r = raster(image, mask);
        let superpixels = segmenter(100.0).segment(&r, 1).unwrap();

        let total: u64 = superpixels.iter().map(|s| s.area).sum();
        assert_eq!(total, r.mask_area());
        let outline_total: u64 = superpixels
            .iter()
            .flat_map(|s| s.outline.iter())
            .map(|shape| shape.area())
            .sum();
        assert_eq!(outline_total, r.mask_area());
    }

    #[test]
    fn test_ids_start_at_first_id() {
        let image = RgbImage::from_pixel(32, 32, Rgb([180, 120, 200]));
        let r = raster(image, vec![true; 32 * 32]);
        let superpixels = segmenter(256.0).segment(&r, 101).unwrap();

        assert_eq!(superpixels.len(), 4);
        let ids: Vec<u32> = superpixels.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![101, 102, 103, 104]);
    }

    #[test]
    fn test_outline_uses_origin_and_centroid_is_slide_space() {
        let image = RgbImage::from_pixel(16, 16, Rgb([180, 120, 200]));
        let r = raster(image, vec![true; 16 * 16]);
        let s = SuperpixelSegmenter::new(
            SuperpixelParams {
                spixel_area_base_mag: 1024.0,
                ..Default::default()
            },
            40.0,
            20.0,
        );
        let superpixels = s.segment(&r, 1).unwrap();
        assert_eq!(superpixels.len(), 1);

        let sp = &superpixels[0];
        assert_eq!(sp.outline[0].exterior[0], GridPoint::new(10, 20));
        assert_eq!(sp.centroid, SlidePoint { x: 36.0, y: 56.0 });
        assert_eq!(sp.boundary[0].exterior[0], SlidePoint { x: 20.0, y: 40.0 });
    }

    #[test]
    fn test_features_reflect_stain() {
        let image = RgbImage::from_fn(32, 16, |x, _| {
            if x < 16 {
                Rgb([70, 40, 120])
            } else {
                Rgb([230, 150, 190])
            }
        });
        let r = raster(image, vec![true; 32 * 16]);
        let superpixels = segmenter(256.0).segment(&r, 1).unwrap();

        assert_eq!(superpixels.len(), 2);
        let dark = &superpixels[0].features;
        let light = &superpixels[1].features;
        assert!(dark.mean_hematoxylin > light.mean_hematoxylin);
        assert!(dark.std_hematoxylin < 1e-3);
        assert_eq!(dark.mean_rgb, [70.0, 40.0, 120.0]);
    }

    #[test]
    fn test_piece_ids_match_superpixels() {
        let image = RgbImage::from_pixel(32, 32, Rgb([180, 120, 200]));
        let mut mask = vec![true; 32 * 32];
        mask[0] = false;
        let r = raster(image, mask);
        let piece = segmenter(256.0).segment_piece(&r, 7).unwrap();

        assert_eq!(piece.ids[0], 0);
        for sp in &piece.superpixels {
            let count = piece.ids.iter().filter(|&&id| id == sp.id).count() as u64;
            assert_eq!(count, sp.area);
        }
    }

    #[test]
    fn test_mask_size_mismatch_is_error() {
        let r = raster(RgbImage::new(4, 4), vec![true; 3]);
        assert!(matches!(
            segmenter(16.0).segment(&r, 1),
            Err(DetectorError::Segmentation { piece: 1, .. })
        ));
    }

    #[test]
    fn test_empty_mask_is_error() {
        let r = raster(RgbImage::new(4, 4), vec![false; 16]);
        assert!(segmenter(16.0).segment(&r, 1).is_err());
    }
}
