//! Typestate stages of a detection run.
//!
//! ```text
//! Configured ──build_mask()──▶ MaskBuilt ──segment()──▶ Segmented
//!     ──score()──▶ Scored ──aggregate()──▶ Aggregated ──finish()──▶ Done
//! ```
//!
//! Each transition consumes the previous stage and carries forward what the
//! later stages need. Fallible transitions tag source errors with the stage
//! they were working toward.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::aggregate::{ContiguousRegion, RegionAggregator};
use crate::color::{ColorNormalizer, NormalizationScope};
use crate::config::DetectorConfig;
use crate::error::{DetectorError, PipelineStage};
use crate::geometry::GridPoint;
use crate::salient::select_salient_rois;
use crate::score::{CellularityScorer, ScoredSuperpixel};
use crate::segment::{PieceRaster, Superpixel, SuperpixelSegmenter};
use crate::slide::{decode_rgb, SlideReference, SlideSource};
use crate::tissue::{TissueMask, TissueMaskBuilder};

use super::fetch::{fetch_area, piece_mask, WorkingGrid};
use super::{Artifacts, Detection, RegionLabelRaster, RunWarning, TissueBoundary};

// =============================================================================
// Run Context
// =============================================================================

/// State shared by every stage of one run.
struct RunContext<'a, S: ?Sized> {
    source: &'a S,
    slide_id: &'a str,
    config: &'a DetectorConfig,
    reference: SlideReference,
    warnings: Vec<RunWarning>,
}

impl<S: ?Sized> RunContext<'_, S> {
    fn warn(&mut self, warning: RunWarning) {
        if !self.config.suppress_warnings {
            warn!(%warning, "Detection warning");
        }
        self.warnings.push(warning);
    }

    fn check_profile(&mut self, scope: NormalizationScope) {
        if self.config.normalization.get(scope).is_none() {
            self.warn(RunWarning::NormalizationProfileMissing { scope });
        }
    }

    fn normalizer(&self) -> ColorNormalizer<'_> {
        ColorNormalizer::new(&self.config.normalization).with_suppressed_warnings(true)
    }
}

/// Superpixel id per working pixel of one tissue piece.
struct PieceIds {
    piece: u32,
    origin: GridPoint,
    width: u32,
    height: u32,
    ids: Vec<u32>,
}

// =============================================================================
// Configured
// =============================================================================

/// Configuration validated and slide metadata resolved.
#[must_use = "pipeline stages are consumed by advancing; call .build_mask() to continue"]
pub struct Configured<'a, S: SlideSource + ?Sized> {
    ctx: RunContext<'a, S>,
}

impl<'a, S: SlideSource + ?Sized> Configured<'a, S> {
    pub(crate) async fn resolve(
        source: &'a S,
        slide_id: &'a str,
        config: &'a DetectorConfig,
    ) -> Result<Self, DetectorError> {
        config.validate()?;
        if slide_id.trim().is_empty() {
            return Err(DetectorError::config("slide_id", "must not be empty"));
        }

        let reference = source
            .slide_reference(slide_id)
            .await
            .map_err(|e| DetectorError::fetch(PipelineStage::Configured, e))?;
        if !reference.magnification.is_finite() || reference.magnification <= 0.0 {
            return Err(DetectorError::config(
                "slide.magnification",
                format!("slide reports magnification {}", reference.magnification),
            ));
        }
        debug!(
            width = reference.width,
            height = reference.height,
            native_mag = reference.magnification,
            levels = reference.levels.len(),
            "Resolved slide"
        );

        Ok(Self {
            ctx: RunContext {
                source,
                slide_id,
                config,
                reference,
                warnings: Vec::new(),
            },
        })
    }

    pub fn reference(&self) -> &SlideReference {
        &self.ctx.reference
    }

    /// Fetch and normalize the thumbnail, then detect tissue on it.
    pub async fn build_mask(self) -> Result<MaskBuilt<'a, S>, DetectorError> {
        let mut ctx = self.ctx;
        let stage = PipelineStage::MaskBuilt;

        let bytes = ctx
            .source
            .fetch_thumbnail(ctx.slide_id)
            .await
            .map_err(|e| DetectorError::fetch(stage, e))?;
        let thumbnail = decode_rgb(&bytes).map_err(|e| DetectorError::fetch(stage, e))?;
        let downsample_x = ctx.reference.width as f64 / thumbnail.width().max(1) as f64;
        let downsample_y = ctx.reference.height as f64 / thumbnail.height().max(1) as f64;

        ctx.check_profile(NormalizationScope::Thumbnail);
        let thumbnail = ctx.normalizer().normalize(&thumbnail, NormalizationScope::Thumbnail);

        let tissue = TissueMaskBuilder::new(ctx.config.tissue.clone()).build_scaled(
            &thumbnail,
            downsample_x,
            downsample_y,
        )?;
        debug!(
            thumbnail_width = thumbnail.width(),
            thumbnail_height = thumbnail.height(),
            downsample_x,
            downsample_y,
            pieces = tissue.pieces.len(),
            tissue_pixels = tissue.area(),
            "Built tissue mask"
        );

        Ok(MaskBuilt { ctx, tissue })
    }
}

// =============================================================================
// MaskBuilt
// =============================================================================

/// Tissue detected on the thumbnail.
#[must_use = "pipeline stages are consumed by advancing; call .segment() to continue"]
pub struct MaskBuilt<'a, S: SlideSource + ?Sized> {
    ctx: RunContext<'a, S>,
    tissue: TissueMask,
}

impl<'a, S: SlideSource + ?Sized> MaskBuilt<'a, S> {
    pub fn tissue(&self) -> &TissueMask {
        &self.tissue
    }

    /// Fetch every tissue piece at the working magnification and split it
    /// into superpixels.
    ///
    /// Superpixel ids run from 1 across all pieces, in piece label order.
    pub async fn segment(self) -> Result<Segmented<'a, S>, DetectorError> {
        let Self { mut ctx, tissue } = self;
        let config = ctx.config;

        let grid = WorkingGrid::new(
            ctx.reference.width,
            ctx.reference.height,
            ctx.reference.downsample_for(config.mag),
        );
        let segmenter = SuperpixelSegmenter::new(
            config.superpixel.clone(),
            ctx.reference.magnification,
            config.mag,
        );
        ctx.check_profile(NormalizationScope::Main);

        let mut superpixels: Vec<Superpixel> = Vec::new();
        let mut pieces = Vec::new();
        let mut next_id = 1u32;

        for piece in &tissue.pieces {
            let Some(area) = grid.cover(&piece.slide_bounds) else {
                ctx.warn(RunWarning::EmptyPiece { piece: piece.label });
                continue;
            };
            let mask = piece_mask(&tissue, piece, &grid, &area);
            if !mask.iter().any(|&m| m) {
                ctx.warn(RunWarning::EmptyPiece { piece: piece.label });
                continue;
            }

            let image = fetch_area(
                ctx.source,
                ctx.slide_id,
                &grid,
                config.mag,
                &area,
                config.main_tile_size,
            )
            .await
            .map_err(|e| DetectorError::fetch(PipelineStage::Segmented, e))?;
            let image = ctx
                .normalizer()
                .normalize_masked(&image, NormalizationScope::Main, Some(&mask));

            let origin = GridPoint::new(area.x0 as i64, area.y0 as i64);
            let raster = PieceRaster {
                piece: piece.label,
                origin,
                image,
                mask,
            };
            let segmentation = segmenter.segment_piece(&raster, next_id)?;
            next_id += segmentation.superpixels.len() as u32;

            pieces.push(PieceIds {
                piece: piece.label,
                origin,
                width: segmentation.width,
                height: segmentation.height,
                ids: segmentation.ids,
            });
            superpixels.extend(segmentation.superpixels);
        }

        if superpixels.is_empty() {
            return Err(DetectorError::Segmentation {
                piece: 0,
                message: "no tissue piece produced superpixels".to_string(),
            });
        }
        debug!(
            superpixels = superpixels.len(),
            pieces = pieces.len(),
            working_width = grid.width,
            working_height = grid.height,
            target_area = segmenter.target_area(),
            "Generated superpixels"
        );

        Ok(Segmented {
            ctx,
            tissue,
            grid,
            superpixels,
            pieces,
        })
    }
}

// =============================================================================
// Segmented
// =============================================================================

/// Superpixels generated for every tissue piece.
#[must_use = "pipeline stages are consumed by advancing; call .score() to continue"]
pub struct Segmented<'a, S: SlideSource + ?Sized> {
    ctx: RunContext<'a, S>,
    tissue: TissueMask,
    grid: WorkingGrid,
    superpixels: Vec<Superpixel>,
    pieces: Vec<PieceIds>,
}

impl<'a, S: SlideSource + ?Sized> Segmented<'a, S> {
    pub fn superpixels(&self) -> &[Superpixel] {
        &self.superpixels
    }

    /// Assign every superpixel its cellularity bin.
    pub fn score(self) -> Result<Scored<'a, S>, DetectorError> {
        let config = self.ctx.config;
        let scorer = CellularityScorer::new(config.max_cellularity, config.cellularity_range)?;
        let scored = scorer.score_all(self.superpixels);

        let mut bins: Vec<u32> = scored.iter().map(|s| s.bin.value()).collect();
        bins.sort_unstable();
        bins.dedup();
        debug!(
            superpixels = scored.len(),
            distinct_bins = bins.len(),
            "Scored superpixels"
        );

        Ok(Scored {
            ctx: self.ctx,
            tissue: self.tissue,
            grid: self.grid,
            scored,
            pieces: self.pieces,
        })
    }
}

// =============================================================================
// Scored
// =============================================================================

/// Every superpixel carries a statistic and a bin.
#[must_use = "pipeline stages are consumed by advancing; call .aggregate() to continue"]
pub struct Scored<'a, S: SlideSource + ?Sized> {
    ctx: RunContext<'a, S>,
    tissue: TissueMask,
    grid: WorkingGrid,
    scored: Vec<ScoredSuperpixel>,
    pieces: Vec<PieceIds>,
}

impl<'a, S: SlideSource + ?Sized> Scored<'a, S> {
    pub fn superpixels(&self) -> &[ScoredSuperpixel] {
        &self.scored
    }

    /// Merge adjacent same-bin superpixels into contiguous regions.
    pub fn aggregate(self) -> Aggregated<'a, S> {
        let regions = RegionAggregator::new(self.grid.downsample).aggregate(&self.scored);

        Aggregated {
            ctx: self.ctx,
            tissue: self.tissue,
            scored: self.scored,
            pieces: self.pieces,
            regions,
        }
    }
}

// =============================================================================
// Aggregated
// =============================================================================

/// Contiguous regions built.
#[must_use = "pipeline stages are consumed by advancing; call .finish() to continue"]
pub struct Aggregated<'a, S: SlideSource + ?Sized> {
    ctx: RunContext<'a, S>,
    tissue: TissueMask,
    scored: Vec<ScoredSuperpixel>,
    pieces: Vec<PieceIds>,
    regions: Vec<ContiguousRegion>,
}

impl<'a, S: SlideSource + ?Sized> Aggregated<'a, S> {
    pub fn regions(&self) -> &[ContiguousRegion] {
        &self.regions
    }

    /// Select salient regions and assemble the result.
    pub fn finish(self) -> Done {
        let Self {
            ctx,
            tissue,
            scored,
            pieces,
            regions,
        } = self;
        let config = ctx.config;

        let salient_rois = select_salient_rois(
            &regions,
            config.topk_salient_rois,
            config.zoomout,
            ctx.reference.width as f64,
            ctx.reference.height as f64,
        );

        let tissue_boundaries = config.visualize_tissue_boundary.then(|| {
            tissue
                .boundaries()
                .into_iter()
                .map(|(piece, polygons)| TissueBoundary { piece, polygons })
                .collect()
        });
        let region_labels = config
            .visualize_contiguous
            .then(|| region_label_rasters(&pieces, &regions));
        let superpixel_count = scored.len();
        let superpixels = config.visualize_spixels.then_some(scored);

        info!(
            pieces = tissue.pieces.len(),
            superpixels = superpixel_count,
            regions = regions.len(),
            salient_rois = salient_rois.len(),
            warnings = ctx.warnings.len(),
            "Cellularity detection complete"
        );

        Done {
            detection: Detection {
                slide_id: ctx.slide_id.to_string(),
                label_prefix: config.label_prefix.clone(),
                magnification: config.mag,
                native_magnification: ctx.reference.magnification,
                tissue_pieces: tissue.pieces,
                regions,
                salient_rois,
                warnings: ctx.warnings,
                artifacts: Artifacts {
                    tissue_boundaries,
                    superpixels,
                    region_labels,
                },
            },
        }
    }
}

/// Map every piece's superpixel ids to the ids of their regions.
fn region_label_rasters(pieces: &[PieceIds], regions: &[ContiguousRegion]) -> Vec<RegionLabelRaster> {
    let region_of: HashMap<u32, u32> = regions
        .iter()
        .flat_map(|r| r.members.iter().map(move |&m| (m, r.id)))
        .collect();

    pieces
        .iter()
        .map(|p| {
            let labels = p
                .ids
                .iter()
                .map(|id| region_of.get(id).copied().unwrap_or(0));
            RegionLabelRaster::from_labels(p.piece, p.origin, p.width, p.height, labels)
        })
        .collect()
}

// =============================================================================
// Done
// =============================================================================

/// A finished run.
#[must_use = "call .into_detection() to take the result"]
pub struct Done {
    detection: Detection,
}

impl Done {
    pub fn detection(&self) -> &Detection {
        &self.detection
    }

    pub fn into_detection(self) -> Detection {
        self.detection
    }
}
