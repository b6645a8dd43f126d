//! End-to-end detector runs against the mock slide source.
//!
//! Tests verify:
//! - A full run produces regions, salient ROIs and artifacts
//! - Runs are reproducible and independent of the fetch tile size
//! - Superpixels cover exactly the tissue at working magnification
//! - Errors carry the stage they happened in
//! - Normalization profiles and warnings

use std::collections::BTreeSet;
use std::sync::Arc;

use wsi_cellularity::config::REFERENCE_THUMBNAIL_PROFILE;
use wsi_cellularity::{
    CellularityDetector, DetectorConfig, DetectorError, NormalizationScope, PipelineStage,
    RunWarning, SourceError,
};

use image::RgbImage;

use super::test_utils::{
    blank_slide, two_class_slide, two_piece_slide, FailAt, MockSlideSource, DENSE, GLASS,
};

const SLIDE: &str = "slide.png";

/// Working magnification 5x on a 20x slide: 4 level-0 pixels per working
/// pixel, superpixels of about 1024 working pixels.
fn config() -> DetectorConfig {
    let mut config = DetectorConfig::default();
    config.mag = 5.0;
    config.superpixel.spixel_area_base_mag = 16384.0;
    config
}

fn source(slide: image::RgbImage) -> Arc<MockSlideSource> {
    Arc::new(MockSlideSource::new(SLIDE, slide, 20.0))
}

fn detector(
    source: &Arc<MockSlideSource>,
    config: DetectorConfig,
) -> CellularityDetector<Arc<MockSlideSource>> {
    CellularityDetector::new(Arc::clone(source), SLIDE, config)
}

// =============================================================================
// Full Runs
// =============================================================================

#[tokio::test]
async fn test_run_finds_regions() {
    let source = source(two_class_slide());
    let detection = detector(&source, config()).run().await.unwrap();

    assert_eq!(detection.slide_id, SLIDE);
    assert_eq!(detection.tissue_pieces.len(), 1);
    assert!(!detection.regions.is_empty());

    let bins: BTreeSet<u32> = detection.regions.iter().map(|r| r.bin.value()).collect();
    assert!(bins.len() >= 2, "dense and light tissue share a bin: {:?}", bins);
    assert!(bins.iter().all(|&b| b <= 40));

    for region in &detection.regions {
        assert!(region.members.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(region.id, region.members[0]);
        assert!(!region.polygons.is_empty());
    }
    assert!(detection.regions.windows(2).all(|w| w[0].id < w[1].id));

    assert_eq!(source.reference_count(), 1);
    assert_eq!(source.thumbnail_count(), 1);
    assert_eq!(source.region_requests().await.len(), 1);
}

#[tokio::test]
async fn test_dense_half_scores_higher() {
    let source = source(two_class_slide());
    let detection = detector(&source, config()).run().await.unwrap();
    let superpixels = detection.artifacts.superpixels.unwrap();

    // Dense tissue is x < 512 on level 0
    let mean_bin = |dense: bool| {
        let bins: Vec<f64> = superpixels
            .iter()
            .filter(|s| (s.superpixel.centroid.x < 512.0) == dense)
            .map(|s| s.bin.value() as f64)
            .collect();
        assert!(!bins.is_empty());
        bins.iter().sum::<f64>() / bins.len() as f64
    };
    assert!(mean_bin(true) > mean_bin(false));
}

#[tokio::test]
async fn test_run_is_reproducible() {
    let source = source(two_piece_slide());
    let detector = detector(&source, config());

    let first = detector.run().await.unwrap();
    let second = detector.run().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(source.thumbnail_count(), 2);
}

#[tokio::test]
async fn test_tiled_fetch_matches_single_fetch() {
    let single_source = source(two_class_slide());
    let single = detector(&single_source, config()).run().await.unwrap();

    let tiled_source = source(two_class_slide());
    let mut tiled_config = config();
    tiled_config.main_tile_size = 16;
    let tiled = detector(&tiled_source, tiled_config).run().await.unwrap();

    assert_eq!(single.regions, tiled.regions);
    assert_eq!(single.artifacts, tiled.artifacts);

    let requests = tiled_source.region_requests().await;
    assert!(requests.len() > 1);
    for (rect, magnification) in requests {
        assert_eq!(magnification, 5.0);
        assert!(rect.width <= 64.0 && rect.height <= 64.0);
    }
}

#[tokio::test]
async fn test_superpixels_cover_tissue_exactly() {
    let source = source(two_piece_slide());
    let detection = detector(&source, config()).run().await.unwrap();
    assert_eq!(detection.tissue_pieces.len(), 2);

    let superpixels = detection.artifacts.superpixels.as_ref().unwrap();
    let labels = detection.artifacts.region_labels.as_ref().unwrap();
    assert_eq!(labels.len(), 2);

    let superpixel_area: u64 = superpixels.iter().map(|s| s.superpixel.area).sum();
    let region_area: u64 = detection.regions.iter().map(|r| r.area).sum();
    let labeled: u64 = labels
        .iter()
        .map(|raster| {
            let dense = raster.to_dense();
            assert_eq!(dense.len() as u32, raster.width * raster.height);
            dense.iter().filter(|&&id| id != 0).count() as u64
        })
        .sum();

    assert_eq!(superpixel_area, region_area);
    assert_eq!(superpixel_area, labeled);

    let ids: BTreeSet<u32> = superpixels.iter().map(|s| s.superpixel.id).collect();
    assert_eq!(ids.len(), superpixels.len());
    assert_eq!(ids.iter().next(), Some(&1));

    let pieces: BTreeSet<u32> = superpixels.iter().map(|s| s.superpixel.piece).collect();
    assert_eq!(pieces.len(), 2);
}

#[tokio::test]
async fn test_salient_rois_are_ranked_and_clamped() {
    let source = source(two_piece_slide());
    let mut config = config();
    config.topk_salient_rois = 3;
    config.zoomout = 4.0;
    let detection = detector(&source, config).run().await.unwrap();

    let rois = &detection.salient_rois;
    assert!(!rois.is_empty() && rois.len() <= 3);
    for (i, roi) in rois.iter().enumerate() {
        assert_eq!(roi.rank, i as u32 + 1);
        assert!(roi.bounds.x >= 0.0 && roi.bounds.y >= 0.0);
        assert!(roi.bounds.x + roi.bounds.width <= 1024.0 + 1e-9);
        assert!(roi.bounds.y + roi.bounds.height <= 1024.0 + 1e-9);
    }
    assert!(rois.windows(2).all(|w| w[0].bin >= w[1].bin));

    let top_bin = detection.regions.iter().map(|r| r.bin).max().unwrap();
    assert_eq!(rois[0].bin, top_bin);
}

#[tokio::test]
async fn test_visualization_toggles() {
    let source = source(two_class_slide());
    let mut config = config();
    config.visualize_tissue_boundary = false;
    config.visualize_spixels = false;
    config.visualize_contiguous = false;
    let detection = detector(&source, config).run().await.unwrap();

    assert!(detection.artifacts.tissue_boundaries.is_none());
    assert!(detection.artifacts.superpixels.is_none());
    assert!(detection.artifacts.region_labels.is_none());

    let json = serde_json::to_value(&detection).unwrap();
    assert!(json["artifacts"].as_object().unwrap().is_empty());
    assert!(json["regions"].is_array());
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_blank_slide_is_empty_tissue() {
    let source = source(blank_slide());
    let err = detector(&source, config()).run().await.unwrap_err();

    assert!(matches!(err, DetectorError::EmptyTissue { min_size: 500, .. }));
    assert!(source.region_requests().await.is_empty());
}

#[tokio::test]
async fn test_invalid_config_fails_before_fetch() {
    let source = source(two_class_slide());
    let mut config = config();
    config.max_cellularity = 0;
    let err = detector(&source, config).run().await.unwrap_err();

    assert!(matches!(
        err,
        DetectorError::Configuration {
            parameter: "max_cellularity",
            ..
        }
    ));
    assert_eq!(source.reference_count(), 0);
    assert_eq!(source.thumbnail_count(), 0);
}

#[tokio::test]
async fn test_empty_slide_id_fails_before_fetch() {
    let source = source(two_class_slide());
    for slide_id in ["", "  \t"] {
        let err = CellularityDetector::new(Arc::clone(&source), slide_id, config())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DetectorError::Configuration {
                parameter: "slide_id",
                ..
            }
        ));
    }
    assert_eq!(source.reference_count(), 0);
    assert_eq!(source.thumbnail_count(), 0);
}

#[tokio::test]
async fn test_source_errors_carry_stage() {
    let cases = [
        (FailAt::Reference, PipelineStage::Configured),
        (FailAt::Thumbnail, PipelineStage::MaskBuilt),
        (FailAt::Region, PipelineStage::Segmented),
    ];
    for (fail_at, expected) in cases {
        let source = Arc::new(MockSlideSource::new(SLIDE, two_class_slide(), 20.0).failing_at(fail_at));
        let err = detector(&source, config()).run().await.unwrap_err();

        match err {
            DetectorError::Source { stage, source } => {
                assert_eq!(stage, expected);
                assert!(matches!(source, SourceError::Connection(_)));
            }
            other => panic!("expected a source error, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_unknown_slide_is_not_found() {
    let source = source(two_class_slide());
    let detector = CellularityDetector::new(Arc::clone(&source), "other.png", config());
    let err = detector.run().await.unwrap_err();

    assert!(matches!(
        err,
        DetectorError::Source {
            stage: PipelineStage::Configured,
            source: SourceError::NotFound(_),
        }
    ));
    assert!(!err.is_retryable());
}

// =============================================================================
// Normalization Profiles
// =============================================================================

#[tokio::test]
async fn test_missing_profiles_are_warnings() {
    let source = source(two_class_slide());
    let detection = detector(&source, config()).run().await.unwrap();

    assert_eq!(
        detection.warnings,
        vec![
            RunWarning::NormalizationProfileMissing {
                scope: NormalizationScope::Thumbnail
            },
            RunWarning::NormalizationProfileMissing {
                scope: NormalizationScope::Main
            },
        ]
    );
}

#[tokio::test]
async fn test_suppressed_warnings_are_still_recorded() {
    let source = source(two_class_slide());
    let mut config = config();
    config.suppress_warnings = true;
    let detection = detector(&source, config).run().await.unwrap();
    assert_eq!(detection.warnings.len(), 2);
}

#[tokio::test]
async fn test_reference_profiles_silence_warnings() {
    let source = source(two_class_slide());
    let detection = detector(&source, config().with_reference_normalization())
        .run()
        .await
        .unwrap();

    assert!(detection.warnings.is_empty());
    assert!(!detection.regions.is_empty());
}

#[tokio::test]
async fn test_latest_profile_wins() {
    let source = source(two_class_slide());
    let mut detector = detector(&source, config());

    detector
        .set_color_normalization_values([1.0, 0.0, 0.0], [0.5, 0.1, 0.1], NormalizationScope::Main)
        .unwrap();
    detector
        .set_color_normalization_values([8.7, -0.1, 0.04], [0.6, 0.1, 0.03], NormalizationScope::Main)
        .unwrap();

    let main = detector.config().normalization.main.unwrap();
    assert_eq!(main.mu, [8.7, -0.1, 0.04]);
    assert_eq!(main.sigma, [0.6, 0.1, 0.03]);
    assert!(detector.config().normalization.thumbnail.is_none());

    detector
        .set_color_normalization_values(
            REFERENCE_THUMBNAIL_PROFILE.mu,
            REFERENCE_THUMBNAIL_PROFILE.sigma,
            NormalizationScope::Thumbnail,
        )
        .unwrap();
    let detection = detector.run().await.unwrap();
    assert!(detection.warnings.is_empty());
}

#[tokio::test]
async fn test_invalid_profile_is_rejected() {
    let source = source(two_class_slide());
    let mut detector = detector(&source, config());

    let err = detector
        .set_color_normalization_values([8.0, 0.0, 0.0], [0.5, 0.0, 0.1], NormalizationScope::Thumbnail)
        .unwrap_err();
    assert!(matches!(err, DetectorError::Configuration { .. }));
    assert!(detector.config().normalization.thumbnail.is_none());
}

// =============================================================================
// Stages
// =============================================================================

#[tokio::test]
async fn test_stages_expose_intermediates() {
    let source = source(two_class_slide());
    let detector = detector(&source, config());

    let configured = detector.configure().await.unwrap();
    assert_eq!(configured.reference().dimensions(), (1024, 1024));

    let masked = configured.build_mask().await.unwrap();
    assert_eq!(masked.tissue().pieces.len(), 1);
    assert_eq!(masked.tissue().downsample_x, 4.0);
    assert_eq!(masked.tissue().downsample_y, 4.0);

    let segmented = masked.segment().await.unwrap();
    let count = segmented.superpixels().len();
    assert!(count > 1);

    let scored = segmented.score().unwrap();
    assert_eq!(scored.superpixels().len(), count);

    let aggregated = scored.aggregate();
    let regions = aggregated.regions().len();
    let detection = aggregated.finish().into_detection();
    assert_eq!(detection.regions.len(), regions);
}

/// A 1024 × 1002 slide gets a 256 × 251 thumbnail, so the two axes scale
/// differently and tissue touching the bottom edge must map back to it.
#[tokio::test]
async fn test_non_square_thumbnail_scales_each_axis() {
    let slide = RgbImage::from_fn(1024, 1002, |x, y| {
        if (256..768).contains(&x) && y >= 256 {
            DENSE
        } else {
            GLASS
        }
    });
    let source = source(slide);
    let detector = detector(&source, config());
    let masked = detector
        .configure()
        .await
        .unwrap()
        .build_mask()
        .await
        .unwrap();
    let tissue = masked.tissue();

    assert_eq!((tissue.width, tissue.height), (256, 251));
    assert_eq!(tissue.downsample_x, 4.0);
    assert_eq!(tissue.downsample_y, 1002.0 / 251.0);

    assert_eq!(tissue.pieces.len(), 1);
    let piece = &tissue.pieces[0];
    assert_eq!(piece.bbox.y1, 251);
    let bottom = piece.slide_bounds.y + piece.slide_bounds.height;
    assert!((bottom - 1002.0).abs() < 1e-9, "bottom edge at {}", bottom);
}
