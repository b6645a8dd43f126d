//! Detector runs against slides stored as image files.
//!
//! Tests verify:
//! - A PNG slide on disk runs end to end through the local source
//! - The slide is decoded once per run, not once per fetch
//! - The detection serializes to JSON

use std::path::PathBuf;
use std::sync::Arc;

use wsi_cellularity::{CellularityDetector, DetectorConfig, DetectorError, LocalSlideSource};

use super::test_utils::{blank_slide, two_piece_slide};

fn slide_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "wsi-cellularity-it-{}-{}",
        name,
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config() -> DetectorConfig {
    let mut config = DetectorConfig::default();
    config.mag = 5.0;
    config.superpixel.spixel_area_base_mag = 16384.0;
    config
}

#[tokio::test]
async fn test_png_slide_end_to_end() {
    let dir = slide_dir("png");
    two_piece_slide().save(dir.join("case.png")).unwrap();

    let source = Arc::new(
        LocalSlideSource::new(&dir)
            .with_magnification(20.0)
            .with_thumbnail_size(256),
    );
    let detector = CellularityDetector::new(Arc::clone(&source), "case.png", config());
    let detection = detector.run().await.unwrap();

    assert_eq!(detection.tissue_pieces.len(), 2);
    assert!(!detection.regions.is_empty());
    assert_eq!(detection.native_magnification, 20.0);
    assert_eq!(source.cached_count().await, 1);

    let json = serde_json::to_value(&detection).unwrap();
    assert_eq!(json["slide_id"], "case.png");
    assert!(json["regions"][0]["polygons"].is_array());
    assert!(json["regions"][0].get("outline").is_none());
    assert!(json["artifacts"]["superpixels"][0]["bin"].is_u64());
}

#[tokio::test]
async fn test_blank_png_is_empty_tissue() {
    let dir = slide_dir("blank");
    blank_slide().save(dir.join("blank.png")).unwrap();

    let source = LocalSlideSource::new(&dir).with_magnification(20.0);
    let detector = CellularityDetector::new(source, "blank.png", config());
    assert!(matches!(
        detector.run().await,
        Err(DetectorError::EmptyTissue { .. })
    ));
}

#[tokio::test]
async fn test_missing_file_is_source_error() {
    let dir = slide_dir("missing");
    let detector = CellularityDetector::new(LocalSlideSource::new(&dir), "absent.png", config());
    assert!(matches!(
        detector.run().await,
        Err(DetectorError::Source { .. })
    ));
}
