//! Segmentation, scoring and aggregation on cell-aligned synthetic images.
//!
//! A 512×512 image split into a 4×4 grid of 128-pixel cells is segmented
//! with a 128² superpixel area, so every cell becomes exactly one
//! superpixel. This makes the expected regions exact.

use std::collections::BTreeSet;

use image::RgbImage;

use wsi_cellularity::{
    CellularityScorer, ContiguousRegion, GridPoint, PieceRaster, RegionAggregator,
    ScoredSuperpixel, SuperpixelParams, SuperpixelSegmenter,
};

use super::test_utils::{cell_grid, DENSE, LIGHT};

const CELLS: u32 = 4;
const CELL: u32 = 128;

fn score_grid(image: RgbImage, max_cellularity: u32, range: [f64; 2]) -> Vec<ScoredSuperpixel> {
    let segmenter = SuperpixelSegmenter::new(
        SuperpixelParams {
            spixel_area_base_mag: (CELL * CELL) as f64,
            ..Default::default()
        },
        20.0,
        20.0,
    );
    let pixels = (image.width() * image.height()) as usize;
    let raster = PieceRaster {
        piece: 1,
        origin: GridPoint::new(0, 0),
        image,
        mask: vec![true; pixels],
    };
    let superpixels = segmenter.segment(&raster, 1).unwrap();
    assert_eq!(superpixels.len(), (CELLS * CELLS) as usize);
    for sp in &superpixels {
        assert_eq!(sp.area, (CELL * CELL) as u64);
    }

    CellularityScorer::new(max_cellularity, range)
        .unwrap()
        .score_all(superpixels)
}

fn aggregate(scored: &[ScoredSuperpixel]) -> Vec<ContiguousRegion> {
    RegionAggregator::new(1.0).aggregate(scored)
}

fn bins(regions: &[ContiguousRegion]) -> BTreeSet<u32> {
    regions.iter().map(|r| r.bin.value()).collect()
}

/// Two intensity classes on a 4 × 4 grid, one per contiguous half.
///
/// Regions only join across shared edges, so the classes fill halves rather
/// than alternating cell by cell; the alternating layout is covered by
/// `test_checkerboard_keeps_diagonal_cells_apart`.
#[test]
fn test_two_class_grid_gives_two_regions() {
    let image = cell_grid(CELLS, CELL, |_, row| if row < 2 { DENSE } else { LIGHT });
    let scored = score_grid(image, 40, [0.0, 1.0]);
    let regions = aggregate(&scored);

    assert_eq!(regions.len(), 2);
    assert_eq!(bins(&regions).len(), 2);

    for region in &regions {
        assert_eq!(region.members.len(), 8);
        assert_eq!(region.area, 8 * (CELL * CELL) as u64);
        assert_eq!(region.polygons.len(), 1);
        assert!(region.polygons[0].holes.is_empty());
        assert_eq!(region.bounds.width, 512.0);
        assert_eq!(region.bounds.height, 256.0);
    }

    // The dense half is on top and scores higher
    let top = regions.iter().find(|r| r.bounds.y == 0.0).unwrap();
    let bottom = regions.iter().find(|r| r.bounds.y == 256.0).unwrap();
    assert!(top.bin > bottom.bin);
    assert!(top.mean_statistic > bottom.mean_statistic);
}

#[test]
fn test_two_classes_with_two_bins() {
    let image = cell_grid(CELLS, CELL, |_, row| if row < 2 { DENSE } else { LIGHT });
    // Densities of about 0.21 and 0.15 fall on either side of 0.2
    let scored = score_grid(image, 1, [0.1, 0.3]);
    let regions = aggregate(&scored);

    assert_eq!(regions.len(), 2);
    assert_eq!(bins(&regions), BTreeSet::from([0, 1]));
}

#[test]
fn test_checkerboard_keeps_diagonal_cells_apart() {
    let image = cell_grid(CELLS, CELL, |col, row| if (col + row) % 2 == 0 { DENSE } else { LIGHT });
    let scored = score_grid(image, 40, [0.0, 1.0]);
    let regions = aggregate(&scored);

    // Same-bin cells only touch at corners
    assert_eq!(regions.len(), 16);
    assert_eq!(bins(&regions).len(), 2);
    assert!(regions.iter().all(|r| r.members.len() == 1));
}

#[test]
fn test_enclosed_block_leaves_hole() {
    let image = cell_grid(CELLS, CELL, |col, row| {
        if (1..3).contains(&col) && (1..3).contains(&row) {
            DENSE
        } else {
            LIGHT
        }
    });
    let scored = score_grid(image, 40, [0.0, 1.0]);
    let regions = aggregate(&scored);
    assert_eq!(regions.len(), 2);

    let ring = regions.iter().find(|r| r.members.len() == 12).unwrap();
    assert_eq!(ring.polygons.len(), 1);
    assert_eq!(ring.polygons[0].holes.len(), 1);

    let core = regions.iter().find(|r| r.members.len() == 4).unwrap();
    assert!(core.polygons[0].holes.is_empty());
    assert_eq!(core.bounds.x, 128.0);
    assert_eq!(core.bounds.width, 256.0);
}

#[test]
fn test_aggregation_ignores_input_order() {
    let image = cell_grid(CELLS, CELL, |col, row| {
        if (col * 3 + row) % 4 < 2 {
            DENSE
        } else {
            LIGHT
        }
    });
    let scored = score_grid(image, 40, [0.0, 1.0]);
    let forward = aggregate(&scored);

    let mut reversed = scored.clone();
    reversed.reverse();
    assert_eq!(aggregate(&reversed), forward);

    let mut rotated = scored;
    rotated.rotate_left(5);
    assert_eq!(aggregate(&rotated), forward);
}
