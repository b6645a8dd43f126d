//! Salient regions of interest for downstream analysis.
//!
//! The most cellular contiguous regions are picked (highest bin first, larger
//! regions first within a bin) and their bounding boxes widened by a zoom-out
//! factor so the surrounding context is included.

use serde::Serialize;

use crate::aggregate::ContiguousRegion;
use crate::geometry::SlideRect;
use crate::score::CellularityBin;

/// A region of interest around a highly cellular region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalientRoi {
    /// 1-based rank
    pub rank: u32,

    /// Id of the contiguous region it was built from
    pub region_id: u32,

    pub bin: CellularityBin,

    /// Region area in working-magnification pixels
    pub area: u64,

    /// Zoomed-out box in level-0 slide coordinates, clamped to the slide
    pub bounds: SlideRect,
}

/// Pick the `topk` most salient regions.
pub fn select_salient_rois(
    regions: &[ContiguousRegion],
    topk: usize,
    zoomout: f64,
    slide_width: f64,
    slide_height: f64,
) -> Vec<SalientRoi> {
    let mut ranked: Vec<&ContiguousRegion> = regions.iter().collect();
    ranked.sort_by(|a, b| {
        b.bin
            .cmp(&a.bin)
            .then(b.area.cmp(&a.area))
            .then(a.id.cmp(&b.id))
    });

    ranked
        .into_iter()
        .take(topk)
        .enumerate()
        .map(|(i, region)| SalientRoi {
            rank: i as u32 + 1,
            region_id: region.id,
            bin: region.bin,
            area: region.area,
            bounds: zoom_out(&region.bounds, zoomout, slide_width, slide_height),
        })
        .collect()
}

/// Scale a box about its center and clamp it to `[0, width] × [0, height]`.
pub fn zoom_out(rect: &SlideRect, factor: f64, width: f64, height: f64) -> SlideRect {
    let center = rect.center();
    let half_w = rect.width * factor / 2.0;
    let half_h = rect.height * factor / 2.0;
    let x0 = (center.x - half_w).clamp(0.0, width);
    let y0 = (center.y - half_h).clamp(0.0, height);
    let x1 = (center.x + half_w).clamp(0.0, width);
    let y1 = (center.y + half_h).clamp(0.0, height);
    SlideRect::new(x0, y0, x1 - x0, y1 - y0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(id: u32, bin: u32, area: u64, bounds: SlideRect) -> ContiguousRegion {
        ContiguousRegion {
            id,
            bin: CellularityBin(bin),
            members: vec![id],
            area,
            mean_statistic: 0.0,
            bounds,
            polygons: Vec::new(),
            outline: Vec::new(),
        }
    }

    #[test]
    fn test_zoom_out_about_center() {
        let rect = SlideRect::new(100.0, 100.0, 50.0, 20.0);
        let zoomed = zoom_out(&rect, 2.0, 1000.0, 1000.0);
        assert_eq!(zoomed, SlideRect::new(75.0, 90.0, 100.0, 40.0));
    }

    #[test]
    fn test_zoom_out_clamps_to_slide() {
        let rect = SlideRect::new(0.0, 950.0, 100.0, 50.0);
        let zoomed = zoom_out(&rect, 3.0, 1000.0, 1000.0);
        assert_eq!(zoomed.x, 0.0);
        assert_eq!(zoomed.y + zoomed.height, 1000.0);
    }

    #[test]
    fn test_ranking_by_bin_then_area() {
        let unit = SlideRect::new(0.0, 0.0, 10.0, 10.0);
        let regions = vec![
            region(1, 3, 100, unit),
            region(2, 7, 10, unit),
            region(3, 7, 50, unit),
            region(4, 1, 500, unit),
        ];
        let rois = select_salient_rois(&regions, 3, 1.0, 100.0, 100.0);
        let ids: Vec<u32> = rois.iter().map(|r| r.region_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(rois[0].rank, 1);
    }

    #[test]
    fn test_topk_larger_than_regions() {
        let regions = vec![region(1, 0, 1, SlideRect::new(0.0, 0.0, 1.0, 1.0))];
        assert_eq!(select_salient_rois(&regions, 8, 1.5, 10.0, 10.0).len(), 1);
        assert!(select_salient_rois(&regions, 0, 1.5, 10.0, 10.0).is_empty());
    }
}
