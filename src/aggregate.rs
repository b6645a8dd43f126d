//! Grouping of same-bin superpixels into contiguous regions.
//!
//! Two superpixels are adjacent when their outlines share at least one unit
//! edge of the working-grid lattice; touching at a corner does not count.
//! Adjacent superpixels with the same cellularity bin are merged with a
//! union-find, and every resulting component becomes one
//! [`ContiguousRegion`] whose outline is the exact union of its members'.
//!
//! Everything is keyed by superpixel id, so the output does not depend on
//! the order superpixels are given in.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::geometry::{union_shapes, GridPoint, GridShape, Polygon, SlideRect};
use crate::score::{CellularityBin, ScoredSuperpixel};
use crate::tissue::UnionFind;

/// A connected group of superpixels sharing one cellularity bin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContiguousRegion {
    /// Smallest member superpixel id
    pub id: u32,

    pub bin: CellularityBin,

    /// Member superpixel ids, ascending
    pub members: Vec<u32>,

    /// Area in working-magnification pixels
    pub area: u64,

    /// Area-weighted mean of the members' statistics
    pub mean_statistic: f64,

    /// Bounding box in level-0 slide coordinates
    pub bounds: SlideRect,

    /// Outline parts with holes, in level-0 slide coordinates
    pub polygons: Vec<Polygon>,

    #[serde(skip)]
    pub outline: Vec<GridShape>,
}

/// Undirected adjacency between superpixel ids.
pub type Adjacency = BTreeMap<u32, BTreeSet<u32>>;

/// Builds contiguous regions from scored superpixels.
#[derive(Debug, Clone, Copy)]
pub struct RegionAggregator {
    downsample: f64,
}

impl RegionAggregator {
    /// `downsample` is the number of level-0 pixels per working-grid pixel.
    pub fn new(downsample: f64) -> Self {
        Self { downsample }
    }

    /// Edge-sharing adjacency of superpixel outlines.
    pub fn adjacency(&self, superpixels: &[ScoredSuperpixel]) -> Adjacency {
        let mut owners: HashMap<(GridPoint, bool), u32> = HashMap::new();
        let mut adjacency: Adjacency = superpixels
            .iter()
            .map(|s| (s.superpixel.id, BTreeSet::new()))
            .collect();

        for scored in superpixels {
            let id = scored.superpixel.id;
            for shape in &scored.superpixel.outline {
                for edge in shape.unit_edges() {
                    let segment = edge.segment();
                    match owners.get(&segment).copied() {
                        Some(other) if other != id => {
                            adjacency.entry(id).or_default().insert(other);
                            adjacency.entry(other).or_default().insert(id);
                        }
                        Some(_) => {}
                        None => {
                            owners.insert(segment, id);
                        }
                    }
                }
            }
        }
        adjacency
    }

    /// Merge adjacent same-bin superpixels into regions, ordered by id.
    pub fn aggregate(&self, superpixels: &[ScoredSuperpixel]) -> Vec<ContiguousRegion> {
        let mut sorted: Vec<&ScoredSuperpixel> = superpixels.iter().collect();
        sorted.sort_by_key(|s| s.superpixel.id);
        let index: HashMap<u32, usize> = sorted
            .iter()
            .enumerate()
            .map(|(i, s)| (s.superpixel.id, i))
            .collect();

        let adjacency = self.adjacency(superpixels);
        let mut uf = UnionFind::new(sorted.len());
        let mut same_bin_edges = 0usize;
        for (a, neighbors) in &adjacency {
            for b in neighbors.range(a + 1..) {
                let (ia, ib) = (index[a], index[b]);
                if sorted[ia].bin == sorted[ib].bin {
                    uf.union(ia as u32, ib as u32);
                    same_bin_edges += 1;
                }
            }
        }

        let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for i in 0..sorted.len() {
            groups.entry(uf.find(i as u32)).or_default().push(i);
        }
        let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
        groups.sort_by_key(|members| members[0]);

        let regions: Vec<ContiguousRegion> = groups
            .into_iter()
            .map(|members| self.region(&sorted, &members))
            .collect();

        debug!(
            superpixels = sorted.len(),
            same_bin_edges,
            regions = regions.len(),
            "Aggregated contiguous regions"
        );
        regions
    }

    /// Build one region; `members` are ascending indices into `sorted`.
    fn region(&self, sorted: &[&ScoredSuperpixel], members: &[usize]) -> ContiguousRegion {
        let first = sorted[members[0]];
        let outline = union_shapes(
            members
                .iter()
                .flat_map(|&i| sorted[i].superpixel.outline.iter()),
        );

        let area: u64 = members.iter().map(|&i| sorted[i].superpixel.area).sum();
        let weighted: f64 = members
            .iter()
            .map(|&i| sorted[i].statistic * sorted[i].superpixel.area as f64)
            .sum();
        let mean_statistic = if area > 0 { weighted / area as f64 } else { 0.0 };

        let mut min = GridPoint::new(i64::MAX, i64::MAX);
        let mut max = GridPoint::new(i64::MIN, i64::MIN);
        for shape in &outline {
            let (lo, hi) = shape.bounds();
            min = GridPoint::new(min.x.min(lo.x), min.y.min(lo.y));
            max = GridPoint::new(max.x.max(hi.x), max.y.max(hi.y));
        }
        let bounds = if outline.is_empty() {
            SlideRect::new(0.0, 0.0, 0.0, 0.0)
        } else {
            SlideRect::new(
                min.x as f64 * self.downsample,
                min.y as f64 * self.downsample,
                (max.x - min.x) as f64 * self.downsample,
                (max.y - min.y) as f64 * self.downsample,
            )
        };

        ContiguousRegion {
            id: first.superpixel.id,
            bin: first.bin,
            members: members.iter().map(|&i| sorted[i].superpixel.id).collect(),
            area,
            mean_statistic,
            bounds,
            polygons: outline.iter().map(|s| s.to_slide(self.downsample)).collect(),
            outline,
        }
    }
}
