//! Pixel-exact boundary geometry.
//!
//! Outlines live on the pixel-corner lattice of a raster: pixel `(x, y)`
//! covers the unit square `[x, x+1] × [y, y+1]`. A region's boundary is the
//! set of directed unit edges separating its pixels from the rest, oriented
//! so that (in y-down image coordinates) the region is on the right-hand
//! side. Chaining those edges yields closed rings: outer rings have positive
//! shoelace area, holes negative.
//!
//! Working on the lattice keeps every operation exact:
//!
//! - adjacency between two regions is a shared unit edge
//! - the union of regions is the set of their edges minus the ones shared
//!   between members (each shared edge appears once per direction and
//!   cancels)
//!
//! Coordinates are converted to level-0 slide space only at the very end
//! (see [`GridShape::to_slide`]).

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

// =============================================================================
// Points and Boxes
// =============================================================================

/// A corner of the pixel lattice at working magnification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPoint {
    pub x: i64,
    pub y: i64,
}

impl GridPoint {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// A point in level-0 slide pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlidePoint {
    pub x: f64,
    pub y: f64,
}

/// An axis-aligned rectangle in level-0 slide pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlideRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SlideRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> SlidePoint {
        SlidePoint {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Half-open pixel rectangle `[x0, x1) × [y0, y1)` on a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelBox {
    /// Box covering the single pixel `(x, y)`.
    pub fn pixel(x: u32, y: u32) -> Self {
        Self {
            x0: x,
            y0: y,
            x1: x + 1,
            y1: y + 1,
        }
    }

    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    /// Grow the box to include pixel `(x, y)`.
    pub fn include(&mut self, x: u32, y: u32) {
        self.x0 = self.x0.min(x);
        self.y0 = self.y0.min(y);
        self.x1 = self.x1.max(x + 1);
        self.y1 = self.y1.max(y + 1);
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }
}

// =============================================================================
// Unit Edges
// =============================================================================

/// Direction of a unit lattice edge (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    East,
    South,
    West,
    North,
}

impl Direction {
    /// The direction after a right turn on screen.
    pub fn clockwise(self) -> Self {
        match self {
            Direction::East => Direction::South,
            Direction::South => Direction::West,
            Direction::West => Direction::North,
            Direction::North => Direction::East,
        }
    }

    /// The direction after a left turn on screen.
    pub fn counter_clockwise(self) -> Self {
        match self {
            Direction::East => Direction::North,
            Direction::North => Direction::West,
            Direction::West => Direction::South,
            Direction::South => Direction::East,
        }
    }

    pub fn opposite(self) -> Self {
        self.clockwise().clockwise()
    }

    fn delta(self) -> (i64, i64) {
        match self {
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
            Direction::North => (0, -1),
        }
    }

    fn from_delta(dx: i64, dy: i64) -> Option<Self> {
        match (dx.signum(), dy.signum()) {
            (1, 0) => Some(Direction::East),
            (0, 1) => Some(Direction::South),
            (-1, 0) => Some(Direction::West),
            (0, -1) => Some(Direction::North),
            _ => None,
        }
    }
}

/// A directed unit edge of the pixel lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitEdge {
    pub start: GridPoint,
    pub dir: Direction,
}

impl UnitEdge {
    pub const fn new(start: GridPoint, dir: Direction) -> Self {
        Self { start, dir }
    }

    pub fn end(&self) -> GridPoint {
        let (dx, dy) = self.dir.delta();
        GridPoint::new(self.start.x + dx, self.start.y + dy)
    }

    /// The same lattice segment walked the other way.
    pub fn reversed(&self) -> Self {
        Self::new(self.end(), self.dir.opposite())
    }

    /// Pixel on the left of the edge, outside the region it bounds.
    pub fn outside_pixel(&self) -> (i64, i64) {
        let GridPoint { x, y } = self.start;
        match self.dir {
            Direction::East => (x, y - 1),
            Direction::South => (x, y),
            Direction::West => (x - 1, y),
            Direction::North => (x - 1, y - 1),
        }
    }

    /// Orientation-free key of the underlying lattice segment.
    ///
    /// Returns the segment's top-left endpoint and whether it is horizontal.
    pub fn segment(&self) -> (GridPoint, bool) {
        match self.dir {
            Direction::East | Direction::South => (self.start, self.dir == Direction::East),
            Direction::West | Direction::North => (self.end(), self.dir == Direction::West),
        }
    }
}

/// Directed boundary edges of every labeled region in a raster.
///
/// Label 0 is background and gets no edges. `origin` is the lattice position
/// of the raster's top-left corner. The result maps each label to its edges;
/// iteration order is by label.
pub fn labeled_boundary_edges(
    labels: &[u32],
    width: u32,
    height: u32,
    origin: GridPoint,
) -> BTreeMap<u32, Vec<UnitEdge>> {
    let w = width as usize;
    let h = height as usize;
    let label_at = |x: i64, y: i64| -> u32 {
        if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
            0
        } else {
            labels[y as usize * w + x as usize]
        }
    };

    let mut edges: BTreeMap<u32, Vec<UnitEdge>> = BTreeMap::new();
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let label = label_at(x, y);
            if label == 0 {
                continue;
            }
            let gx = origin.x + x;
            let gy = origin.y + y;
            let bucket = edges.entry(label).or_default();
            if label_at(x, y - 1) != label {
                bucket.push(UnitEdge::new(GridPoint::new(gx, gy), Direction::East));
            }
            if label_at(x + 1, y) != label {
                bucket.push(UnitEdge::new(GridPoint::new(gx + 1, gy), Direction::South));
            }
            if label_at(x, y + 1) != label {
                bucket.push(UnitEdge::new(GridPoint::new(gx + 1, gy + 1), Direction::West));
            }
            if label_at(x - 1, y) != label {
                bucket.push(UnitEdge::new(GridPoint::new(gx, gy + 1), Direction::North));
            }
        }
    }
    edges
}

// =============================================================================
// Shapes
// =============================================================================

/// A polygon with holes on the pixel lattice.
///
/// The exterior ring has positive shoelace area in y-down coordinates and
/// holes negative; rings are implicitly closed and contain only corner
/// vertices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub exterior: Vec<GridPoint>,
    pub holes: Vec<Vec<GridPoint>>,
}

/// A polygon with holes in slide coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<SlidePoint>,
    pub holes: Vec<Vec<SlidePoint>>,
}

/// Twice the signed shoelace area of a closed ring.
pub fn ring_area2(ring: &[GridPoint]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let a = ring[i];
            let b = ring[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum()
}

/// Even-odd containment test for a point that is not on a lattice line.
fn ring_contains(ring: &[GridPoint], px: f64, py: f64) -> bool {
    let n = ring.len();
    let mut inside = false;
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        let (ax, ay, bx, by) = (a.x as f64, a.y as f64, b.x as f64, b.y as f64);
        if (ay > py) != (by > py) {
            let cross_x = ax + (py - ay) * (bx - ax) / (by - ay);
            if px < cross_x {
                inside = !inside;
            }
        }
    }
    inside
}

impl GridShape {
    /// Enclosed pixel count (exterior minus holes).
    pub fn area(&self) -> u64 {
        let outer = ring_area2(&self.exterior);
        let holes: i64 = self.holes.iter().map(|h| ring_area2(h)).sum();
        ((outer + holes) / 2).max(0) as u64
    }

    /// Whether the center of pixel `(x, y)` lies inside the shape.
    pub fn contains_pixel(&self, x: i64, y: i64) -> bool {
        let (px, py) = (x as f64 + 0.5, y as f64 + 0.5);
        ring_contains(&self.exterior, px, py)
            && !self.holes.iter().any(|h| ring_contains(h, px, py))
    }

    /// Pixel bounds of the exterior ring as `(min, max)` lattice corners.
    pub fn bounds(&self) -> (GridPoint, GridPoint) {
        let mut min = GridPoint::new(i64::MAX, i64::MAX);
        let mut max = GridPoint::new(i64::MIN, i64::MIN);
        for p in &self.exterior {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        (min, max)
    }

    /// All directed unit edges of the shape's rings.
    pub fn unit_edges(&self) -> Vec<UnitEdge> {
        let mut edges = Vec::new();
        for ring in std::iter::once(&self.exterior).chain(self.holes.iter()) {
            let n = ring.len();
            for i in 0..n {
                let a = ring[i];
                let b = ring[(i + 1) % n];
                let Some(dir) = Direction::from_delta(b.x - a.x, b.y - a.y) else {
                    continue;
                };
                let steps = (b.x - a.x).abs() + (b.y - a.y).abs();
                let (dx, dy) = dir.delta();
                for k in 0..steps {
                    edges.push(UnitEdge::new(
                        GridPoint::new(a.x + dx * k, a.y + dy * k),
                        dir,
                    ));
                }
            }
        }
        edges
    }

    /// Scale lattice coordinates into slide coordinates.
    ///
    /// `downsample` is the number of level-0 pixels per lattice unit.
    pub fn to_slide(&self, downsample: f64) -> Polygon {
        self.to_slide_scaled(downsample, downsample)
    }

    /// [`to_slide`](Self::to_slide) with separate x and y scales.
    pub fn to_slide_scaled(&self, scale_x: f64, scale_y: f64) -> Polygon {
        let map = |ring: &Vec<GridPoint>| -> Vec<SlidePoint> {
            ring.iter()
                .map(|p| SlidePoint {
                    x: p.x as f64 * scale_x,
                    y: p.y as f64 * scale_y,
                })
                .collect()
        };
        Polygon {
            exterior: map(&self.exterior),
            holes: self.holes.iter().map(map).collect(),
        }
    }
}

// =============================================================================
// Ring Chaining
// =============================================================================

/// Chain a closed set of boundary edges into shapes.
///
/// At vertices where two boundary paths touch diagonally, the walk turns
/// right (toward the region), so pixels meeting only at a corner end up in
/// separate rings. Holes are attached to the smallest exterior ring that
/// contains them. Output order is deterministic: exteriors are sorted by
/// their first vertex.
pub fn chain_rings(mut edges: Vec<UnitEdge>) -> Vec<GridShape> {
    edges.sort_unstable();
    edges.dedup();

    let index: HashMap<UnitEdge, usize> = edges.iter().enumerate().map(|(i, e)| (*e, i)).collect();
    let successor = |edge: &UnitEdge| -> Option<usize> {
        let at = edge.end();
        [edge.dir.clockwise(), edge.dir, edge.dir.counter_clockwise()]
            .into_iter()
            .find_map(|dir| index.get(&UnitEdge::new(at, dir)).copied())
    };

    let mut used = vec![false; edges.len()];
    let mut exteriors: Vec<Vec<GridPoint>> = Vec::new();
    let mut holes: Vec<(Vec<GridPoint>, (i64, i64))> = Vec::new();

    for first in 0..edges.len() {
        if used[first] {
            continue;
        }
        let mut cycle = Vec::new();
        let mut current = first;
        loop {
            used[current] = true;
            cycle.push(edges[current]);
            match successor(&edges[current]) {
                Some(next) if next != first && !used[next] => current = next,
                _ => break,
            }
        }

        let ring = corner_vertices(&cycle);
        if ring.len() < 4 {
            continue;
        }
        if ring_area2(&ring) > 0 {
            exteriors.push(ring);
        } else {
            holes.push((ring, cycle[0].outside_pixel()));
        }
    }

    let mut shapes: Vec<GridShape> = exteriors
        .into_iter()
        .map(|exterior| GridShape {
            exterior,
            holes: Vec::new(),
        })
        .collect();

    for (hole, (hx, hy)) in holes {
        let (px, py) = (hx as f64 + 0.5, hy as f64 + 0.5);
        let owner = shapes
            .iter()
            .enumerate()
            .filter(|(_, s)| ring_contains(&s.exterior, px, py))
            .min_by_key(|(_, s)| ring_area2(&s.exterior))
            .map(|(i, _)| i);
        if let Some(i) = owner {
            shapes[i].holes.push(hole);
        }
    }

    for shape in &mut shapes {
        shape.holes.sort();
    }
    shapes.sort_by(|a, b| a.exterior.first().cmp(&b.exterior.first()));
    shapes
}

/// Reduce a cycle of unit edges to the vertices where direction changes.
///
/// The result starts at the first corner in `(y, x)` order so equal rings
/// always come out identical.
fn corner_vertices(cycle: &[UnitEdge]) -> Vec<GridPoint> {
    let n = cycle.len();
    let mut corners: Vec<GridPoint> = (0..n)
        .filter(|&i| cycle[(i + n - 1) % n].dir != cycle[i].dir)
        .map(|i| cycle[i].start)
        .collect();
    if let Some(pivot) = corners
        .iter()
        .enumerate()
        .min_by_key(|(_, p)| (p.y, p.x))
        .map(|(i, _)| i)
    {
        corners.rotate_left(pivot);
    }
    corners
}

/// Union of shapes that share no interior pixels.
///
/// Edges shared between two members appear once in each direction and
/// cancel; what remains is exactly the boundary of the union.
pub fn union_shapes<'a>(shapes: impl IntoIterator<Item = &'a GridShape>) -> Vec<GridShape> {
    let mut boundary: HashSet<UnitEdge> = HashSet::new();
    for shape in shapes {
        for edge in shape.unit_edges() {
            let reverse = edge.reversed();
            if !boundary.remove(&reverse) {
                boundary.insert(edge);
            }
        }
    }
    chain_rings(boundary.into_iter().collect())
}

/// Trace the shapes of every labeled region in a raster.
pub fn trace_labeled_shapes(
    labels: &[u32],
    width: u32,
    height: u32,
    origin: GridPoint,
) -> BTreeMap<u32, Vec<GridShape>> {
    labeled_boundary_edges(labels, width, height, origin)
        .into_iter()
        .map(|(label, edges)| (label, chain_rings(edges)))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
