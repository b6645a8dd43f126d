//! Masked SLIC clustering.
//!
//! Cluster centers start on a regular grid of step `S` (only where the grid
//! point falls on the mask) and are refined by k-means in joint CIELAB and
//! position space, each center only competing for pixels within `S` of it.
//! The distance combines color and space as
//!
//! ```text
//! D² = dc² + (ds / S)² · m²
//! ```
//!
//! where `m` is the compactness: larger values favor square, grid-like
//! superpixels over color fidelity.
//!
//! Clustering does not guarantee connected clusters, so a final pass splits
//! clusters into 4-connected fragments, merges small fragments and
//! unassigned pixels into a neighbor, and renumbers the result.

use std::collections::BTreeMap;

use crate::tissue::label_components;

/// Key for pixels outside the mask.
const OUTSIDE: u32 = u32::MAX;

/// Key for mask pixels no center reached.
const UNASSIGNED: u32 = u32::MAX - 1;

/// Fragments smaller than this fraction of the target area get merged.
const MIN_FRAGMENT_FRACTION: f64 = 0.5;

/// Clustering parameters in working-magnification pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlicParams {
    /// Target superpixel area
    pub region_area: f64,

    /// Color/space trade-off `m`
    pub compactness: f64,

    /// k-means iterations (stops early once assignments settle)
    pub max_iterations: u32,
}

#[derive(Debug, Clone, Copy)]
struct Center {
    lab: [f64; 3],
    x: f64,
    y: f64,
}

/// Cluster the masked pixels of a CIELAB raster into superpixels.
///
/// Returns one label per pixel: 0 outside the mask, `1..=n` inside, numbered
/// in raster order of each superpixel's first pixel. Every mask pixel gets a
/// label and every label is a single 4-connected region.
pub fn slic(lab: &[[f32; 3]], mask: &[bool], width: u32, height: u32, params: &SlicParams) -> Vec<u32> {
    let w = width as usize;
    let h = height as usize;
    let mask_area = mask.iter().filter(|&&m| m).count();
    if mask_area == 0 {
        return vec![0; w * h];
    }

    let n_target = (mask_area as f64 / params.region_area.max(1.0)).ceil().max(1.0);
    let step = (mask_area as f64 / n_target).sqrt().max(1.0);

    let mut centers = seed_centers(lab, mask, w, h, step);
    let assignment = assign(lab, mask, w, h, step, params, &mut centers);

    let keys: Vec<u32> = assignment
        .iter()
        .zip(mask.iter())
        .map(|(&a, &m)| if !m { OUTSIDE } else { a })
        .collect();
    let min_fragment = (MIN_FRAGMENT_FRACTION * step * step) as u32;
    enforce_connectivity(&keys, width, height, min_fragment)
}

/// Grid seeds restricted to the mask, or one seed at the mask pixel nearest
/// the mask centroid if no grid point lands on tissue.
fn seed_centers(lab: &[[f32; 3]], mask: &[bool], w: usize, h: usize, step: f64) -> Vec<Center> {
    let center_at = |cx: f64, cy: f64| -> Center {
        let px = lab[cy as usize * w + cx as usize];
        Center {
            lab: px.map(f64::from),
            x: cx,
            y: cy,
        }
    };

    let mut centers = Vec::new();
    let cols = (w as f64 / step).ceil() as usize;
    let rows = (h as f64 / step).ceil() as usize;
    for j in 0..rows {
        for i in 0..cols {
            let cx = (i as f64 + 0.5) * step;
            let cy = (j as f64 + 0.5) * step;
            let (x, y) = (cx as usize, cy as usize);
            if x < w && y < h && mask[y * w + x] {
                centers.push(center_at(cx, cy));
            }
        }
    }

    if centers.is_empty() {
        let (mut sx, mut sy, mut n) = (0.0, 0.0, 0.0);
        for (i, _) in mask.iter().enumerate().filter(|(_, &m)| m) {
            sx += (i % w) as f64;
            sy += (i / w) as f64;
            n += 1.0;
        }
        let (cx, cy) = (sx / n, sy / n);
        let nearest = mask
            .iter()
            .enumerate()
            .filter(|(_, &m)| m)
            .map(|(i, _)| i)
            .min_by(|&a, &b| {
                let da = ((a % w) as f64 - cx).powi(2) + ((a / w) as f64 - cy).powi(2);
                let db = ((b % w) as f64 - cx).powi(2) + ((b / w) as f64 - cy).powi(2);
                da.total_cmp(&db)
            });
        if let Some(i) = nearest {
            centers.push(center_at((i % w) as f64 + 0.5, (i / w) as f64 + 0.5));
        }
    }
    centers
}

/// k-means refinement; returns the center index per pixel or `UNASSIGNED`.
fn assign(
    lab: &[[f32; 3]],
    mask: &[bool],
    w: usize,
    h: usize,
    step: f64,
    params: &SlicParams,
    centers: &mut [Center],
) -> Vec<u32> {
    let spatial_weight = (params.compactness / step).powi(2);
    let mut assignment = vec![UNASSIGNED; w * h];
    let mut distance = vec![f64::INFINITY; w * h];

    for _ in 0..params.max_iterations.max(1) {
        distance.fill(f64::INFINITY);
        let mut changed = false;

        for (k, c) in centers.iter().enumerate() {
            let x0 = (c.x - step).floor().max(0.0) as usize;
            let y0 = (c.y - step).floor().max(0.0) as usize;
            let x1 = ((c.x + step).ceil() as usize).min(w);
            let y1 = ((c.y + step).ceil() as usize).min(h);
            for y in y0..y1 {
                for x in x0..x1 {
                    let i = y * w + x;
                    if !mask[i] {
                        continue;
                    }
                    let px = lab[i];
                    let dl = px[0] as f64 - c.lab[0];
                    let da = px[1] as f64 - c.lab[1];
                    let db = px[2] as f64 - c.lab[2];
                    let dx = x as f64 + 0.5 - c.x;
                    let dy = y as f64 + 0.5 - c.y;
                    let d = dl * dl + da * da + db * db + (dx * dx + dy * dy) * spatial_weight;
                    if d < distance[i] {
                        distance[i] = d;
                        if assignment[i] != k as u32 {
                            assignment[i] = k as u32;
                            changed = true;
                        }
                    }
                }
            }
        }

        // Pixels that no center reached this round lose their stale label
        for i in 0..w * h {
            if distance[i].is_infinite() && assignment[i] != UNASSIGNED {
                assignment[i] = UNASSIGNED;
                changed = true;
            }
        }

        let mut sums = vec![[0.0f64; 6]; centers.len()];
        for (i, &a) in assignment.iter().enumerate() {
            if a == UNASSIGNED {
                continue;
            }
            let px = lab[i];
            let s = &mut sums[a as usize];
            s[0] += px[0] as f64;
            s[1] += px[1] as f64;
            s[2] += px[2] as f64;
            s[3] += (i % w) as f64 + 0.5;
            s[4] += (i / w) as f64 + 0.5;
            s[5] += 1.0;
        }
        for (c, s) in centers.iter_mut().zip(sums.iter()) {
            if s[5] > 0.0 {
                c.lab = [s[0] / s[5], s[1] / s[5], s[2] / s[5]];
                c.x = s[3] / s[5];
                c.y = s[4] / s[5];
            }
        }

        if !changed {
            break;
        }
    }
    assignment
}

/// Split clusters into connected fragments and fold small ones into their
/// neighbors.
///
/// A fragment is folded if it is unassigned or smaller than `min_fragment`;
/// it joins the adjacent group it shares the longest border with (lowest
/// label on ties). Fragments with no neighbor stand alone.
fn enforce_connectivity(keys: &[u32], width: u32, height: u32, min_fragment: u32) -> Vec<u32> {
    let w = width as usize;
    let h = height as usize;
    let labeling = label_components(keys, width, height, OUTSIDE);
    let n = labeling.components.len();
    if n == 0 {
        return vec![0; w * h];
    }

    // Shared border lengths between fragments (indices are label - 1)
    let mut borders: BTreeMap<(usize, usize), u32> = BTreeMap::new();
    let labels = &labeling.labels;
    for y in 0..h {
        for x in 0..w {
            let a = labels[y * w + x];
            if a == 0 {
                continue;
            }
            let mut touch = |b: u32| {
                if b != 0 && b != a {
                    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                    *borders.entry((lo as usize - 1, hi as usize - 1)).or_default() += 1;
                }
            };
            if x + 1 < w {
                touch(labels[y * w + x + 1]);
            }
            if y + 1 < h {
                touch(labels[(y + 1) * w + x]);
            }
        }
    }
    let mut neighbors: Vec<Vec<(usize, u32)>> = vec![Vec::new(); n];
    for (&(a, b), &len) in &borders {
        neighbors[a].push((b, len));
        neighbors[b].push((a, len));
    }

    let mut parent: Vec<usize> = (0..n).collect();
    let mut size: Vec<u32> = labeling.components.iter().map(|c| c.pixel_count).collect();
    fn root(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for idx in 0..n {
        let r = root(&mut parent, idx);
        if r != idx {
            continue;
        }
        let unassigned = labeling.components[idx].key == UNASSIGNED;
        if !unassigned && size[idx] >= min_fragment {
            continue;
        }

        // Border length toward each neighboring group
        let mut toward: BTreeMap<usize, u32> = BTreeMap::new();
        let adjacent = neighbors[idx].clone();
        for (other, len) in adjacent {
            let or = root(&mut parent, other);
            if or != idx {
                *toward.entry(or).or_default() += len;
            }
        }
        let target = toward
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(&g, _)| g);
        if let Some(g) = target {
            parent[idx] = g;
            size[g] += size[idx];
        }
    }

    // Renumber groups in raster order
    let group_keys: Vec<u32> = labels
        .iter()
        .map(|&l| {
            if l == 0 {
                OUTSIDE
            } else {
                root(&mut parent, l as usize - 1) as u32
            }
        })
        .collect();
    label_components(&group_keys, width, height, OUTSIDE).labels
}
