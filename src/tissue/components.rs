//! 4-connected component labeling.
//!
//! Neighboring pixels with the same key join the same component. One key
//! value can be declared as background and is never labeled. Labels are
//! assigned in raster order of each component's first pixel, starting at 1,
//! so the output depends only on the input raster.
//!
//! [`UnionFind`] is also used to merge superpixels into regions.

use std::collections::HashMap;

use image::{ImageBuffer, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::geometry::PixelBox;

/// Disjoint-set forest with path halving and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len as u32).collect(),
            rank: vec![0; len],
        }
    }

    pub fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    /// Merge the sets of `a` and `b`, returning the new root.
    pub fn union(&mut self, a: u32, b: u32) -> u32 {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }
        let (high, low) = if self.rank[ra as usize] >= self.rank[rb as usize] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[low as usize] = high;
        if self.rank[high as usize] == self.rank[low as usize] {
            self.rank[high as usize] += 1;
        }
        high
    }
}

/// One labeled component.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Label in the output raster (1-based)
    pub label: u32,

    /// Input key shared by every pixel of the component
    pub key: u32,

    /// Number of pixels
    pub pixel_count: u32,

    /// Pixel bounds
    pub bbox: PixelBox,
}

/// Result of labeling a raster.
#[derive(Debug, Clone)]
pub struct Labeling {
    pub width: u32,
    pub height: u32,

    /// Component label per pixel, 0 for background
    pub labels: Vec<u32>,

    /// Components indexed by `label - 1`
    pub components: Vec<Component>,
}

/// Label 4-connected runs of equal keys.
///
/// Pixels whose key equals `background` get label 0.
pub fn label_components(keys: &[u32], width: u32, height: u32, background: u32) -> Labeling {
    let raster = match ImageBuffer::<Luma<u32>, Vec<u32>>::from_raw(width, height, keys.to_vec()) {
        Some(raster) if !keys.is_empty() => raster,
        _ => {
            return Labeling {
                width,
                height,
                labels: vec![0; keys.len()],
                components: Vec::new(),
            }
        }
    };
    let raw = connected_components(&raster, Connectivity::Four, Luma([background])).into_raw();

    // Renumber in raster order of each component's first pixel.
    let mut renumber: HashMap<u32, u32> = HashMap::new();
    let mut labels = vec![0u32; raw.len()];
    let mut components: Vec<Component> = Vec::new();
    let w = width as usize;
    for (i, &found) in raw.iter().enumerate() {
        if found == 0 {
            continue;
        }
        let (x, y) = ((i % w) as u32, (i / w) as u32);
        let label = *renumber.entry(found).or_insert_with(|| {
            components.push(Component {
                label: components.len() as u32 + 1,
                key: keys[i],
                pixel_count: 0,
                bbox: PixelBox::pixel(x, y),
            });
            components.len() as u32
        });
        labels[i] = label;
        let component = &mut components[label as usize - 1];
        component.pixel_count += 1;
        component.bbox.include(x, y);
    }

    Labeling {
        width,
        height,
        labels,
        components,
    }
}

impl Labeling {
    /// Drop components smaller than `min_size` pixels and relabel the rest
    /// consecutively, preserving order.
    pub fn retain_min_size(self, min_size: u32) -> Self {
        let mut remap = vec![0u32; self.components.len() + 1];
        let mut components = Vec::new();
        for component in self.components {
            if component.pixel_count >= min_size {
                let label = components.len() as u32 + 1;
                remap[component.label as usize] = label;
                components.push(Component { label, ..component });
            }
        }
        let labels = self.labels.iter().map(|&l| remap[l as usize]).collect();
        Self {
            width: self.width,
            height: self.height,
            labels,
            components,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
