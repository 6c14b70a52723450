use crate::common::split_length_to_ranges;
use assume::assume;
use rayon::current_num_threads;
use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

/// Connected components of the active domain.
#[derive(Debug)]
pub struct ComponentSet {
    pub num_components: u32,
    /// Component of every voxel, `u32::MAX` outside of the domain.
    pub component_assignment: Vec<u32>,
}

/// Union-find where every parent index is lower or equal to the node index.
pub struct DisjointSet {
    parents: Vec<AtomicU32>,
}

impl DisjointSet {
    pub fn new(size: u32) -> Self {
        assert!(size < u32::MAX, "Size must be smaller than {}", u32::MAX);
        DisjointSet {
            parents: (0..size).map(AtomicU32::new).collect(),
        }
    }

    #[inline]
    pub fn merge(&self, node_i: u32, node_j: u32) {
        // NOTE: Not safe for concurrent merges touching the same trees. Callers partition the
        //  volume into row ranges, every thread only merges nodes of its own range and parents
        //  never point out of a range because they are always lower or equal to the node.
        let mut root_x = node_i as usize;
        let mut root_y = node_j as usize;
        let mut parent_x = self.parents[root_x].load(Ordering::Relaxed);
        let mut parent_y = self.parents[root_y].load(Ordering::Relaxed);
        while parent_x != parent_y {
            if parent_x > parent_y {
                assume!(unsafe: root_x < self.parents.len(), "root: {root_x} > {}", self.parents.len());
                if root_x as u32 == parent_x {
                    self.parents[root_x].store(parent_y, Ordering::Relaxed);
                    break;
                }
                let z = parent_x as usize;
                parent_x = self.parents[z].load(Ordering::Relaxed);
                self.parents[root_x].store(parent_y, Ordering::Relaxed);
                root_x = z;
            } else {
                assume!(unsafe: root_y < self.parents.len(), "root: {root_y} > {}", self.parents.len());
                if root_y as u32 == parent_y {
                    self.parents[root_y].store(parent_x, Ordering::Relaxed);
                    break;
                }
                let z = parent_y as usize;
                parent_y = self.parents[z].load(Ordering::Relaxed);
                self.parents[root_y].store(parent_x, Ordering::Relaxed);
                root_y = z;
            }
        }
    }

    /// Dense component numbering in order of the component leaders (lowest index).
    ///
    /// Nodes where `in_domain` is false get `u32::MAX`.
    pub fn flatten(&self, in_domain: &[bool]) -> ComponentSet {
        let mut component_assignment = vec![u32::MAX; self.parents.len()];
        let mut num_components = 0u32;
        for i in 0..self.parents.len() {
            if !in_domain[i] {
                continue;
            }
            let parent = self.parents[i].load(Ordering::Relaxed) as usize;
            if parent == i {
                component_assignment[i] = num_components;
                num_components += 1;
            } else {
                // parent < i, its component is already known
                component_assignment[i] = component_assignment[parent];
            }
        }
        ComponentSet {
            num_components,
            component_assignment,
        }
    }
}

/// Labels 6-connected components of the voxels where `in_domain` is set.
///
/// The volume is viewed as `height * depth` rows of `width` voxels. Row ranges are merged in
/// parallel, edges crossing range boundaries are merged afterwards on one thread.
pub fn label_components(in_domain: &[bool], [width, height, depth]: [usize; 3]) -> ComponentSet {
    assert_eq!(in_domain.len(), width * height * depth);
    let cc_set = DisjointSet::new(in_domain.len() as u32);
    let num_rows = height * depth;
    let ranges = split_length_to_ranges(num_rows, current_num_threads());

    let link = |a: usize, b: usize| {
        if in_domain[a] && in_domain[b] {
            cc_set.merge(a as u32, b as u32);
        }
    };
    let neighbors_above = |row: usize| -> [Option<usize>; 2] {
        let y_up = (row % height > 0).then(|| row - 1);
        let z_up = (row >= height).then(|| row - height);
        [y_up, z_up]
    };

    let merge_range = |rows: Range<usize>| {
        for row in rows.clone() {
            let start = row * width;
            for x in 1..width {
                link(start + x - 1, start + x);
            }
            for up in neighbors_above(row).into_iter().flatten() {
                if up < rows.start {
                    continue;
                }
                for x in 0..width {
                    link(up * width + x, start + x);
                }
            }
        }
    };
    ranges.par_iter().for_each(|r| merge_range(r.clone()));

    // seams between the ranges
    for r in ranges.iter().skip(1) {
        let seam_end = (r.start + height).min(r.end);
        for row in r.start..seam_end {
            for up in neighbors_above(row).into_iter().flatten() {
                if up >= r.start {
                    continue;
                }
                for x in 0..width {
                    link(up * width + x, row * width + x);
                }
            }
        }
    }
    cc_set.flatten(in_domain)
}
