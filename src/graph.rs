//! Lattice adjacency of the voxel grid.
//!
//! Only axis-aligned neighbors are connected (6-neighborhood in 3D, 4-neighborhood in a single
//! slice). Edges are stored grouped by axis, x edges first, then y and z, every edge as
//! `(lower index, upper index)`.

/// Lattice axis along which an edge runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub a: u32,
    pub b: u32,
    pub axis: Axis,
}

/// Number of lattice edges for the shape.
pub fn num_edges([width, height, depth]: [usize; 3]) -> usize {
    width.saturating_sub(1) * height * depth
        + width * height.saturating_sub(1) * depth
        + width * height * depth.saturating_sub(1)
}

/// Enumerates all lattice edges of the `[width, height, depth]` grid.
///
/// The caller guarantees that the voxel count fits into `u32`.
pub fn make_graph_edges([width, height, depth]: [usize; 3]) -> Vec<Edge> {
    let mut edges = Vec::with_capacity(num_edges([width, height, depth]));
    let plane = width * height;
    for z in 0..depth {
        for y in 0..height {
            let row = z * plane + y * width;
            for x in 1..width {
                edges.push(Edge {
                    a: (row + x - 1) as u32,
                    b: (row + x) as u32,
                    axis: Axis::X,
                });
            }
        }
    }
    for z in 0..depth {
        for y in 1..height {
            let row = z * plane + y * width;
            for x in 0..width {
                edges.push(Edge {
                    a: (row + x - width) as u32,
                    b: (row + x) as u32,
                    axis: Axis::Y,
                });
            }
        }
    }
    for z in 1..depth {
        for i in 0..plane {
            let idx = z * plane + i;
            edges.push(Edge {
                a: (idx - plane) as u32,
                b: idx as u32,
                axis: Axis::Z,
            });
        }
    }
    debug_assert_eq!(edges.len(), edges.capacity());
    edges
}
