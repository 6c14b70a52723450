use crate::common::split_length_to_ranges;
use crate::graph::Edge;
use crate::sparse::CsrMatrix;
use log::debug;
use rayon::current_num_threads;
use rayon::prelude::*;
use sprs::TriMat;

/// Builds the weighted graph Laplacian of `n` vertices.
///
/// Off-diagonal entries are `-w(i, j)` for both orientations of every edge, the diagonal holds
/// the vertex degree so that every row sums to zero. Every rayon task fills its own triplet
/// buffer, the buffers are concatenated in partition order and frozen once.
pub fn build_laplacian(edges: &[Edge], weights: &[f64], n: usize) -> CsrMatrix {
    assert_eq!(edges.len(), weights.len());
    let ranges = split_length_to_ranges(edges.len(), current_num_threads());
    let partitions: Vec<TriMat<f64>> = ranges
        .into_par_iter()
        .map(|r| {
            let mut tri = TriMat::with_capacity((n, n), 4 * r.len());
            for (edge, w) in edges[r.clone()].iter().zip(&weights[r]) {
                let (a, b) = (edge.a as usize, edge.b as usize);
                tri.add_triplet(a, b, -w);
                tri.add_triplet(b, a, -w);
                tri.add_triplet(a, a, *w);
                tri.add_triplet(b, b, *w);
            }
            tri
        })
        .collect();

    let capacity = 4 * edges.len() + n;
    let mut rows = Vec::with_capacity(capacity);
    let mut cols = Vec::with_capacity(capacity);
    let mut vals = Vec::with_capacity(capacity);
    for part in &partitions {
        rows.extend_from_slice(part.row_inds());
        cols.extend_from_slice(part.col_inds());
        vals.extend_from_slice(part.data());
    }
    drop(partitions);
    // isolated vertices still get an explicit (zero) diagonal
    rows.extend(0..n);
    cols.extend(0..n);
    vals.extend(std::iter::repeat(0.0).take(n));
    let laplacian: CsrMatrix = TriMat::from_triplets((n, n), rows, cols, vals).to_csr();
    debug!(
        "laplacian: {n} vertices, {} edges, {} stored entries",
        edges.len(),
        laplacian.nnz()
    );
    laplacian
}

#[cfg(test)]
mod tests {
    use super::build_laplacian;
    use crate::arrays::{Array3D, Volume};
    use crate::common::Config;
    use crate::graph::make_graph_edges;
    use crate::sparse::CsrOps;
    use crate::weights::compute_weights;

    fn ramp_volume() -> Volume {
        let data: Vec<f64> = (0..60).map(|i| ((i * 7) % 13) as f64).collect();
        Volume::new(Array3D::from_slice(&data, 5, 4, 3).unwrap())
    }

    #[test]
    fn rows_sum_to_zero() {
        let vol = ramp_volume();
        let edges = make_graph_edges(vol.shape());
        let w = compute_weights(&vol, &edges, &Config::default());
        let lap = build_laplacian(&edges, &w.weights, vol.num_voxels());
        for (i, s) in lap.row_sums().iter().enumerate() {
            assert!(s.abs() < 1e-12, "row {i} sums to {s}");
        }
    }

    #[test]
    fn symmetric_with_edge_weights() {
        let vol = ramp_volume();
        let edges = make_graph_edges(vol.shape());
        let w = compute_weights(&vol, &edges, &Config::default());
        let lap = build_laplacian(&edges, &w.weights, vol.num_voxels());
        assert!(lap.is_symmetric_within(0.0));
        for (e, weight) in edges.iter().zip(&w.weights) {
            assert_eq!(lap.value(e.a as usize, e.b as usize), -weight);
            assert_eq!(lap.value(e.b as usize, e.a as usize), -weight);
        }
        // 6-neighborhood + diagonal
        assert_eq!(lap.nnz(), 2 * edges.len() + vol.num_voxels());
    }

    #[test]
    fn positive_semi_definite_quadratic_form() {
        let vol = ramp_volume();
        let edges = make_graph_edges(vol.shape());
        let w = compute_weights(&vol, &edges, &Config::default());
        let lap = build_laplacian(&edges, &w.weights, vol.num_voxels());
        let x: Vec<f64> = (0..vol.num_voxels()).map(|i| (i as f64).sin()).collect();
        let lx = lap.spmv(&x);
        let quad: f64 = x.iter().zip(&lx).map(|(a, b)| a * b).sum();
        assert!(quad >= 0.0);
        let ones = vec![1.0; vol.num_voxels()];
        assert!(lap.spmv(&ones).iter().all(|v| v.abs() < 1e-12));
    }
}
