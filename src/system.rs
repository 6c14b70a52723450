use crate::seeds::PreparedSeeds;
use crate::sparse::{keep_columns, CsrMatrix, CsrOps};
use sprs::CsMat;
use log::debug;
use rayon::prelude::*;

/// Reduced system `A x_c = b_c` for every class `c`.
#[derive(Debug)]
pub struct ReducedSystem {
    /// Laplacian block of the unlabeled voxels.
    pub a: CsrMatrix,
    /// One right-hand side per class, `rhs[c][v]`.
    pub rhs: Vec<Vec<f64>>,
    /// Linear voxel index of every unknown, ascending.
    pub unlabeled: Vec<usize>,
}

/// Restricts the Laplacian to the domain voxels as if the excluded voxels had no edges.
///
/// Rows and columns outside of the domain become empty and the diagonal is rebalanced so that
/// every row of the domain still sums to zero.
pub fn restrict_to_domain(laplacian: &CsrMatrix, domain: &[bool]) -> CsrMatrix {
    assert_eq!(domain.len(), laplacian.rows());
    let mut indptr = Vec::with_capacity(laplacian.rows() + 1);
    let mut indices = Vec::with_capacity(laplacian.nnz());
    let mut data = Vec::with_capacity(laplacian.nnz());
    indptr.push(0);
    for (row, inside) in domain.iter().enumerate() {
        if *inside {
            let (cols, vals) = laplacian.row_entries(row);
            let degree: f64 = cols
                .iter()
                .zip(vals)
                .filter(|(c, _)| **c != row && domain[**c])
                .map(|(_, v)| -v)
                .sum();
            for (c, v) in cols.iter().zip(vals) {
                if *c == row {
                    indices.push(*c);
                    data.push(degree);
                } else if domain[*c] {
                    indices.push(*c);
                    data.push(*v);
                }
            }
        }
        indptr.push(indices.len());
    }
    CsMat::new(laplacian.shape(), indptr, indices, data)
}

/// Splits the Laplacian into the unlabeled block and the per-class right-hand sides.
///
/// Returns `None` when there is no unlabeled voxel in the domain.
pub fn build_linear_system(laplacian: &CsrMatrix, seeds: &PreparedSeeds) -> Option<ReducedSystem> {
    assert_eq!(laplacian.rows(), seeds.labels.len());
    let restricted;
    let laplacian = match &seeds.domain {
        Some(domain) => {
            restricted = restrict_to_domain(laplacian, domain);
            &restricted
        }
        None => laplacian,
    };
    let inside = |i: usize| seeds.domain.as_ref().map_or(true, |d| d[i]);

    let unlabeled: Vec<usize> = (0..seeds.labels.len())
        .filter(|i| inside(*i) && seeds.labels[*i] == 0)
        .collect();
    if unlabeled.is_empty() {
        return None;
    }
    let seeded: Vec<usize> = (0..seeds.labels.len())
        .filter(|i| inside(*i) && seeds.labels[*i] > 0)
        .collect();

    let n = laplacian.cols();
    let a = laplacian.submatrix(&unlabeled, &keep_columns(n, &unlabeled), unlabeled.len());
    let to_seeded = laplacian.submatrix(&unlabeled, &keep_columns(n, &seeded), seeded.len());

    let seed_classes: Vec<i32> = seeded.iter().map(|i| seeds.labels[*i]).collect();
    let rhs: Vec<Vec<f64>> = (1..=seeds.num_classes as i32)
        .into_par_iter()
        .map(|class| {
            let indicator: Vec<f64> = seed_classes
                .iter()
                .map(|c| if *c == class { 1.0 } else { 0.0 })
                .collect();
            let mut b = to_seeded.spmv(&indicator);
            b.iter_mut().for_each(|v| *v = -*v);
            b
        })
        .collect();
    debug!(
        "linear system: {} unknowns, {} seeds, {} classes, {} non-zeros",
        unlabeled.len(),
        seeded.len(),
        seeds.num_classes,
        a.nnz()
    );
    Some(ReducedSystem { a, rhs, unlabeled })
}

#[cfg(test)]
mod tests {
    use super::{build_linear_system, restrict_to_domain};
    use crate::arrays::Array3D;
    use crate::graph::make_graph_edges;
    use crate::laplacian::build_laplacian;
    use crate::seeds::{preprocess, Preprocessed};
    use crate::sparse::CsrOps;

    fn uniform_laplacian(shape: [usize; 3]) -> crate::sparse::CsrMatrix {
        let edges = make_graph_edges(shape);
        let weights = vec![1.0; edges.len()];
        build_laplacian(&edges, &weights, shape.iter().product())
    }

    #[test]
    fn path_graph_system() {
        // 1 - 0 - 0 - 2 on a path
        let seeds = Array3D::from_slice_2d(&[1, 0, 0, 2], 4, 1).unwrap();
        let Preprocessed::Solve(p) = preprocess(&seeds).unwrap() else {
            panic!("expected solve")
        };
        let lap = uniform_laplacian([4, 1, 1]);
        let sys = build_linear_system(&lap, &p).unwrap();
        assert_eq!(sys.unlabeled, vec![1, 2]);
        assert_eq!(sys.a.to_dense_vec(), vec![2.0, -1.0, -1.0, 2.0]);
        assert_eq!(sys.rhs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(sys.a.is_symmetric_within(0.0));
    }

    #[test]
    fn domain_restriction_rebalances_diagonal() {
        let lap = uniform_laplacian([3, 1, 1]);
        let restricted = restrict_to_domain(&lap, &[true, true, false]);
        assert_eq!(restricted.value(1, 1), 1.0);
        assert_eq!(restricted.value(1, 2), 0.0);
        assert_eq!(restricted.row_entries(2).0.len(), 0);
        let sums = restricted.row_sums();
        assert!(sums.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn excluded_voxels_never_enter() {
        let seeds = Array3D::from_slice_2d(&[1, 0, -1, 0, 2], 5, 1).unwrap();
        let Preprocessed::Solve(p) = preprocess(&seeds).unwrap() else {
            panic!("expected solve")
        };
        let lap = uniform_laplacian([5, 1, 1]);
        let sys = build_linear_system(&lap, &p).unwrap();
        assert_eq!(sys.unlabeled, vec![1, 3]);
        // neighbors through the excluded voxel are gone
        assert_eq!(sys.a.to_dense_vec(), vec![1.0, 0.0, 0.0, 1.0]);
        assert_eq!(sys.rhs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }
}
