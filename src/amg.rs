//! Smoothed aggregation algebraic multigrid, used as a preconditioner for conjugate gradient.
//!
//! Every level groups strongly coupled unknowns into aggregates. The piecewise constant
//! tentative prolongator is smoothed by one damped Jacobi step of the filtered operator (weak
//! couplings lumped into the diagonal) and the coarse operator is the Galerkin product `Pᵀ A P`.
//! Unknowns without any strong coupling are left out of the aggregates, the smoother handles
//! them alone. The V-cycle uses the same number of damped Jacobi sweeps before and after the
//! coarse correction, so the preconditioner stays symmetric.
use crate::common::AmgConfig;
use crate::sparse::{CsrMatrix, CsrOps};
use log::{debug, warn};
use multiversion::multiversion;
use sprs::TriMat;

/// Largest coarse level factorized densely.
const DENSE_COARSE_LIMIT: usize = 1024;
/// Jacobi sweeps used when the coarsest level can't be factorized.
const COARSE_FALLBACK_SWEEPS: usize = 32;
/// Coarsening stops when a level keeps more than this fraction of its unknowns.
const MAX_COARSENING_RATIO: f64 = 0.8;
/// Average stored entries per coarse row above which the unsmoothed prolongator is used instead.
const MAX_COARSE_ROW_FILL: usize = 32;
const UNAGGREGATED: usize = usize::MAX;

#[derive(Debug)]
struct Level {
    a: CsrMatrix,
    p: CsrMatrix,
    r: CsrMatrix,
    inv_diag: Vec<f64>,
    omega: f64,
}

#[derive(Debug)]
enum CoarseSolver {
    Cholesky { n: usize, lower: Vec<f64> },
    Jacobi { a: CsrMatrix, inv_diag: Vec<f64>, omega: f64 },
}

/// Multigrid hierarchy. Immutable after construction, shared between solver threads.
#[derive(Debug)]
pub struct AmgHierarchy {
    levels: Vec<Level>,
    coarse: CoarseSolver,
    /// Rows and stored entries of the coarsest operator.
    coarse_size: (usize, usize),
    sweeps: usize,
}

fn inverse_diagonal(a: &CsrMatrix) -> Vec<f64> {
    a.diagonal_values()
        .into_iter()
        .map(|d| if d > 0.0 { 1.0 / d } else { 0.0 })
        .collect()
}

/// Gershgorin bound of the spectral radius of `D⁻¹ A`.
fn spectral_radius_bound(a: &CsrMatrix, inv_diag: &[f64]) -> f64 {
    (0..a.rows())
        .map(|i| a.row_entries(i).1.iter().map(|v| v.abs()).sum::<f64>() * inv_diag[i])
        .fold(0.0, f64::max)
        .max(f64::MIN_POSITIVE)
}

/// Strong neighbors of every row, `|a_ij| >= theta * sqrt(a_ii * a_jj)`.
fn strong_connections(a: &CsrMatrix, theta: f64) -> Vec<Vec<usize>> {
    let diag = a.diagonal_values();
    (0..a.rows())
        .map(|i| {
            let (cols, vals) = a.row_entries(i);
            cols.iter()
                .zip(vals)
                .filter(|(j, v)| **j != i && v.abs() >= theta * (diag[i] * diag[**j]).abs().sqrt())
                .map(|(j, _)| *j)
                .collect()
        })
        .collect()
}

/// Greedy three pass aggregation. Returns the aggregate of every node and the aggregate count.
///
/// Nodes without strong neighbors stay [`UNAGGREGATED`].
fn aggregate(strong: &[Vec<usize>]) -> (Vec<usize>, usize) {
    let n = strong.len();
    let mut agg = vec![UNAGGREGATED; n];
    let mut count = 0;
    // whole neighborhoods that are still free become aggregates
    for i in 0..n {
        if agg[i] != UNAGGREGATED || strong[i].is_empty() {
            continue;
        }
        if strong[i].iter().all(|j| agg[*j] == UNAGGREGATED) {
            agg[i] = count;
            for j in &strong[i] {
                agg[*j] = count;
            }
            count += 1;
        }
    }
    // attach leftovers to a neighboring aggregate
    let first_pass = agg.clone();
    for i in 0..n {
        if agg[i] != UNAGGREGATED {
            continue;
        }
        if let Some(j) = strong[i].iter().find(|j| first_pass[**j] != UNAGGREGATED) {
            agg[i] = first_pass[*j];
        }
    }
    // whatever remains forms new aggregates
    for i in 0..n {
        if agg[i] != UNAGGREGATED || strong[i].is_empty() {
            continue;
        }
        agg[i] = count;
        for j in &strong[i] {
            if agg[*j] == UNAGGREGATED {
                agg[*j] = count;
            }
        }
        count += 1;
    }
    (agg, count)
}

fn tentative_prolongator(agg: &[usize], num_aggregates: usize) -> CsrMatrix {
    let mut sizes = vec![0usize; num_aggregates];
    for a in agg.iter().filter(|a| **a != UNAGGREGATED) {
        sizes[*a] += 1;
    }
    let mut tri = TriMat::with_capacity((agg.len(), num_aggregates), agg.len());
    for (i, a) in agg.iter().enumerate() {
        if *a != UNAGGREGATED {
            tri.add_triplet(i, *a, 1.0 / (sizes[*a] as f64).sqrt());
        }
    }
    tri.to_csr()
}

/// Keeps the diagonal and the strong couplings, weak couplings are added to the diagonal so the
/// row sums don't change.
fn filtered_matrix(a: &CsrMatrix, strong: &[Vec<usize>]) -> CsrMatrix {
    let mut tri = TriMat::with_capacity(a.shape(), a.nnz());
    for (i, neighbors) in strong.iter().enumerate() {
        let (cols, vals) = a.row_entries(i);
        let mut diag = 0.0;
        for (j, v) in cols.iter().zip(vals) {
            if *j == i || neighbors.binary_search(j).is_err() {
                diag += v;
            } else {
                tri.add_triplet(i, *j, *v);
            }
        }
        tri.add_triplet(i, i, diag);
    }
    tri.to_csr()
}

/// `P = (I - omega D⁻¹ A) T`.
fn smooth_prolongator(a: &CsrMatrix, t: &CsrMatrix, inv_diag: &[f64], omega: f64) -> CsrMatrix {
    let at = a * t;
    let mut tri = TriMat::with_capacity(t.shape(), t.nnz() + at.nnz());
    for row in 0..t.rows() {
        let (cols, vals) = t.row_entries(row);
        for (c, v) in cols.iter().zip(vals) {
            tri.add_triplet(row, *c, *v);
        }
        let scale = -omega * inv_diag[row];
        let (cols, vals) = at.row_entries(row);
        for (c, v) in cols.iter().zip(vals) {
            tri.add_triplet(row, *c, scale * v);
        }
    }
    tri.to_csr()
}

/// Restriction `R = Pᵀ` and the coarse operator `R A P`.
fn galerkin(a: &CsrMatrix, p: &CsrMatrix) -> (CsrMatrix, CsrMatrix) {
    let r = p.transpose_csr();
    let ap = a * p;
    let coarse = &r * &ap;
    (r, coarse)
}

/// Dense Cholesky factor (row-major lower triangle). `None` when not positive definite.
fn cholesky(mut dense: Vec<f64>, n: usize) -> Option<Vec<f64>> {
    for j in 0..n {
        let mut d = dense[j * n + j];
        for k in 0..j {
            d -= dense[j * n + k] * dense[j * n + k];
        }
        if d.is_nan() || d <= 0.0 {
            return None;
        }
        let d = d.sqrt();
        dense[j * n + j] = d;
        for i in j + 1..n {
            let mut s = dense[i * n + j];
            for k in 0..j {
                s -= dense[i * n + k] * dense[j * n + k];
            }
            dense[i * n + j] = s / d;
        }
    }
    for i in 0..n {
        for j in i + 1..n {
            dense[i * n + j] = 0.0;
        }
    }
    Some(dense)
}

fn cholesky_solve(lower: &[f64], n: usize, b: &[f64]) -> Vec<f64> {
    let mut y = b.to_vec();
    for i in 0..n {
        let mut s = y[i];
        for k in 0..i {
            s -= lower[i * n + k] * y[k];
        }
        y[i] = s / lower[i * n + i];
    }
    for i in (0..n).rev() {
        let mut s = y[i];
        for k in i + 1..n {
            s -= lower[k * n + i] * y[k];
        }
        y[i] = s / lower[i * n + i];
    }
    y
}

#[multiversion(targets = "simd")]
fn jacobi_update(x: &mut [f64], b: &[f64], ax: &[f64], inv_diag: &[f64], omega: f64) {
    for (((x, b), ax), d) in x.iter_mut().zip(b).zip(ax).zip(inv_diag) {
        *x += omega * d * (b - ax);
    }
}

fn jacobi(a: &CsrMatrix, inv_diag: &[f64], omega: f64, x: &mut [f64], b: &[f64], sweeps: usize) {
    let mut ax = vec![0.0; x.len()];
    for _ in 0..sweeps {
        a.spmv_into(x, &mut ax);
        jacobi_update(x, b, &ax, inv_diag, omega);
    }
}

impl AmgHierarchy {
    pub fn new(a: &CsrMatrix, config: &AmgConfig) -> Self {
        let mut levels: Vec<Level> = Vec::new();
        let mut current = a.clone();
        while levels.len() + 1 < config.max_levels.max(1) && current.rows() > config.coarse_size {
            let n = current.rows();
            let strong = strong_connections(&current, config.strength_threshold);
            let (agg, num_aggregates) = aggregate(&strong);
            if num_aggregates == 0 || num_aggregates as f64 > MAX_COARSENING_RATIO * n as f64 {
                debug!("amg coarsening stalled at {n} unknowns ({num_aggregates} aggregates)");
                break;
            }
            let t = tentative_prolongator(&agg, num_aggregates);
            let filtered = filtered_matrix(&current, &strong);
            let inv_diag_f = inverse_diagonal(&filtered);
            let rho_f = spectral_radius_bound(&filtered, &inv_diag_f);
            let mut p =
                smooth_prolongator(&filtered, &t, &inv_diag_f, config.jacobi_weight / rho_f);
            let (mut r, mut coarse) = galerkin(&current, &p);
            if coarse.nnz() > MAX_COARSE_ROW_FILL * coarse.rows() {
                debug!(
                    "amg level {}: smoothed coarse operator too dense ({} non-zeros), using the tentative prolongator",
                    levels.len(),
                    coarse.nnz()
                );
                (r, coarse) = galerkin(&current, &t);
                p = t;
                if coarse.nnz() > MAX_COARSE_ROW_FILL * coarse.rows() {
                    debug!("amg coarsening stopped at {n} unknowns, coarse operator too dense");
                    break;
                }
            }

            let inv_diag = inverse_diagonal(&current);
            let rho = spectral_radius_bound(&current, &inv_diag);
            debug!(
                "amg level {}: {n} unknowns -> {num_aggregates} aggregates, {} -> {} non-zeros",
                levels.len(),
                current.nnz(),
                coarse.nnz()
            );
            levels.push(Level {
                a: current,
                p,
                r,
                inv_diag,
                omega: config.jacobi_weight / rho,
            });
            current = coarse;
        }

        let n = current.rows();
        let coarse_size = (n, current.nnz());
        let factor = if n <= DENSE_COARSE_LIMIT {
            cholesky(current.to_dense_vec(), n)
        } else {
            None
        };
        let coarse = match factor {
            Some(lower) => CoarseSolver::Cholesky { n, lower },
            None => {
                warn!("coarsest multigrid level ({n} unknowns) is solved approximately");
                let inv_diag = inverse_diagonal(&current);
                let rho = spectral_radius_bound(&current, &inv_diag);
                CoarseSolver::Jacobi {
                    a: current,
                    inv_diag,
                    omega: config.jacobi_weight / rho,
                }
            }
        };
        AmgHierarchy {
            levels,
            coarse,
            coarse_size,
            sweeps: config.smoothing_sweeps,
        }
    }

    /// Number of levels including the coarsest one.
    pub fn num_levels(&self) -> usize {
        self.levels.len() + 1
    }

    /// Rows and stored entries of the operator on every level, finest first.
    pub fn level_sizes(&self) -> Vec<(usize, usize)> {
        self.levels
            .iter()
            .map(|l| (l.a.rows(), l.a.nnz()))
            .chain(std::iter::once(self.coarse_size))
            .collect()
    }

    fn solve_coarse(&self, b: &[f64]) -> Vec<f64> {
        match &self.coarse {
            CoarseSolver::Cholesky { n, lower } => cholesky_solve(lower, *n, b),
            CoarseSolver::Jacobi { a, inv_diag, omega } => {
                let mut x = vec![0.0; b.len()];
                jacobi(a, inv_diag, *omega, &mut x, b, COARSE_FALLBACK_SWEEPS);
                x
            }
        }
    }

    fn v_cycle(&self, level: usize, b: &[f64]) -> Vec<f64> {
        let Some(lvl) = self.levels.get(level) else {
            return self.solve_coarse(b);
        };
        let mut x = vec![0.0; b.len()];
        jacobi(&lvl.a, &lvl.inv_diag, lvl.omega, &mut x, b, self.sweeps);
        let ax = lvl.a.spmv(&x);
        let residual: Vec<f64> = b.iter().zip(&ax).map(|(b, ax)| b - ax).collect();
        let coarse_x = self.v_cycle(level + 1, &lvl.r.spmv(&residual));
        let correction = lvl.p.spmv(&coarse_x);
        x.iter_mut().zip(&correction).for_each(|(x, c)| *x += c);
        jacobi(&lvl.a, &lvl.inv_diag, lvl.omega, &mut x, b, self.sweeps);
        x
    }

    /// Applies one V-cycle, `z ≈ A⁻¹ r`.
    pub fn apply(&self, r: &[f64]) -> Vec<f64> {
        self.v_cycle(0, r)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        aggregate, cholesky, cholesky_solve, filtered_matrix, strong_connections, AmgHierarchy,
        MAX_COARSENING_RATIO, MAX_COARSE_ROW_FILL, UNAGGREGATED,
    };
    use crate::arrays::{Array3D, Volume};
    use crate::common::{AmgConfig, Config};
    use crate::graph::make_graph_edges;
    use crate::laplacian::build_laplacian;
    use crate::seeds::{preprocess, Preprocessed};
    use crate::sparse::{CsrMatrix, CsrOps};
    use crate::system::build_linear_system;
    use crate::weights::compute_weights;
    use sprs::TriMat;

    /// Dirichlet Laplacian of an `n x n` grid (SPD).
    fn grid_matrix(n: usize) -> CsrMatrix {
        let mut tri = TriMat::new((n * n, n * n));
        for y in 0..n {
            for x in 0..n {
                let i = y * n + x;
                tri.add_triplet(i, i, 4.0);
                if x > 0 {
                    tri.add_triplet(i, i - 1, -1.0);
                }
                if x + 1 < n {
                    tri.add_triplet(i, i + 1, -1.0);
                }
                if y > 0 {
                    tri.add_triplet(i, i - n, -1.0);
                }
                if y + 1 < n {
                    tri.add_triplet(i, i + n, -1.0);
                }
            }
        }
        tri.to_csr()
    }

    /// Random walker system of a noisy disc in raw intensities (no rescaling), seeds on the top
    /// and bottom rows and a stroke inside the disc. Edge weights span many orders of magnitude.
    fn noisy_disc_system(size: usize) -> CsrMatrix {
        let c = size as f64 / 2.0;
        let radius = size as f64 / 3.0;
        let data: Vec<f64> = (0..size * size)
            .map(|i| {
                let (x, y) = (i % size, i / size);
                let (dx, dy) = (x as f64 - c, y as f64 - c);
                let base = if dx * dx + dy * dy < radius * radius { 170.0 } else { 40.0 };
                base + ((x * 7919 + y * 104729) % 23) as f64
            })
            .collect();
        let volume = Volume::new(Array3D::from_slice_2d(&data, size, size).unwrap());
        let mut seeds = Array3D::from_fill(0i32, size, size, 1);
        for x in 0..size {
            seeds[(x, 0, 0)] = 2;
            seeds[(x, size - 1, 0)] = 2;
        }
        for x in size * 2 / 5..size * 3 / 5 {
            seeds[(x, size / 2, 0)] = 1;
        }
        let Preprocessed::Solve(prepared) = preprocess(&seeds).unwrap() else {
            panic!("expected solve")
        };
        let edges = make_graph_edges(volume.shape());
        let weights = compute_weights(&volume, &edges, &Config::default());
        let laplacian = build_laplacian(&edges, &weights.weights, volume.num_voxels());
        build_linear_system(&laplacian, &prepared).unwrap().a
    }

    #[test]
    fn dense_cholesky() {
        let a = vec![4.0, 2.0, 2.0, 3.0];
        let l = cholesky(a, 2).unwrap();
        let x = cholesky_solve(&l, 2, &[6.0, 5.0]);
        assert!((x[0] - 1.0).abs() < 1e-12 && (x[1] - 1.0).abs() < 1e-12);
        assert!(cholesky(vec![1.0, 2.0, 2.0, 1.0], 2).is_none());
    }

    #[test]
    fn aggregation_covers_all_nodes() {
        let a = grid_matrix(12);
        let (agg, count) = aggregate(&strong_connections(&a, 0.08));
        assert!(count > 0 && count < a.rows());
        assert!(agg.iter().all(|x| *x < count));
    }

    #[test]
    fn uncoupled_nodes_stay_unaggregated() {
        // 0 - 1 strongly coupled, 2 only weakly coupled to 1
        let mut tri = TriMat::new((3, 3));
        for (r, c, v) in [
            (0, 0, 1.0),
            (0, 1, -1.0),
            (1, 0, -1.0),
            (1, 1, 1.0 + 1e-8),
            (1, 2, -1e-8),
            (2, 1, -1e-8),
            (2, 2, 1.0),
        ] {
            tri.add_triplet(r, c, v);
        }
        let a: CsrMatrix = tri.to_csr();
        let strong = strong_connections(&a, 0.08);
        let (agg, count) = aggregate(&strong);
        assert_eq!(count, 1);
        assert_eq!(agg, vec![0, 0, UNAGGREGATED]);
        // weak coupling is lumped into the diagonal, row sums are kept
        let filtered = filtered_matrix(&a, &strong);
        assert_eq!(filtered.value(1, 2), 0.0);
        for (f, a) in filtered.row_sums().iter().zip(a.row_sums()) {
            assert!((f - a).abs() < 1e-15);
        }
    }

    #[test]
    fn hierarchy_coarsens_and_is_symmetric() {
        let a = grid_matrix(40);
        let config = AmgConfig {
            coarse_size: 50,
            ..AmgConfig::default()
        };
        let amg = AmgHierarchy::new(&a, &config);
        assert!(amg.num_levels() > 1);
        for lvl in &amg.levels {
            assert!(lvl.a.is_symmetric_within(1e-10));
        }
        // <M u, v> == <u, M v>
        let u: Vec<f64> = (0..a.rows()).map(|i| ((i * 13) % 7) as f64).collect();
        let v: Vec<f64> = (0..a.rows()).map(|i| ((i * 5) % 11) as f64 - 5.0).collect();
        let mu = amg.apply(&u);
        let mv = amg.apply(&v);
        let lhs: f64 = mu.iter().zip(&v).map(|(a, b)| a * b).sum();
        let rhs: f64 = u.iter().zip(&mv).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() <= 1e-8 * lhs.abs().max(1.0), "{lhs} != {rhs}");
    }

    #[test]
    fn v_cycle_reduces_error() {
        let a = grid_matrix(30);
        let config = AmgConfig {
            coarse_size: 40,
            ..AmgConfig::default()
        };
        let amg = AmgHierarchy::new(&a, &config);
        let x_true: Vec<f64> = (0..a.rows()).map(|i| (i as f64 * 0.1).sin()).collect();
        let b = a.spmv(&x_true);
        let x = amg.apply(&b);
        let err: f64 = x.iter().zip(&x_true).map(|(a, b)| (a - b).powi(2)).sum::<f64>().sqrt();
        let norm: f64 = x_true.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!(err < 0.5 * norm, "error {err} vs {norm}");
    }

    #[test]
    fn small_matrix_is_solved_directly() {
        let a = grid_matrix(5);
        let amg = AmgHierarchy::new(&a, &AmgConfig::default());
        assert_eq!(amg.num_levels(), 1);
        let b = vec![1.0; 25];
        let x = amg.apply(&b);
        let r = a.spmv(&x);
        assert!(r.iter().zip(&b).all(|(a, b)| (a - b).abs() < 1e-10));
    }

    #[test]
    fn noisy_raw_intensity_levels_stay_sparse() {
        let a = noisy_disc_system(128);
        let amg = AmgHierarchy::new(&a, &AmgConfig::default());
        let sizes = amg.level_sizes();
        assert_eq!(sizes[0], (a.rows(), a.nnz()));
        for pair in sizes.windows(2) {
            let ((n_fine, _), (n_coarse, nnz_coarse)) = (pair[0], pair[1]);
            assert!(
                n_coarse as f64 <= MAX_COARSENING_RATIO * n_fine as f64,
                "{sizes:?}"
            );
            assert!(nnz_coarse <= MAX_COARSE_ROW_FILL * n_coarse, "{sizes:?}");
        }
        // the preconditioner stays a usable symmetric operator
        let u: Vec<f64> = (0..a.rows()).map(|i| ((i * 13) % 7) as f64).collect();
        let mu = amg.apply(&u);
        assert!(mu.iter().all(|v| v.is_finite()));
        let quad: f64 = mu.iter().zip(&u).map(|(a, b)| a * b).sum();
        assert!(quad > 0.0);
    }
}
