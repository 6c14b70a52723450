//! Sparse matrix helpers for the graph Laplacian and the multigrid hierarchy.
//!
//! Matrices are assembled as triplets in [`sprs::TriMat`] and frozen once into compressed rows
//! ([`CsrMatrix`]). A frozen matrix is never modified in place, derived matrices (submatrices,
//! products, transposes) are new allocations. [`CsrOps`] adds the operations the solver needs on
//! top of `sprs`.
use assume::assume;
use multiversion::multiversion;
use rayon::prelude::*;
use sprs::CsMat;

/// Compressed sparse row matrix with sorted column indices in every row.
pub type CsrMatrix = CsMat<f64>;

/// Column index marking a dropped column in [`CsrOps::submatrix`].
pub const DROPPED: usize = usize::MAX;

/// Rows per rayon task in the parallel matrix-vector product.
const SPMV_PAR_ROWS: usize = 8192;

#[multiversion(targets = "simd")]
fn spmv_rows(
    indptr: &[usize],
    indices: &[usize],
    data: &[f64],
    row_start: usize,
    x: &[f64],
    y: &mut [f64],
) {
    for (local, out) in y.iter_mut().enumerate() {
        let row = row_start + local;
        let mut acc = 0.0;
        for k in indptr[row]..indptr[row + 1] {
            let col = indices[k];
            assume!(unsafe: col < x.len(), "column {col} >= {}", x.len());
            acc += data[k] * x[col];
        }
        *out = acc;
    }
}

/// Operations on compressed row matrices used by the linear system and the solver.
pub trait CsrOps {
    /// Column indices and values of `row`.
    fn row_entries(&self, row: usize) -> (&[usize], &[f64]);
    /// Stored value at `(row, col)` or 0.
    fn value(&self, row: usize, col: usize) -> f64;
    fn diagonal_values(&self) -> Vec<f64>;
    fn row_sums(&self) -> Vec<f64>;
    /// `y = A x`. Large matrices are split into row blocks processed by rayon.
    fn spmv_into(&self, x: &[f64], y: &mut [f64]);
    fn spmv(&self, x: &[f64]) -> Vec<f64>;
    fn transpose_csr(&self) -> CsrMatrix;
    /// Extracts rows `rows` (in the given order) and renumbers columns through `col_map`.
    ///
    /// `col_map[c]` is the new index of column `c` or [`DROPPED`].
    fn submatrix(&self, rows: &[usize], col_map: &[usize], n_cols: usize) -> CsrMatrix;
    /// Row-major dense copy.
    fn to_dense_vec(&self) -> Vec<f64>;
    fn is_symmetric_within(&self, tol: f64) -> bool;
}

impl CsrOps for CsrMatrix {
    #[inline]
    fn row_entries(&self, row: usize) -> (&[usize], &[f64]) {
        let range = {
            let indptr = self.proper_indptr();
            indptr[row]..indptr[row + 1]
        };
        (&self.indices()[range.clone()], &self.data()[range])
    }

    fn value(&self, row: usize, col: usize) -> f64 {
        let (cols, vals) = self.row_entries(row);
        match cols.binary_search(&col) {
            Ok(k) => vals[k],
            Err(_) => 0.0,
        }
    }

    fn diagonal_values(&self) -> Vec<f64> {
        (0..self.rows().min(self.cols()))
            .map(|i| self.value(i, i))
            .collect()
    }

    fn row_sums(&self) -> Vec<f64> {
        (0..self.rows())
            .map(|i| self.row_entries(i).1.iter().sum())
            .collect()
    }

    fn spmv_into(&self, x: &[f64], y: &mut [f64]) {
        assert!(self.is_csr());
        assert_eq!(x.len(), self.cols());
        assert_eq!(y.len(), self.rows());
        let indptr = self.proper_indptr();
        let (indices, data) = (self.indices(), self.data());
        if self.rows() < 2 * SPMV_PAR_ROWS {
            spmv_rows(&indptr, indices, data, 0, x, y);
            return;
        }
        y.par_chunks_mut(SPMV_PAR_ROWS)
            .enumerate()
            .for_each(|(chunk, y_chunk)| {
                spmv_rows(&indptr, indices, data, chunk * SPMV_PAR_ROWS, x, y_chunk)
            });
    }

    fn spmv(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; self.rows()];
        self.spmv_into(x, &mut y);
        y
    }

    fn transpose_csr(&self) -> CsrMatrix {
        self.transpose_view().to_csr()
    }

    fn submatrix(&self, rows: &[usize], col_map: &[usize], n_cols: usize) -> CsrMatrix {
        assert_eq!(col_map.len(), self.cols());
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for row in rows {
            let (cols, vals) = self.row_entries(*row);
            // col_map is monotonic for kept columns, so the new row stays sorted
            for (c, v) in cols.iter().zip(vals) {
                let mapped = col_map[*c];
                if mapped != DROPPED {
                    indices.push(mapped);
                    data.push(*v);
                }
            }
            indptr.push(indices.len());
        }
        CsMat::new((rows.len(), n_cols), indptr, indices, data)
    }

    fn to_dense_vec(&self) -> Vec<f64> {
        let n_cols = self.cols();
        let mut dense = vec![0.0; self.rows() * n_cols];
        for row in 0..self.rows() {
            let (cols, vals) = self.row_entries(row);
            for (c, v) in cols.iter().zip(vals) {
                dense[row * n_cols + *c] += *v;
            }
        }
        dense
    }

    fn is_symmetric_within(&self, tol: f64) -> bool {
        self.rows() == self.cols()
            && (0..self.rows()).all(|row| {
                let (cols, vals) = self.row_entries(row);
                cols.iter()
                    .zip(vals)
                    .all(|(c, v)| (self.value(*c, row) - v).abs() <= tol)
            })
    }
}

/// Builds a column map keeping `keep` (sorted, unique) columns out of `n` in order.
pub fn keep_columns(n: usize, keep: &[usize]) -> Vec<usize> {
    let mut map = vec![DROPPED; n];
    for (new, old) in keep.iter().enumerate() {
        map[*old] = new;
    }
    map
}
