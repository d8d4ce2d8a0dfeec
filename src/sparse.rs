//! Sparse-matrix assembly support for compactly-supported kernels.
//!
//! Covariance matrices are built as triplet lists and finalized into CSC
//! form. `SparseColMat::try_new_from_triplets` sums duplicate (row, col)
//! entries, which is exactly what the mirrored lower/upper triangle of a
//! symmetric build relies on.

use faer::sparse::{SparseColMat, Triplet};
use ndarray::Array2;

use crate::covfn::CovarianceError;

/// Fraction of `n1 * n2` used as the initial nonzero-count estimate.
const DENSITY_ESTIMATE: usize = 10;

/// Append-only triplet buffer with an expected-sparsity capacity seed.
///
/// The buffer grows geometrically (amortized doubling) once the estimate
/// is exceeded; working memory stays proportional to the number of
/// retained pairs rather than to `n1 * n2`.
pub struct TripletAccumulator {
    nrows: usize,
    ncols: usize,
    triplets: Vec<Triplet<usize, usize, f64>>,
}

impl TripletAccumulator {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        let estimate = (nrows * ncols) / DENSITY_ESTIMATE + nrows.max(ncols) + 1;
        Self::with_capacity(nrows, ncols, estimate)
    }

    /// Seed with an explicit capacity estimate; used when many small
    /// matrices share one scan (per-point input gradients).
    pub fn with_capacity(nrows: usize, ncols: usize, capacity: usize) -> Self {
        Self {
            nrows,
            ncols,
            triplets: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.nrows && col < self.ncols);
        self.triplets.push(Triplet::new(row, col, value));
    }

    /// Push both (row, col) and (col, row); off-diagonal mirror for
    /// symmetric builds.
    pub fn push_symmetric(&mut self, row: usize, col: usize, value: f64) {
        self.push(row, col, value);
        if row != col {
            self.push(col, row, value);
        }
    }

    pub fn len(&self) -> usize {
        self.triplets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    /// Finalize into CSC form; duplicate entries are summed.
    pub fn build(self) -> Result<SparseColMat<usize, f64>, CovarianceError> {
        SparseColMat::try_new_from_triplets(self.nrows, self.ncols, &self.triplets).map_err(
            |err| {
                CovarianceError::SparseCreation(format!(
                    "CSC assembly from {} triplet(s) failed: {err:?}",
                    self.triplets.len()
                ))
            },
        )
    }
}

/// Convert a dense matrix to CSC, retaining every entry that is not
/// exactly zero. Used by the dense-acceleration path so its output agrees
/// with the sparse fallback entry-for-entry.
pub fn dense_to_sparse(matrix: &Array2<f64>) -> Result<SparseColMat<usize, f64>, CovarianceError> {
    let mut acc = TripletAccumulator::new(matrix.nrows(), matrix.ncols());
    for row in 0..matrix.nrows() {
        for col in 0..matrix.ncols() {
            let value = matrix[[row, col]];
            if value != 0.0 {
                acc.push(row, col, value);
            }
        }
    }
    acc.build()
}

/// Expand a CSC matrix to dense form.
pub fn sparse_to_dense(matrix: &SparseColMat<usize, f64>) -> Array2<f64> {
    let mut dense = Array2::<f64>::zeros((matrix.nrows(), matrix.ncols()));
    let (symbolic, values) = matrix.parts();
    let col_ptr = symbolic.col_ptr();
    let row_idx = symbolic.row_idx();
    for col in 0..matrix.ncols() {
        for idx in col_ptr[col]..col_ptr[col + 1] {
            dense[[row_idx[idx], col]] += values[idx];
        }
    }
    dense
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn duplicate_triplets_are_summed() {
        let mut acc = TripletAccumulator::new(2, 2);
        acc.push(0, 1, 1.5);
        acc.push(0, 1, 2.5);
        acc.push(1, 0, -1.0);
        let sparse = acc.build().expect("assembly should succeed");
        let dense = sparse_to_dense(&sparse);
        assert_eq!(dense, array![[0.0, 4.0], [-1.0, 0.0]]);
    }

    #[test]
    fn symmetric_push_mirrors_off_diagonal_only() {
        let mut acc = TripletAccumulator::new(3, 3);
        acc.push_symmetric(1, 0, 2.0);
        acc.push_symmetric(2, 2, 5.0);
        let dense = sparse_to_dense(&acc.build().expect("assembly should succeed"));
        assert_eq!(dense, array![[0.0, 2.0, 0.0], [2.0, 0.0, 0.0], [0.0, 0.0, 5.0]]);
    }

    #[test]
    fn dense_round_trip_preserves_values() {
        let dense = array![[0.0, 1.25, 0.0], [3.5, 0.0, -0.75]];
        let sparse = dense_to_sparse(&dense).expect("conversion should succeed");
        assert_eq!(sparse_to_dense(&sparse), dense);
    }
}
