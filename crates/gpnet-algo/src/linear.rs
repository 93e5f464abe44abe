//! Dense LU solves for assembled sparse Jacobians.
//!
//! Jacobians are assembled sparse, then densified and factorized with faer's
//! partial-pivot LU. A factorization can be reused for many right-hand sides,
//! which the Newton damping test and the adjoint recursion both rely on.
//!
//! Rows are scaled to unit maximum before factorizing. faer does not report
//! singular pivots, so the factorization is rejected when the smallest pivot
//! of `U` is within `n·ε` (times a small growth allowance) of the largest.
//! Every solve is checked as well: a non-finite result or a residual far
//! above rounding level is a failure.

use faer::{prelude::*, solvers::PartialPivLu, Mat};
use sprs::CsMat;

/// Residual acceptance threshold relative to the problem scale.
const RELATIVE_RESIDUAL_LIMIT: f64 = 1e-8;

/// Allowed pivot growth on top of `n·ε` before a matrix counts as singular.
const PIVOT_GROWTH_ALLOWANCE: f64 = 64.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinearSolveError {
    #[error("matrix is not square: {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
    #[error("right-hand side has length {got}, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("matrix is singular or too ill-conditioned (indicator {0:e})")]
    Singular(f64),
}

/// Factorized square matrix.
///
/// `matrix` and `lu` hold the row-scaled system `D A`; `row_scales` is `D`.
pub struct DenseLu {
    n: usize,
    matrix: Mat<f64>,
    row_scales: Vec<f64>,
    lu: PartialPivLu<f64>,
}

impl std::fmt::Debug for DenseLu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseLu").field("n", &self.n).finish()
    }
}

impl DenseLu {
    /// Factorize `matrix`.
    pub fn factorize(matrix: &CsMat<f64>) -> Result<Self, LinearSolveError> {
        Self::factorize_dense(Self::densify(matrix, false)?)
    }

    /// Factorize the transpose of `matrix`, for adjoint solves.
    pub fn factorize_transposed(matrix: &CsMat<f64>) -> Result<Self, LinearSolveError> {
        Self::factorize_dense(Self::densify(matrix, true)?)
    }

    fn densify(matrix: &CsMat<f64>, transpose: bool) -> Result<Mat<f64>, LinearSolveError> {
        let (rows, cols) = matrix.shape();
        if rows != cols {
            return Err(LinearSolveError::NotSquare { rows, cols });
        }
        let mut dense = Mat::<f64>::zeros(rows, cols);
        for (value, (row, col)) in matrix.iter() {
            if transpose {
                dense.write(col, row, *value);
            } else {
                dense.write(row, col, *value);
            }
        }
        Ok(dense)
    }

    fn factorize_dense(mut matrix: Mat<f64>) -> Result<Self, LinearSolveError> {
        let n = matrix.nrows();
        let mut row_scales = vec![1.0; n];
        for (i, scale) in row_scales.iter_mut().enumerate() {
            let largest = (0..n).fold(0.0f64, |m, j| m.max(matrix.read(i, j).abs()));
            if largest == 0.0 || !largest.is_finite() {
                return Err(LinearSolveError::Singular(0.0));
            }
            *scale = largest.recip();
            for j in 0..n {
                matrix.write(i, j, matrix.read(i, j) * *scale);
            }
        }
        let lu = PartialPivLu::new(matrix.as_ref());
        if n > 0 {
            let ratio = pivot_ratio(&lu.compute_u());
            // also rejects NaN
            if !(ratio >= n as f64 * PIVOT_GROWTH_ALLOWANCE * f64::EPSILON) {
                return Err(LinearSolveError::Singular(ratio));
            }
        }
        Ok(Self {
            n,
            matrix,
            row_scales,
            lu,
        })
    }

    pub fn dimension(&self) -> usize {
        self.n
    }

    /// Solve `A x = rhs`.
    pub fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>, LinearSolveError> {
        if rhs.len() != self.n {
            return Err(LinearSolveError::DimensionMismatch {
                expected: self.n,
                got: rhs.len(),
            });
        }
        let rhs_mat = Mat::from_fn(self.n, 1, |i, _| rhs[i] * self.row_scales[i]);
        let sol = self.lu.solve(&rhs_mat);
        self.check(&rhs_mat, &sol)?;
        Ok((0..self.n).map(|i| sol.read(i, 0)).collect())
    }

    /// Solve `A X = B` for several right-hand sides at once.
    pub fn solve_many(&self, rhs: &Mat<f64>) -> Result<Mat<f64>, LinearSolveError> {
        if rhs.nrows() != self.n {
            return Err(LinearSolveError::DimensionMismatch {
                expected: self.n,
                got: rhs.nrows(),
            });
        }
        if rhs.ncols() == 0 {
            return Ok(Mat::zeros(self.n, 0));
        }
        let scaled = Mat::from_fn(self.n, rhs.ncols(), |i, j| rhs.read(i, j) * self.row_scales[i]);
        let sol = self.lu.solve(&scaled);
        self.check(&scaled, &sol)?;
        Ok(sol)
    }

    fn check(&self, rhs: &Mat<f64>, sol: &Mat<f64>) -> Result<(), LinearSolveError> {
        let mut sol_max = 0.0f64;
        for j in 0..sol.ncols() {
            for i in 0..self.n {
                let v = sol.read(i, j);
                if !v.is_finite() {
                    return Err(LinearSolveError::Singular(f64::INFINITY));
                }
                sol_max = sol_max.max(v.abs());
            }
        }
        let product = &self.matrix * sol;
        let mut residual_max = 0.0f64;
        let mut rhs_max = 0.0f64;
        let mut matrix_max = 0.0f64;
        for j in 0..sol.ncols() {
            for i in 0..self.n {
                residual_max = residual_max.max((product.read(i, j) - rhs.read(i, j)).abs());
                rhs_max = rhs_max.max(rhs.read(i, j).abs());
            }
        }
        for j in 0..self.n {
            for i in 0..self.n {
                matrix_max = matrix_max.max(self.matrix.read(i, j).abs());
            }
        }
        let scale = rhs_max + matrix_max * sol_max;
        if scale == 0.0 {
            return Ok(());
        }
        let relative = residual_max / scale;
        if relative > RELATIVE_RESIDUAL_LIMIT {
            return Err(LinearSolveError::Singular(relative));
        }
        Ok(())
    }
}

/// Smallest over largest absolute diagonal entry of `u`.
fn pivot_ratio(u: &Mat<f64>) -> f64 {
    let (mut smallest, mut largest) = (f64::INFINITY, 0.0f64);
    for i in 0..u.nrows().min(u.ncols()) {
        let pivot = u.read(i, i).abs();
        smallest = smallest.min(pivot);
        largest = largest.max(pivot);
    }
    if largest == 0.0 {
        0.0
    } else {
        smallest / largest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    fn csr(entries: &[(usize, usize, f64)], n: usize) -> CsMat<f64> {
        let mut t = TriMat::new((n, n));
        for &(r, c, v) in entries {
            t.add_triplet(r, c, v);
        }
        t.to_csr()
    }

    #[test]
    fn solves_small_system() {
        let a = csr(&[(0, 0, 4.0), (0, 1, 1.0), (1, 0, 2.0), (1, 1, 3.0)], 2);
        let lu = DenseLu::factorize(&a).unwrap();
        let x = lu.solve(&[1.0, 2.0]).unwrap();
        assert!((x[0] - 0.1).abs() < 1e-12);
        assert!((x[1] - 0.6).abs() < 1e-12);
    }

    #[test]
    fn transposed_factorization() {
        let a = csr(&[(0, 0, 1.0), (0, 1, 2.0), (1, 1, 1.0)], 2);
        let lu = DenseLu::factorize_transposed(&a).unwrap();
        // A^T = [[1, 0], [2, 1]]
        let x = lu.solve(&[1.0, 4.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn singular_matrix_is_detected() {
        let a = csr(&[(0, 0, 1.0), (0, 1, 1.0), (1, 0, 2.0), (1, 1, 2.0)], 2);
        assert!(matches!(
            DenseLu::factorize(&a),
            Err(LinearSolveError::Singular(_))
        ));
    }

    #[test]
    fn rounding_does_not_hide_singularity() {
        // Exactly singular, but elimination leaves a pivot of rounding size.
        let a = csr(&[(0, 0, 0.1), (0, 1, 0.3), (1, 0, 0.7), (1, 1, 2.1)], 2);
        assert!(matches!(
            DenseLu::factorize(&a),
            Err(LinearSolveError::Singular(_))
        ));
        assert!(matches!(
            DenseLu::factorize_transposed(&a),
            Err(LinearSolveError::Singular(_))
        ));

        let nearly = csr(&[(0, 0, 1.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 1.0 + 1e-15)], 2);
        assert!(matches!(
            DenseLu::factorize(&nearly),
            Err(LinearSolveError::Singular(ratio)) if ratio < 1e-14
        ));
    }

    #[test]
    fn zero_row_is_singular() {
        let a = csr(&[(0, 0, 1.0), (0, 1, 2.0)], 2);
        assert!(matches!(
            DenseLu::factorize(&a),
            Err(LinearSolveError::Singular(_))
        ));
    }

    #[test]
    fn badly_scaled_rows_still_solve() {
        let a = csr(&[(0, 0, 1e9), (0, 1, 2e9), (1, 0, 3e-6), (1, 1, 1e-6)], 2);
        let lu = DenseLu::factorize(&a).unwrap();
        let x = lu.solve(&[5e9, 5e-6]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-10);
        assert!((x[1] - 2.0).abs() < 1e-10);
    }

    #[test]
    fn rejects_non_square() {
        let mut t = TriMat::new((2, 3));
        t.add_triplet(0, 0, 1.0);
        assert!(matches!(
            DenseLu::factorize(&t.to_csr()),
            Err(LinearSolveError::NotSquare { .. })
        ));
    }
}
