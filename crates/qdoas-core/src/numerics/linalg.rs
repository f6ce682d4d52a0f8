use faer::Mat;

const SINGULAR_PIVOT_EPSILON: f64 = 1.0e-300;
const JACOBI_MAX_SWEEPS: usize = 80;
const JACOBI_ORTHOGONALITY_EPSILON: f64 = 1.0e-15;

pub type DenseMatrix = Mat<f64>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LuError {
    #[error("LU factorization requires a square matrix, got {rows}x{cols}")]
    NonSquareMatrix { rows: usize, cols: usize },
    #[error("LU factorization requires a non-empty matrix")]
    EmptyMatrix,
    #[error("matrix is singular at pivot index {pivot_index}")]
    SingularMatrix { pivot_index: usize },
    #[error("right-hand side length mismatch: expected {expected}, got {actual}")]
    RhsLengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LuDecomposition {
    lu: DenseMatrix,
    pivots: Vec<usize>,
}

impl LuDecomposition {
    pub fn dimension(&self) -> usize {
        self.lu.nrows()
    }

    pub fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>, LuError> {
        let dimension = self.dimension();
        if rhs.len() != dimension {
            return Err(LuError::RhsLengthMismatch {
                expected: dimension,
                actual: rhs.len(),
            });
        }

        let mut forward = vec![0.0; dimension];
        for row in 0..dimension {
            let mut value = rhs[self.pivots[row]];
            for col in 0..row {
                value -= self.lu[(row, col)] * forward[col];
            }
            forward[row] = value;
        }

        let mut solution = vec![0.0; dimension];
        for row in (0..dimension).rev() {
            let mut value = forward[row];
            for col in (row + 1)..dimension {
                value -= self.lu[(row, col)] * solution[col];
            }
            solution[row] = value / self.lu[(row, row)];
        }

        Ok(solution)
    }
}

pub fn lu_factorize(matrix: &DenseMatrix) -> Result<LuDecomposition, LuError> {
    let rows = matrix.nrows();
    let cols = matrix.ncols();
    if rows == 0 || cols == 0 {
        return Err(LuError::EmptyMatrix);
    }
    if rows != cols {
        return Err(LuError::NonSquareMatrix { rows, cols });
    }

    let dimension = rows;
    let mut lu = matrix.clone();
    let mut pivots: Vec<usize> = (0..dimension).collect();

    for pivot_col in 0..dimension {
        let mut pivot_row = pivot_col;
        for row in (pivot_col + 1)..dimension {
            if lu[(row, pivot_col)].abs() > lu[(pivot_row, pivot_col)].abs() {
                pivot_row = row;
            }
        }

        if lu[(pivot_row, pivot_col)].abs() <= SINGULAR_PIVOT_EPSILON
            || !lu[(pivot_row, pivot_col)].is_finite()
        {
            return Err(LuError::SingularMatrix {
                pivot_index: pivot_col,
            });
        }

        if pivot_row != pivot_col {
            for col in 0..dimension {
                let upper = lu[(pivot_col, col)];
                lu[(pivot_col, col)] = lu[(pivot_row, col)];
                lu[(pivot_row, col)] = upper;
            }
            pivots.swap(pivot_col, pivot_row);
        }

        let pivot = lu[(pivot_col, pivot_col)];
        for row in (pivot_col + 1)..dimension {
            lu[(row, pivot_col)] /= pivot;
            let multiplier = lu[(row, pivot_col)];
            for col in (pivot_col + 1)..dimension {
                let updated = lu[(row, col)] - multiplier * lu[(pivot_col, col)];
                lu[(row, col)] = updated;
            }
        }
    }

    Ok(LuDecomposition { lu, pivots })
}

pub fn lu_solve(matrix: &DenseMatrix, rhs: &[f64]) -> Result<Vec<f64>, LuError> {
    lu_factorize(matrix)?.solve(rhs)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SvdError {
    #[error("SVD requires a non-empty matrix")]
    EmptyMatrix,
    #[error("SVD requires at least as many rows as columns, got {rows}x{cols}")]
    Underdetermined { rows: usize, cols: usize },
    #[error("matrix entry ({row}, {col}) is not finite")]
    NonFiniteEntry { row: usize, col: usize },
}

/// Thin singular value decomposition `A = U diag(S) V^T`.
#[derive(Debug, Clone, PartialEq)]
pub struct SvdDecomposition {
    pub u: DenseMatrix,
    pub singular_values: Vec<f64>,
    pub v: DenseMatrix,
}

/// One-sided Jacobi SVD of an `m x n` matrix with `m >= n`.
///
/// Columns are rotated pairwise until mutually orthogonal; the singular
/// values are the final column norms. Exactly dependent columns collapse to
/// a zero singular value.
pub fn svd_decompose(matrix: &DenseMatrix) -> Result<SvdDecomposition, SvdError> {
    let rows = matrix.nrows();
    let cols = matrix.ncols();
    if rows == 0 || cols == 0 {
        return Err(SvdError::EmptyMatrix);
    }
    if rows < cols {
        return Err(SvdError::Underdetermined { rows, cols });
    }
    for col in 0..cols {
        for row in 0..rows {
            if !matrix[(row, col)].is_finite() {
                return Err(SvdError::NonFiniteEntry { row, col });
            }
        }
    }

    let mut u = matrix.clone();
    let mut v = DenseMatrix::zeros(cols, cols);
    for index in 0..cols {
        v[(index, index)] = 1.0;
    }

    for _sweep in 0..JACOBI_MAX_SWEEPS {
        let mut rotated = false;
        for p in 0..cols {
            for q in (p + 1)..cols {
                let mut alpha = 0.0;
                let mut beta = 0.0;
                let mut gamma = 0.0;
                for row in 0..rows {
                    let up = u[(row, p)];
                    let uq = u[(row, q)];
                    alpha += up * up;
                    beta += uq * uq;
                    gamma += up * uq;
                }

                if gamma == 0.0 || gamma.abs() <= JACOBI_ORTHOGONALITY_EPSILON * (alpha * beta).sqrt()
                {
                    continue;
                }
                rotated = true;

                let zeta = (beta - alpha) / (2.0 * gamma);
                let sign = if zeta >= 0.0 { 1.0 } else { -1.0 };
                let t = sign / (zeta.abs() + (1.0 + zeta * zeta).sqrt());
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = c * t;

                rotate_columns(&mut u, p, q, c, s);
                rotate_columns(&mut v, p, q, c, s);
            }
        }
        if !rotated {
            break;
        }
    }

    let mut singular_values = vec![0.0; cols];
    for (col, singular_value) in singular_values.iter_mut().enumerate() {
        let norm = (0..rows)
            .map(|row| u[(row, col)] * u[(row, col)])
            .sum::<f64>()
            .sqrt();
        *singular_value = norm;
        if norm > 0.0 {
            for row in 0..rows {
                u[(row, col)] /= norm;
            }
        }
    }

    Ok(SvdDecomposition {
        u,
        singular_values,
        v,
    })
}

fn rotate_columns(matrix: &mut DenseMatrix, p: usize, q: usize, c: f64, s: f64) {
    for row in 0..matrix.nrows() {
        let mp = matrix[(row, p)];
        let mq = matrix[(row, q)];
        matrix[(row, p)] = c * mp - s * mq;
        matrix[(row, q)] = s * mp + c * mq;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeastSquaresError {
    #[error(transparent)]
    Svd(#[from] SvdError),
    #[error("right-hand side length mismatch: expected {expected}, got {actual}")]
    RhsLengthMismatch { expected: usize, actual: usize },
    #[error("singular value threshold must be finite and >= 0")]
    InvalidThreshold,
    #[error("design matrix has no usable singular value")]
    NullDesign,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquaresSolution {
    pub coefficients: Vec<f64>,
    /// Unscaled covariance `(A^T A)^+` of the coefficients.
    pub covariance: DenseMatrix,
    pub singular_values: Vec<f64>,
    /// Indices (into `singular_values`) of the directions dropped as degenerate.
    pub discarded: Vec<usize>,
    pub residual: Vec<f64>,
    pub chi_square: f64,
}

impl LeastSquaresSolution {
    pub fn rank(&self) -> usize {
        self.singular_values.len() - self.discarded.len()
    }

    pub fn is_rank_deficient(&self) -> bool {
        !self.discarded.is_empty()
    }
}

/// Rank-aware linear least squares through the SVD of the column-equilibrated
/// design matrix.
///
/// Singular values below `relative_threshold * max(S)` are treated as zero:
/// the corresponding directions are excluded from both the solution and the
/// covariance and reported in [`LeastSquaresSolution::discarded`].
pub fn solve_least_squares(
    design: &DenseMatrix,
    rhs: &[f64],
    relative_threshold: f64,
) -> Result<LeastSquaresSolution, LeastSquaresError> {
    let rows = design.nrows();
    let cols = design.ncols();
    if rhs.len() != rows {
        return Err(LeastSquaresError::RhsLengthMismatch {
            expected: rows,
            actual: rhs.len(),
        });
    }
    if !relative_threshold.is_finite() || relative_threshold < 0.0 {
        return Err(LeastSquaresError::InvalidThreshold);
    }

    let mut scaled = design.clone();
    let mut scales = vec![1.0; cols];
    for (col, scale) in scales.iter_mut().enumerate() {
        let norm = (0..rows)
            .map(|row| design[(row, col)] * design[(row, col)])
            .sum::<f64>()
            .sqrt();
        if norm > 0.0 && norm.is_finite() {
            *scale = norm;
            for row in 0..rows {
                scaled[(row, col)] /= norm;
            }
        }
    }

    let svd = svd_decompose(&scaled)?;
    let largest = svd
        .singular_values
        .iter()
        .copied()
        .fold(0.0_f64, f64::max);
    if largest <= 0.0 {
        return Err(LeastSquaresError::NullDesign);
    }
    let cutoff = relative_threshold * largest;

    let mut discarded = Vec::new();
    let mut scaled_solution = vec![0.0; cols];
    let mut scaled_covariance = DenseMatrix::zeros(cols, cols);
    for (index, singular_value) in svd.singular_values.iter().copied().enumerate() {
        if singular_value <= cutoff {
            discarded.push(index);
            continue;
        }

        let projection: f64 = (0..rows).map(|row| svd.u[(row, index)] * rhs[row]).sum();
        let weight = projection / singular_value;
        let inverse_square = 1.0 / (singular_value * singular_value);
        for row in 0..cols {
            scaled_solution[row] += weight * svd.v[(row, index)];
            for col in 0..cols {
                scaled_covariance[(row, col)] +=
                    svd.v[(row, index)] * svd.v[(col, index)] * inverse_square;
            }
        }
    }

    let coefficients: Vec<f64> = scaled_solution
        .iter()
        .zip(&scales)
        .map(|(value, scale)| value / scale)
        .collect();
    let mut covariance = DenseMatrix::zeros(cols, cols);
    for row in 0..cols {
        for col in 0..cols {
            covariance[(row, col)] = scaled_covariance[(row, col)] / (scales[row] * scales[col]);
        }
    }

    let residual: Vec<f64> = (0..rows)
        .map(|row| {
            let model: f64 = (0..cols)
                .map(|col| design[(row, col)] * coefficients[col])
                .sum();
            rhs[row] - model
        })
        .collect();
    let chi_square = residual.iter().map(|value| value * value).sum();

    Ok(LeastSquaresSolution {
        coefficients,
        covariance,
        singular_values: svd.singular_values,
        discarded,
        residual,
        chi_square,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        DenseMatrix, LeastSquaresError, LuError, lu_factorize, lu_solve, solve_least_squares,
        svd_decompose,
    };

    #[test]
    fn lu_solve_recovers_known_solution() {
        let matrix = dense(&[vec![2.0, 1.0, -1.0], vec![-3.0, -1.0, 2.0], vec![-2.0, 1.0, 2.0]]);
        let solution = lu_solve(&matrix, &[8.0, -11.0, -3.0]).expect("system is regular");
        assert_vector_close(&[2.0, 3.0, -1.0], &solution, 1.0e-12);
    }

    #[test]
    fn lu_rejects_singular_and_non_square_matrices() {
        let singular = dense(&[vec![1.0, 2.0], vec![2.0, 4.0]]);
        assert_eq!(
            lu_factorize(&singular).expect_err("singular"),
            LuError::SingularMatrix { pivot_index: 1 }
        );
        assert_eq!(
            lu_factorize(&DenseMatrix::zeros(2, 3)).expect_err("non-square"),
            LuError::NonSquareMatrix { rows: 2, cols: 3 }
        );
    }

    #[test]
    fn svd_reconstructs_original_matrix() {
        let matrix = dense(&[
            vec![4.0, 1.0, 0.5],
            vec![2.0, -3.0, 1.0],
            vec![0.0, 1.0, 7.0],
            vec![1.0, 1.0, 1.0],
        ]);
        let svd = svd_decompose(&matrix).expect("svd should succeed");

        for row in 0..4 {
            for col in 0..3 {
                let rebuilt: f64 = (0..3)
                    .map(|k| svd.u[(row, k)] * svd.singular_values[k] * svd.v[(col, k)])
                    .sum();
                assert!(
                    (rebuilt - matrix[(row, col)]).abs() < 1.0e-12,
                    "({row},{col}): {rebuilt} vs {}",
                    matrix[(row, col)]
                );
            }
        }
    }

    #[test]
    fn duplicated_column_is_flagged_without_non_finite_coefficients() {
        let rows = 12;
        let mut design = DenseMatrix::zeros(rows, 3);
        let mut rhs = vec![0.0; rows];
        for row in 0..rows {
            let x = row as f64 * 0.25;
            design[(row, 0)] = 1.0;
            design[(row, 1)] = x.sin();
            design[(row, 2)] = x.sin();
            rhs[row] = 0.5 + 3.0 * x.sin();
        }

        let solution = solve_least_squares(&design, &rhs, 1.0e-10).expect("solve should succeed");
        assert!(solution.is_rank_deficient());
        assert_eq!(solution.rank(), 2);
        assert!(solution.coefficients.iter().all(|value| value.is_finite()));
        assert!((solution.coefficients[0] - 0.5).abs() < 1.0e-10);
        assert!((solution.coefficients[1] + solution.coefficients[2] - 3.0).abs() < 1.0e-10);
        assert!(solution.chi_square < 1.0e-20);
    }

    #[test]
    fn least_squares_rejects_mismatched_rhs() {
        let design = DenseMatrix::zeros(3, 2);
        assert_eq!(
            solve_least_squares(&design, &[1.0, 2.0], 1.0e-10).expect_err("mismatch"),
            LeastSquaresError::RhsLengthMismatch {
                expected: 3,
                actual: 2
            }
        );
    }

    fn dense(rows: &[Vec<f64>]) -> DenseMatrix {
        let mut matrix = DenseMatrix::zeros(rows.len(), rows[0].len());
        for (row, values) in rows.iter().enumerate() {
            for (col, value) in values.iter().copied().enumerate() {
                matrix[(row, col)] = value;
            }
        }
        matrix
    }

    fn assert_vector_close(expected: &[f64], actual: &[f64], tolerance: f64) {
        assert_eq!(expected.len(), actual.len());
        for (index, (expected, actual)) in expected.iter().zip(actual).enumerate() {
            assert!(
                (expected - actual).abs() <= tolerance,
                "index {index}: expected {expected}, got {actual}"
            );
        }
    }
}
