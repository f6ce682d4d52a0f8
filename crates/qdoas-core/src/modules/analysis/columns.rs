use crate::numerics::{DenseMatrix, dot};

/// Columns whose norm falls below this fraction of the original norm are
/// treated as linearly dependent during Gram-Schmidt.
const DEPENDENT_COLUMN_RATIO: f64 = 1.0e-10;

pub(super) fn polynomial_column(x: &[f64], power: usize) -> Vec<f64> {
    x.iter().map(|value| value.powi(power as i32)).collect()
}

pub(super) fn column(matrix: &DenseMatrix, col: usize) -> Vec<f64> {
    (0..matrix.nrows()).map(|row| matrix[(row, col)]).collect()
}

pub(super) fn set_column(matrix: &mut DenseMatrix, col: usize, values: &[f64]) {
    for (row, value) in values.iter().enumerate() {
        matrix[(row, col)] = *value;
    }
}

/// Orthonormalize the columns of `basis` in place with modified Gram-Schmidt.
///
/// Dependent columns are zeroed and excluded from later projections.
pub(super) fn orthonormalize(basis: &mut DenseMatrix) {
    for col in 0..basis.ncols() {
        let mut values = column(basis, col);
        let original = dot(&values, &values).sqrt();
        for previous in 0..col {
            let reference = column(basis, previous);
            let projection = dot(&values, &reference);
            for (value, component) in values.iter_mut().zip(&reference) {
                *value -= projection * component;
            }
        }
        let norm = dot(&values, &values).sqrt();
        if original == 0.0 || norm <= DEPENDENT_COLUMN_RATIO * original {
            values.iter_mut().for_each(|value| *value = 0.0);
        } else {
            values.iter_mut().for_each(|value| *value /= norm);
        }
        set_column(basis, col, &values);
    }
}

/// Remove from `values` its component in the span of the orthonormal `basis`.
pub(super) fn project_out_basis(values: &mut [f64], basis: &DenseMatrix) {
    for col in 0..basis.ncols() {
        let reference = column(basis, col);
        let projection = dot(values, &reference);
        for (value, component) in values.iter_mut().zip(&reference) {
            *value -= projection * component;
        }
    }
}

/// Remove from `values` its component along `target`.
pub(super) fn project_out(values: &mut [f64], target: &[f64]) {
    let norm = dot(target, target);
    if norm == 0.0 {
        return;
    }
    let projection = dot(values, target) / norm;
    for (value, component) in values.iter_mut().zip(target) {
        *value -= projection * component;
    }
}

#[cfg(test)]
mod tests {
    use super::{column, orthonormalize, polynomial_column, project_out, project_out_basis, set_column};
    use crate::numerics::{DenseMatrix, dot};

    fn basis(x: &[f64], degree: usize) -> DenseMatrix {
        let mut matrix = DenseMatrix::zeros(x.len(), degree + 1);
        for power in 0..=degree {
            set_column(&mut matrix, power, &polynomial_column(x, power));
        }
        matrix
    }

    #[test]
    fn gram_schmidt_yields_orthonormal_columns() {
        let x: Vec<f64> = (0..50).map(|index| -2.5 + 0.1 * index as f64).collect();
        let mut matrix = basis(&x, 3);
        orthonormalize(&mut matrix);
        for i in 0..4 {
            for j in 0..4 {
                let product = dot(&column(&matrix, i), &column(&matrix, j));
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((product - expected).abs() < 1.0e-10, "({i}, {j}) = {product}");
            }
        }
    }

    #[test]
    fn projection_removes_polynomial_content() {
        let x: Vec<f64> = (0..40).map(|index| index as f64 * 0.25 - 5.0).collect();
        let mut matrix = basis(&x, 2);
        orthonormalize(&mut matrix);

        let mut values: Vec<f64> = x.iter().map(|v| 3.0 + v - 0.5 * v * v + v.sin()).collect();
        project_out_basis(&mut values, &matrix);
        for power in 0..=2 {
            assert!(dot(&values, &polynomial_column(&x, power)).abs() < 1.0e-9);
        }
    }

    #[test]
    fn projection_along_a_column() {
        let mut values = vec![1.0, 2.0, 3.0];
        project_out(&mut values, &[1.0, 1.0, 1.0]);
        assert_eq!(values, vec![-1.0, 0.0, 1.0]);
        let mut untouched = vec![1.0, 2.0];
        project_out(&mut untouched, &[0.0, 0.0]);
        assert_eq!(untouched, vec![1.0, 2.0]);
    }

    #[test]
    fn dependent_columns_are_zeroed() {
        let mut matrix = DenseMatrix::zeros(3, 2);
        set_column(&mut matrix, 0, &[1.0, 2.0, 2.0]);
        set_column(&mut matrix, 1, &[2.0, 4.0, 4.0]);
        orthonormalize(&mut matrix);
        assert!(column(&matrix, 1).iter().all(|value| *value == 0.0));
        assert!((dot(&column(&matrix, 0), &column(&matrix, 0)) - 1.0).abs() < 1.0e-15);
    }
}
