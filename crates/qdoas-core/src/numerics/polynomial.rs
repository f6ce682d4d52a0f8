use super::linalg::{LeastSquaresError, solve_least_squares};
use faer::Mat;

/// Evaluate `sum(c[i] * x^i)` for `i` in `0..degree` with Horner accumulation.
///
/// `degree` is the number of leading coefficients taken into account; it is
/// clamped to the coefficient count and a degree of zero evaluates to zero.
pub fn eval_polynomial(x: f64, coefficients: &[f64], degree: usize) -> f64 {
    let used = degree.min(coefficients.len());
    coefficients[..used]
        .iter()
        .rev()
        .fold(0.0, |accumulator, coefficient| accumulator * x + coefficient)
}

pub fn eval_polynomial_f32(x: f32, coefficients: &[f32], degree: usize) -> f32 {
    let used = degree.min(coefficients.len());
    coefficients[..used]
        .iter()
        .rev()
        .fold(0.0, |accumulator, coefficient| accumulator * x + coefficient)
}

/// Derivative of the polynomial evaluated by [`eval_polynomial`].
pub fn eval_polynomial_derivative(x: f64, coefficients: &[f64], degree: usize) -> f64 {
    let used = degree.min(coefficients.len());
    (1..used)
        .rev()
        .fold(0.0, |accumulator, power| {
            accumulator * x + power as f64 * coefficients[power]
        })
}

/// Least-squares polynomial of the given degree (highest power) through `(x, y)`.
pub fn fit_polynomial(x: &[f64], y: &[f64], degree: usize) -> Result<Vec<f64>, LeastSquaresError> {
    if x.len() != y.len() {
        return Err(LeastSquaresError::RhsLengthMismatch {
            expected: x.len(),
            actual: y.len(),
        });
    }

    let terms = degree + 1;
    let mut design = Mat::<f64>::zeros(x.len(), terms);
    for (row, value) in x.iter().copied().enumerate() {
        let mut power = 1.0;
        for col in 0..terms {
            design[(row, col)] = power;
            power *= value;
        }
    }

    Ok(solve_least_squares(&design, y, 1.0e-12)?.coefficients)
}

#[cfg(test)]
mod tests {
    use super::{eval_polynomial, eval_polynomial_derivative, eval_polynomial_f32, fit_polynomial};

    #[test]
    fn constant_polynomial_is_independent_of_x() {
        for x in [-1.0e3, -2.5, 0.0, 0.75, 4.0e5] {
            assert_eq!(eval_polynomial(x, &[3.25], 1), 3.25);
        }
    }

    #[test]
    fn polynomial_at_origin_returns_first_coefficient() {
        let coefficients = [1.5, -2.0, 0.25, 7.0];
        assert_eq!(eval_polynomial(0.0, &coefficients, coefficients.len()), 1.5);
        assert_eq!(eval_polynomial(2.0, &coefficients, 0), 0.0);
    }

    #[test]
    fn degree_limits_the_number_of_terms() {
        let coefficients = [1.0, 2.0, 3.0];
        assert_eq!(eval_polynomial(2.0, &coefficients, 2), 5.0);
        assert_eq!(eval_polynomial(2.0, &coefficients, 3), 17.0);
        assert_eq!(eval_polynomial(2.0, &coefficients, 10), 17.0);
    }

    #[test]
    fn single_and_double_precision_agree() {
        let coefficients = [0.5, -1.25, 0.125, 0.03125];
        let narrow: Vec<f32> = coefficients.iter().map(|value| *value as f32).collect();
        for x in [-3.0, -0.5, 0.0, 1.5, 2.75] {
            let wide = eval_polynomial(x, &coefficients, 4);
            let single = eval_polynomial_f32(x as f32, &narrow, 4);
            let tolerance = f32::EPSILON as f64 * 8.0 * wide.abs().max(1.0);
            assert!(
                (wide - single as f64).abs() <= tolerance,
                "x={x}: f64={wide}, f32={single}"
            );
        }
    }

    #[test]
    fn derivative_matches_analytic_form() {
        let coefficients = [4.0, -3.0, 2.0];
        assert_eq!(eval_polynomial_derivative(1.5, &coefficients, 3), -3.0 + 4.0 * 1.5);
        assert_eq!(eval_polynomial_derivative(1.5, &coefficients, 1), 0.0);
    }

    #[test]
    fn fitted_polynomial_recovers_exact_coefficients() {
        let x: Vec<f64> = (0..20).map(|index| index as f64 * 0.5 - 4.0).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|value| eval_polynomial(*value, &[0.3, -1.2, 0.05], 3))
            .collect();

        let coefficients = fit_polynomial(&x, &y, 2).expect("fit should succeed");
        for (actual, expected) in coefficients.iter().zip([0.3, -1.2, 0.05]) {
            assert!((actual - expected).abs() < 1.0e-10, "{actual} vs {expected}");
        }
    }
}
