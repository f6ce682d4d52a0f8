use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMode {
    Linear,
    #[default]
    Cubic,
}

/// End conditions of the cubic spline.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SplineBoundary {
    /// Zero second derivative at both ends.
    #[default]
    Natural,
    /// Prescribed first derivatives at both ends.
    Clamped { first: f64, last: f64 },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SplineError {
    #[error("spline requires at least 2 knots, got {actual}")]
    InsufficientPoints { actual: usize },
    #[error("spline input length mismatch: x={x}, y={y}")]
    LengthMismatch { x: usize, y: usize },
    #[error("spline second-derivative length mismatch: expected {expected}, got {actual}")]
    DerivativeLengthMismatch { expected: usize, actual: usize },
    #[error("spline value is not finite at index {index}")]
    NonFiniteValue { index: usize },
    #[error("spline abscissae must be strictly increasing, index {index} has {current} after {previous}")]
    NonIncreasingAbscissa {
        index: usize,
        previous: f64,
        current: f64,
    },
    #[error("interpolation target {target} outside [{lower}, {upper}]")]
    OutOfRange { target: f64, lower: f64, upper: f64 },
}

/// Second derivatives of the interpolating cubic spline through `(x, y)`.
///
/// Solves the tridiagonal system with a forward sweep and back substitution.
pub fn spline_second_derivatives(
    x: &[f64],
    y: &[f64],
    boundary: SplineBoundary,
) -> Result<Vec<f64>, SplineError> {
    validate_knots(x, y)?;

    let n = x.len();
    let mut y2 = vec![0.0; n];
    let mut u = vec![0.0; n];

    match boundary {
        SplineBoundary::Natural => {}
        SplineBoundary::Clamped { first, .. } => {
            y2[0] = -0.5;
            u[0] = (3.0 / (x[1] - x[0])) * ((y[1] - y[0]) / (x[1] - x[0]) - first);
        }
    }

    for i in 1..(n - 1) {
        let sig = (x[i] - x[i - 1]) / (x[i + 1] - x[i - 1]);
        let p = sig * y2[i - 1] + 2.0;
        y2[i] = (sig - 1.0) / p;
        let slope_delta =
            (y[i + 1] - y[i]) / (x[i + 1] - x[i]) - (y[i] - y[i - 1]) / (x[i] - x[i - 1]);
        u[i] = (6.0 * slope_delta / (x[i + 1] - x[i - 1]) - sig * u[i - 1]) / p;
    }

    let (qn, un) = match boundary {
        SplineBoundary::Natural => (0.0, 0.0),
        SplineBoundary::Clamped { last, .. } => {
            let h = x[n - 1] - x[n - 2];
            (0.5, (3.0 / h) * (last - (y[n - 1] - y[n - 2]) / h))
        }
    };
    y2[n - 1] = (un - qn * u[n - 2]) / (qn * y2[n - 2] + 1.0);

    for k in (0..(n - 1)).rev() {
        y2[k] = y2[k] * y2[k + 1] + u[k];
    }

    Ok(y2)
}

/// Interpolate `(x, y)` at `target`; `y2` is only read in cubic mode.
///
/// Targets outside `[x[0], x[n-1]]` are rejected rather than extrapolated.
pub fn spline_interpolate(
    x: &[f64],
    y: &[f64],
    y2: &[f64],
    target: f64,
    mode: InterpolationMode,
) -> Result<f64, SplineError> {
    if x.len() < 2 {
        return Err(SplineError::InsufficientPoints { actual: x.len() });
    }
    if x.len() != y.len() {
        return Err(SplineError::LengthMismatch {
            x: x.len(),
            y: y.len(),
        });
    }
    if mode == InterpolationMode::Cubic && y2.len() != x.len() {
        return Err(SplineError::DerivativeLengthMismatch {
            expected: x.len(),
            actual: y2.len(),
        });
    }

    let (lower, upper) = bracket(x, target)?;
    let h = x[upper] - x[lower];
    let a = (x[upper] - target) / h;
    let b = (target - x[lower]) / h;

    let value = match mode {
        InterpolationMode::Linear => a * y[lower] + b * y[upper],
        InterpolationMode::Cubic => {
            a * y[lower]
                + b * y[upper]
                + ((a * a * a - a) * y2[lower] + (b * b * b - b) * y2[upper]) * (h * h) / 6.0
        }
    };
    Ok(value)
}

pub fn spline_interpolate_vector(
    x: &[f64],
    y: &[f64],
    y2: &[f64],
    targets: &[f64],
    mode: InterpolationMode,
) -> Result<Vec<f64>, SplineError> {
    targets
        .iter()
        .map(|target| spline_interpolate(x, y, y2, *target, mode))
        .collect()
}

/// Knots with precomputed second derivatives, for repeated evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    y2: Vec<f64>,
}

impl CubicSpline {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self, SplineError> {
        let y2 = spline_second_derivatives(&x, &y, SplineBoundary::Natural)?;
        Ok(Self { x, y, y2 })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    pub fn contains(&self, target: f64) -> bool {
        let (lower, upper) = self.domain();
        target >= lower && target <= upper
    }

    pub fn evaluate(&self, target: f64) -> Result<f64, SplineError> {
        spline_interpolate(&self.x, &self.y, &self.y2, target, InterpolationMode::Cubic)
    }

    /// Evaluate with the target clamped to the knot domain.
    pub fn evaluate_clamped(&self, target: f64) -> f64 {
        let (lower, upper) = self.domain();
        let clamped = target.clamp(lower, upper);
        spline_interpolate(&self.x, &self.y, &self.y2, clamped, InterpolationMode::Cubic)
            .unwrap_or(f64::NAN)
    }
}

fn bracket(x: &[f64], target: f64) -> Result<(usize, usize), SplineError> {
    let last = x.len() - 1;
    if !target.is_finite() || target < x[0] || target > x[last] {
        return Err(SplineError::OutOfRange {
            target,
            lower: x[0],
            upper: x[last],
        });
    }

    let upper = x.partition_point(|knot| *knot <= target).clamp(1, last);
    Ok((upper - 1, upper))
}

fn validate_knots(x: &[f64], y: &[f64]) -> Result<(), SplineError> {
    if x.len() != y.len() {
        return Err(SplineError::LengthMismatch {
            x: x.len(),
            y: y.len(),
        });
    }
    if x.len() < 2 {
        return Err(SplineError::InsufficientPoints { actual: x.len() });
    }

    for index in 0..x.len() {
        if !x[index].is_finite() || !y[index].is_finite() {
            return Err(SplineError::NonFiniteValue { index });
        }
        if index > 0 && x[index] <= x[index - 1] {
            return Err(SplineError::NonIncreasingAbscissa {
                index,
                previous: x[index - 1],
                current: x[index],
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        CubicSpline, InterpolationMode, SplineBoundary, SplineError, spline_interpolate,
        spline_second_derivatives,
    };

    #[test]
    fn interpolation_at_knots_reproduces_values() {
        let x: Vec<f64> = (0..25).map(|index| 300.0 + index as f64 * 0.37).collect();
        let y: Vec<f64> = x.iter().map(|value| (value * 0.1).sin() * 50.0 + 3.0).collect();
        let y2 = spline_second_derivatives(&x, &y, SplineBoundary::Natural).expect("valid knots");

        for mode in [InterpolationMode::Linear, InterpolationMode::Cubic] {
            for (knot, expected) in x.iter().zip(&y) {
                let actual = spline_interpolate(&x, &y, &y2, *knot, mode).expect("inside range");
                assert!(
                    (actual - expected).abs() <= 1.0e-9 * expected.abs().max(1.0),
                    "{mode:?} at {knot}: {actual} vs {expected}"
                );
            }
        }
    }

    #[test]
    fn cubic_spline_reproduces_cubic_with_clamped_ends() {
        let f = |x: f64| 0.5 * x * x * x - x * x + 2.0;
        let df = |x: f64| 1.5 * x * x - 2.0 * x;
        let x: Vec<f64> = (0..11).map(|index| index as f64 * 0.4).collect();
        let y: Vec<f64> = x.iter().map(|value| f(*value)).collect();
        let boundary = SplineBoundary::Clamped {
            first: df(x[0]),
            last: df(x[10]),
        };
        let y2 = spline_second_derivatives(&x, &y, boundary).expect("valid knots");

        for target in [0.13, 1.01, 2.5, 3.97] {
            let actual = spline_interpolate(&x, &y, &y2, target, InterpolationMode::Cubic)
                .expect("inside range");
            assert!((actual - f(target)).abs() < 1.0e-10, "{target}: {actual}");
        }
    }

    #[test]
    fn non_monotonic_abscissae_are_rejected() {
        let error = spline_second_derivatives(&[1.0, 2.0, 2.0], &[0.0, 1.0, 2.0], SplineBoundary::Natural)
            .expect_err("duplicate knot should fail");
        assert_eq!(
            error,
            SplineError::NonIncreasingAbscissa {
                index: 2,
                previous: 2.0,
                current: 2.0
            }
        );
    }

    #[test]
    fn extrapolation_is_an_error() {
        let spline = CubicSpline::new(vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 0.0]).expect("valid");
        assert!(matches!(
            spline.evaluate(2.5),
            Err(SplineError::OutOfRange { .. })
        ));
        assert!(matches!(
            spline.evaluate(-0.1),
            Err(SplineError::OutOfRange { .. })
        ));
        assert_eq!(spline.evaluate(2.0).expect("upper knot"), 0.0);
        assert_eq!(spline.evaluate_clamped(7.0), 0.0);
    }
}
