use super::linalg::{DenseMatrix, lu_factorize, lu_solve};
use tracing::debug;

const INITIAL_DAMPING: f64 = 1.0e-3;
const MIN_DAMPING: f64 = 1.0e-12;
const DAMPING_FACTOR: f64 = 10.0;
const MAX_STEP_ATTEMPTS: usize = 12;
const RELATIVE_STEP: f64 = 1.0e-6;
const STALLED_CHI_RATIO: f64 = 1.0e-12;

/// A least-squares problem in a handful of non-linear parameters.
///
/// `residuals` may solve an inner linear problem for every evaluation; the
/// driver only sees the resulting residual vector.
pub trait NonLinearProblem {
    type Error;

    fn parameter_count(&self) -> usize;

    fn residuals(&mut self, parameters: &[f64]) -> Result<Vec<f64>, Self::Error>;

    /// Typical magnitude of a parameter, used where its value is near zero.
    fn parameter_scale(&self, _index: usize) -> f64 {
        1.0
    }

    fn finite_difference_step(&self, index: usize, value: f64) -> f64 {
        RELATIVE_STEP * value.abs().max(self.parameter_scale(index))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimizerSettings {
    /// Relative parameter step below which the fit is converged.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for MinimizerSettings {
    fn default() -> Self {
        Self {
            tolerance: 1.0e-4,
            max_iterations: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NonLinearOutcome {
    /// Best parameters found, even when not converged.
    pub parameters: Vec<f64>,
    pub residuals: Vec<f64>,
    pub chi_square: f64,
    pub iterations: usize,
    pub converged: bool,
    /// Diagonal of `(J^T J)^-1` at the last linearization point; `None` when
    /// there is no non-linear parameter or the normal matrix is singular.
    pub unscaled_variances: Option<Vec<f64>>,
}

fn chi_square(residuals: &[f64]) -> f64 {
    residuals.iter().map(|value| value * value).sum()
}

/// Levenberg-Marquardt minimization of `sum(residuals^2)` with a
/// forward-difference Jacobian.
///
/// A problem without parameters is evaluated once and reported converged
/// after one iteration. A trial step whose evaluation fails is treated as a
/// rejected step; failures at the current point are returned.
pub fn minimize<P: NonLinearProblem>(
    problem: &mut P,
    initial: &[f64],
    settings: MinimizerSettings,
) -> Result<NonLinearOutcome, P::Error> {
    let count = problem.parameter_count();
    let mut parameters = initial.to_vec();
    parameters.resize(count, 0.0);

    let mut residuals = problem.residuals(&parameters)?;
    let mut chi = chi_square(&residuals);
    if count == 0 {
        return Ok(NonLinearOutcome {
            parameters,
            residuals,
            chi_square: chi,
            iterations: 1,
            converged: true,
            unscaled_variances: None,
        });
    }

    let mut damping = INITIAL_DAMPING;
    let mut unscaled_variances = None;

    for iteration in 1..=settings.max_iterations.max(1) {
        let jacobian = forward_jacobian(problem, &parameters, &residuals)?;
        let (normal, gradient) = normal_equations(&jacobian, &residuals);
        unscaled_variances = inverse_diagonal(&normal);

        let mut accepted = false;
        let mut converged = false;
        for _ in 0..MAX_STEP_ATTEMPTS {
            let mut damped = normal.clone();
            for index in 0..count {
                let diagonal = normal[(index, index)];
                damped[(index, index)] += damping * if diagonal > 0.0 { diagonal } else { 1.0 };
            }
            let negative_gradient: Vec<f64> = gradient.iter().map(|value| -value).collect();
            let Ok(step) = lu_solve(&damped, &negative_gradient) else {
                damping *= DAMPING_FACTOR;
                continue;
            };

            let small = step.iter().enumerate().all(|(index, delta)| {
                delta.abs()
                    <= settings.tolerance * parameters[index].abs().max(problem.parameter_scale(index))
            });
            let trial: Vec<f64> = parameters.iter().zip(&step).map(|(p, d)| p + d).collect();

            match problem.residuals(&trial) {
                Ok(trial_residuals) if chi_square(&trial_residuals) <= chi => {
                    let trial_chi = chi_square(&trial_residuals);
                    let stalled = chi - trial_chi <= STALLED_CHI_RATIO * chi;
                    parameters = trial;
                    residuals = trial_residuals;
                    chi = trial_chi;
                    damping = (damping / DAMPING_FACTOR).max(MIN_DAMPING);
                    accepted = true;
                    converged = small || stalled;
                    break;
                }
                _ if small => {
                    converged = true;
                    break;
                }
                _ => damping *= DAMPING_FACTOR,
            }
        }

        debug!(iteration, chi_square = chi, damping, accepted, converged, "non-linear step");

        if converged {
            return Ok(NonLinearOutcome {
                parameters,
                residuals,
                chi_square: chi,
                iterations: iteration,
                converged: true,
                unscaled_variances,
            });
        }
        if !accepted {
            return Ok(NonLinearOutcome {
                parameters,
                residuals,
                chi_square: chi,
                iterations: iteration,
                converged: false,
                unscaled_variances,
            });
        }
    }

    Ok(NonLinearOutcome {
        parameters,
        residuals,
        chi_square: chi,
        iterations: settings.max_iterations.max(1),
        converged: false,
        unscaled_variances,
    })
}

fn forward_jacobian<P: NonLinearProblem>(
    problem: &mut P,
    parameters: &[f64],
    residuals: &[f64],
) -> Result<DenseMatrix, P::Error> {
    let mut jacobian = DenseMatrix::zeros(residuals.len(), parameters.len());
    let mut shifted = parameters.to_vec();
    for col in 0..parameters.len() {
        let step = problem.finite_difference_step(col, parameters[col]);
        shifted[col] = parameters[col] + step;
        // Near a domain edge the forward point may be unusable.
        let (perturbed, signed_step) = match problem.residuals(&shifted) {
            Ok(values) => (values, step),
            Err(_) => {
                shifted[col] = parameters[col] - step;
                (problem.residuals(&shifted)?, -step)
            }
        };
        shifted[col] = parameters[col];

        for (row, (moved, base)) in perturbed.iter().zip(residuals).enumerate() {
            jacobian[(row, col)] = (moved - base) / signed_step;
        }
    }
    Ok(jacobian)
}

fn normal_equations(jacobian: &DenseMatrix, residuals: &[f64]) -> (DenseMatrix, Vec<f64>) {
    let rows = jacobian.nrows();
    let cols = jacobian.ncols();
    let mut normal = DenseMatrix::zeros(cols, cols);
    let mut gradient = vec![0.0; cols];
    for i in 0..cols {
        for j in 0..cols {
            normal[(i, j)] = (0..rows).map(|row| jacobian[(row, i)] * jacobian[(row, j)]).sum();
        }
        gradient[i] = (0..rows).map(|row| jacobian[(row, i)] * residuals[row]).sum();
    }
    (normal, gradient)
}

fn inverse_diagonal(normal: &DenseMatrix) -> Option<Vec<f64>> {
    let decomposition = lu_factorize(normal).ok()?;
    let size = normal.nrows();
    let mut unit = vec![0.0; size];
    let mut diagonal = Vec::with_capacity(size);
    for index in 0..size {
        unit[index] = 1.0;
        let column = decomposition.solve(&unit).ok()?;
        unit[index] = 0.0;
        diagonal.push(column[index]);
    }
    Some(diagonal)
}
