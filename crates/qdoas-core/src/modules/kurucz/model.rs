use super::KuruczSettings;
use crate::domain::{DoasError, DoasResult, Spectrum};
use crate::modules::convolution::{SlitFunction, convolve_cross_section};
use crate::modules::cross_section::CrossSection;
use crate::numerics::{
    CubicSpline, DenseMatrix, NonLinearProblem, eval_polynomial, first_non_increasing,
    fit_polynomial, minimize, solve_least_squares, MinimizerSettings,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum CalibrationState {
    Uncalibrated,
    Calibrating { sub_window: usize },
    Calibrated,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SubWindowStatus {
    Converged,
    /// Iteration cap reached; the best estimate is kept but not used for
    /// the shift polynomial.
    NotConverged,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubWindowFit {
    pub index: usize,
    pub centre: f64,
    pub first_pixel: usize,
    pub last_pixel: usize,
    pub shift: f64,
    pub stretch: f64,
    pub stretch2: f64,
    pub fwhm: f64,
    pub rms: f64,
    pub iterations: usize,
    pub status: SubWindowStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KuruczCalibration {
    pub sub_windows: Vec<SubWindowFit>,
    /// Shift polynomial in `(lambda - origin)`, lowest power first.
    pub shift_polynomial: Vec<f64>,
    pub origin: f64,
    pub wavelengths: Vec<f64>,
}

impl KuruczCalibration {
    pub fn converged_sub_windows(&self) -> usize {
        self.sub_windows
            .iter()
            .filter(|fit| fit.status == SubWindowStatus::Converged)
            .count()
    }

    /// `spectrum` with the calibrated wavelength grid.
    pub fn apply(&self, spectrum: &Spectrum) -> DoasResult<Spectrum> {
        spectrum.clone().with_wavelengths(self.wavelengths.clone())
    }
}

/// Calibrates records against one solar reference.
#[derive(Debug, Clone)]
pub struct KuruczCalibrator {
    settings: KuruczSettings,
    solar: Arc<CrossSection>,
    convolved_solar: CubicSpline,
    state: CalibrationState,
}

impl KuruczCalibrator {
    /// Validate `settings` and convolve the solar reference with the slit once.
    pub fn new(settings: KuruczSettings, solar: Arc<CrossSection>) -> DoasResult<Self> {
        settings.validate()?;
        if let Some(index) = solar.values().iter().position(|value| *value <= 0.0) {
            return Err(DoasError::input_validation(
                "KURUCZ.SOLAR",
                format!("solar reference must be positive, pixel {index} is not"),
            ));
        }

        let convolved = convolve_cross_section(
            solar.wavelengths(),
            solar.values(),
            &settings.slit,
            solar.wavelengths(),
        )?;
        let convolved_solar =
            CubicSpline::new(solar.wavelengths().to_vec(), convolved).map_err(|error| {
                DoasError::internal("KURUCZ.SOLAR", format!("convolved solar spline: {error}"))
            })?;

        Ok(Self {
            settings,
            solar,
            convolved_solar,
            state: CalibrationState::Uncalibrated,
        })
    }

    pub fn settings(&self) -> &KuruczSettings {
        &self.settings
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    /// Slit-convolved solar reference sampled at `grid`.
    pub fn convolved_solar(&self, grid: &[f64]) -> DoasResult<Vec<f64>> {
        grid.iter()
            .map(|wavelength| {
                self.convolved_solar.evaluate(*wavelength).map_err(|error| {
                    DoasError::input_validation("KURUCZ.SOLAR", error.to_string())
                })
            })
            .collect()
    }

    /// Initial grid of `spectrum`: its own wavelengths, or the configured
    /// dispersion polynomial evaluated at each pixel index.
    pub fn initial_grid(&self, spectrum: &Spectrum) -> DoasResult<Vec<f64>> {
        if let Some(wavelengths) = spectrum.wavelengths() {
            return Ok(wavelengths.to_vec());
        }
        let dispersion = self.settings.dispersion.as_ref().ok_or_else(|| {
            DoasError::input_validation(
                "KURUCZ.GRID",
                "record has no wavelengths and no dispersion polynomial is configured",
            )
        })?;
        Ok((0..spectrum.len())
            .map(|pixel| eval_polynomial(pixel as f64, dispersion, dispersion.len()))
            .collect())
    }

    pub fn calibrate(&mut self, spectrum: &Spectrum) -> DoasResult<KuruczCalibration> {
        let result = self.run(spectrum);
        self.state = match result {
            Ok(_) => CalibrationState::Calibrated,
            Err(_) => CalibrationState::Failed,
        };
        result
    }

    fn run(&mut self, spectrum: &Spectrum) -> DoasResult<KuruczCalibration> {
        let grid = self.initial_grid(spectrum)?;
        if let Some(index) = first_non_increasing(&grid) {
            return Err(DoasError::input_validation(
                "KURUCZ.GRID",
                format!("initial wavelength grid is not increasing at pixel {index}"),
            ));
        }
        if let Some(index) = spectrum.signal().iter().position(|value| *value <= 0.0) {
            return Err(DoasError::input_validation(
                "KURUCZ.SIGNAL",
                format!("measured signal must be positive, pixel {index} is not"),
            ));
        }

        let (first, last) = self.calibrated_pixels(&grid)?;
        let bounds = sub_window_bounds(first, last, self.settings.sub_windows);
        let mut fits = Vec::with_capacity(bounds.len());
        for (index, (start, end)) in bounds.into_iter().enumerate() {
            self.state = CalibrationState::Calibrating { sub_window: index };
            let fit = self.fit_sub_window(index, &grid[start..=end], &spectrum.signal()[start..=end], start);
            match &fit.status {
                SubWindowStatus::Failed { reason } => {
                    warn!(sub_window = index, centre = fit.centre, reason = %reason, "kurucz sub-window failed");
                }
                status => debug!(
                    sub_window = index,
                    shift = fit.shift,
                    stretch = fit.stretch,
                    rms = fit.rms,
                    iterations = fit.iterations,
                    ?status,
                    "kurucz sub-window"
                ),
            }
            fits.push(fit);
        }

        let usable: Vec<&SubWindowFit> = fits
            .iter()
            .filter(|fit| fit.status == SubWindowStatus::Converged)
            .collect();
        if usable.is_empty() {
            return Err(DoasError::calibration(
                "KURUCZ.SHIFT_POLYNOMIAL",
                "no sub-window converged",
            ));
        }

        let origin = 0.5 * (grid[first] + grid[last]);
        let degree = self.settings.shift_degree.min(usable.len() - 1);
        let centres: Vec<f64> = usable.iter().map(|fit| fit.centre - origin).collect();
        let shifts: Vec<f64> = usable.iter().map(|fit| fit.shift).collect();
        let shift_polynomial = fit_polynomial(&centres, &shifts, degree).map_err(|error| {
            DoasError::calibration("KURUCZ.SHIFT_POLYNOMIAL", error.to_string())
        })?;

        let wavelengths: Vec<f64> = grid
            .iter()
            .map(|wavelength| {
                wavelength + eval_polynomial(wavelength - origin, &shift_polynomial, shift_polynomial.len())
            })
            .collect();
        if let Some(index) = first_non_increasing(&wavelengths) {
            return Err(DoasError::calibration(
                "KURUCZ.MONOTONIC",
                format!("calibrated grid is not increasing at pixel {index}"),
            ));
        }

        info!(
            sub_windows = fits.len(),
            converged = usable.len(),
            degree,
            "kurucz calibration done"
        );
        Ok(KuruczCalibration {
            sub_windows: fits,
            shift_polynomial,
            origin,
            wavelengths,
        })
    }

    fn calibrated_pixels(&self, grid: &[f64]) -> DoasResult<(usize, usize)> {
        let Some(window) = self.settings.window else {
            return Ok((0, grid.len() - 1));
        };
        let first = grid.partition_point(|wavelength| *wavelength < window.start);
        let end = grid.partition_point(|wavelength| *wavelength <= window.end);
        if end <= first + 1 {
            return Err(DoasError::input_validation(
                "KURUCZ.WINDOW",
                format!(
                    "calibration window [{}, {}] holds fewer than 2 pixels",
                    window.start, window.end
                ),
            ));
        }
        Ok((first, end - 1))
    }

    fn fit_sub_window(&self, index: usize, grid: &[f64], signal: &[f64], offset: usize) -> SubWindowFit {
        let centre = 0.5 * (grid[0] + grid[grid.len() - 1]);
        let mut fit = SubWindowFit {
            index,
            centre,
            first_pixel: offset,
            last_pixel: offset + grid.len() - 1,
            shift: self.settings.initial_shift,
            stretch: self.settings.initial_stretch,
            stretch2: 0.0,
            fwhm: self.settings.slit.fwhm(),
            rms: f64::NAN,
            iterations: 0,
            status: SubWindowStatus::NotConverged,
        };

        let terms = self.settings.polynomial_degree + 1;
        let needed = terms + self.settings.non_linear_count() + 1;
        if grid.len() < needed {
            fit.status = SubWindowStatus::Failed {
                reason: format!("{} pixels, at least {} needed", grid.len(), needed),
            };
            return fit;
        }

        let mut problem = SubWindowProblem::new(self, grid, signal, centre);
        let initial = problem.initial_parameters();
        match minimize(&mut problem, &initial, MinimizerSettings {
            tolerance: self.settings.tolerance,
            max_iterations: self.settings.max_iterations,
        }) {
            Ok(outcome) => {
                let (shift, stretch, stretch2, scale) = problem.unpack(&outcome.parameters);
                fit.shift = shift;
                fit.stretch = stretch;
                fit.stretch2 = stretch2;
                fit.fwhm = self.settings.slit.scaled(scale).fwhm();
                fit.rms = (outcome.chi_square / grid.len() as f64).sqrt();
                fit.iterations = outcome.iterations;
                fit.status = if outcome.converged {
                    SubWindowStatus::Converged
                } else {
                    SubWindowStatus::NotConverged
                };
            }
            Err(error) => {
                fit.status = SubWindowStatus::Failed {
                    reason: error.message().to_string(),
                };
            }
        }
        fit
    }
}

/// Inclusive pixel bounds of `count` contiguous sub-windows over `[first, last]`.
fn sub_window_bounds(first: usize, last: usize, count: usize) -> Vec<(usize, usize)> {
    let pixels = last - first + 1;
    let count = count.clamp(1, pixels);
    (0..count)
        .map(|index| {
            let start = first + index * pixels / count;
            let end = first + (index + 1) * pixels / count - 1;
            (start, end)
        })
        .collect()
}

/// `ln(measured) - ln(solar(lambda'))` minus a closure polynomial, as a
/// function of the sub-window's shift, stretch and slit parameters.
struct SubWindowProblem<'a> {
    calibrator: &'a KuruczCalibrator,
    grid: &'a [f64],
    log_signal: Vec<f64>,
    centre: f64,
    design: DenseMatrix,
}

impl<'a> SubWindowProblem<'a> {
    fn new(calibrator: &'a KuruczCalibrator, grid: &'a [f64], signal: &[f64], centre: f64) -> Self {
        let terms = calibrator.settings.polynomial_degree + 1;
        let mut design = DenseMatrix::zeros(grid.len(), terms);
        for (row, wavelength) in grid.iter().enumerate() {
            let x = wavelength - centre;
            let mut power = 1.0;
            for col in 0..terms {
                design[(row, col)] = power;
                power *= x;
            }
        }
        Self {
            calibrator,
            grid,
            log_signal: signal.iter().map(|value| value.ln()).collect(),
            centre,
            design,
        }
    }

    fn initial_parameters(&self) -> Vec<f64> {
        let settings = &self.calibrator.settings;
        let mut parameters = vec![settings.initial_shift];
        if settings.fit_stretch {
            parameters.push(settings.initial_stretch);
        }
        if settings.fit_stretch2 {
            parameters.push(0.0);
        }
        if settings.fit_slit_width {
            parameters.push(1.0);
        }
        parameters
    }

    /// `(shift, stretch, stretch2, slit scale)` from the packed parameters.
    fn unpack(&self, parameters: &[f64]) -> (f64, f64, f64, f64) {
        let settings = &self.calibrator.settings;
        let mut values = parameters.iter().copied();
        let shift = values.next().unwrap_or(settings.initial_shift);
        let stretch = if settings.fit_stretch {
            values.next().unwrap_or(0.0)
        } else {
            settings.initial_stretch
        };
        let stretch2 = if settings.fit_stretch2 {
            values.next().unwrap_or(0.0)
        } else {
            0.0
        };
        let scale = if settings.fit_slit_width {
            values.next().unwrap_or(1.0)
        } else {
            1.0
        };
        (shift, stretch, stretch2, scale)
    }

    fn solar_at(&self, shifted: &[f64], scale: f64) -> DoasResult<Vec<f64>> {
        if !self.calibrator.settings.fit_slit_width {
            return self.calibrator.convolved_solar(shifted);
        }
        if !scale.is_finite() || scale <= 0.0 {
            return Err(DoasError::numerical(
                "KURUCZ.SLIT",
                format!("slit width scale {scale} is not positive"),
            ));
        }
        let slit: SlitFunction = self.calibrator.settings.slit.scaled(scale);
        let solar = &self.calibrator.solar;
        Ok(convolve_cross_section(solar.wavelengths(), solar.values(), &slit, shifted)?)
    }
}

impl NonLinearProblem for SubWindowProblem<'_> {
    type Error = DoasError;

    fn parameter_count(&self) -> usize {
        self.calibrator.settings.non_linear_count()
    }

    fn residuals(&mut self, parameters: &[f64]) -> DoasResult<Vec<f64>> {
        let (shift, stretch, stretch2, scale) = self.unpack(parameters);
        let shifted: Vec<f64> = self
            .grid
            .iter()
            .map(|wavelength| {
                let x = wavelength - self.centre;
                wavelength + shift + stretch * x + stretch2 * x * x
            })
            .collect();
        let solar = self.solar_at(&shifted, scale)?;

        let mut target = Vec::with_capacity(solar.len());
        for (log_signal, value) in self.log_signal.iter().zip(&solar) {
            if *value <= 0.0 {
                return Err(DoasError::numerical(
                    "KURUCZ.RESIDUAL",
                    "convolved solar reference is not positive",
                ));
            }
            target.push(log_signal - value.ln());
        }

        let solution = solve_least_squares(
            &self.design,
            &target,
            self.calibrator.settings.singular_value_threshold,
        )
        .map_err(|error| DoasError::numerical("KURUCZ.SVD", error.to_string()))?;
        Ok(solution.residual)
    }

    fn parameter_scale(&self, index: usize) -> f64 {
        // The slit scale is a ratio around 1; shift and stretch terms are
        // expressed in nm over a sub-window a few nm wide.
        if self.calibrator.settings.fit_slit_width && index + 1 == self.parameter_count() {
            1.0
        } else {
            0.1
        }
    }
}
