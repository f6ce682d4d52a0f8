//! Slit-function convolution of high-resolution spectra and the rotational
//! Raman (Ring) spectrum.

mod ring;
mod slit;

pub use ring::{RingSpectrum, raman_ring_spectrum, raman_source};
pub use slit::{SlitError, SlitFunction};

use crate::domain::DoasError;
use crate::numerics::{CubicSpline, SplineError, first_non_increasing};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConvolutionError {
    #[error("spectrum has {wavelengths} wavelengths but {values} values")]
    LengthMismatch { wavelengths: usize, values: usize },
    #[error("convolution needs at least 2 source points, got {actual}")]
    InsufficientPoints { actual: usize },
    #[error("source wavelengths must be strictly increasing at index {index}")]
    NonIncreasingGrid { index: usize },
    #[error("target wavelength {target} is outside the source range [{lower}, {upper}]")]
    TargetOutsideSource { target: f64, lower: f64, upper: f64 },
    #[error("slit function has no weight on the source grid around {target} nm")]
    EmptySupport { target: f64 },
    #[error("I0 correction needs a positive column, got {column}")]
    NonPositiveColumn { column: f64 },
    #[error("I0-corrected intensity is not positive at {target} nm")]
    NonPositiveIntensity { target: f64 },
    #[error("ring temperature must be > 0 K, got {temperature}")]
    InvalidTemperature { temperature: f64 },
    #[error(transparent)]
    Slit(#[from] SlitError),
    #[error(transparent)]
    Spline(#[from] SplineError),
}

impl From<ConvolutionError> for DoasError {
    fn from(error: ConvolutionError) -> Self {
        let operation = "CONVOLUTION";
        match error {
            ConvolutionError::EmptySupport { .. } | ConvolutionError::NonPositiveIntensity { .. } => {
                DoasError::numerical(operation, error.to_string())
            }
            _ => DoasError::input_validation(operation, error.to_string()),
        }
    }
}

fn validate_source(wavelengths: &[f64], values: &[f64]) -> Result<(), ConvolutionError> {
    if wavelengths.len() != values.len() {
        return Err(ConvolutionError::LengthMismatch {
            wavelengths: wavelengths.len(),
            values: values.len(),
        });
    }
    if wavelengths.len() < 2 {
        return Err(ConvolutionError::InsufficientPoints {
            actual: wavelengths.len(),
        });
    }
    if let Some(index) = first_non_increasing(wavelengths) {
        return Err(ConvolutionError::NonIncreasingGrid { index });
    }
    Ok(())
}

/// `integral(values(l) * S(target - l)) / integral(S(target - l))`, both
/// integrals by the trapezoid rule over the same source abscissae.
fn convolve_point(
    wavelengths: &[f64],
    values: &[f64],
    slit: &SlitFunction,
    target: f64,
) -> Result<f64, ConvolutionError> {
    let (lower_offset, upper_offset) = slit.support();
    // Source points l with target - l inside the support.
    let first = wavelengths
        .partition_point(|wavelength| *wavelength < target - upper_offset)
        .saturating_sub(1);
    let last = wavelengths
        .partition_point(|wavelength| *wavelength <= target - lower_offset)
        .min(wavelengths.len() - 1);

    let mut weighted = 0.0;
    let mut norm = 0.0;
    for index in first..last {
        let width = wavelengths[index + 1] - wavelengths[index];
        let left = slit.value(target - wavelengths[index]);
        let right = slit.value(target - wavelengths[index + 1]);
        weighted += 0.5 * width * (left * values[index] + right * values[index + 1]);
        norm += 0.5 * width * (left + right);
    }

    if norm <= 0.0 {
        return Err(ConvolutionError::EmptySupport { target });
    }
    Ok(weighted / norm)
}

/// Convolve a tabulated spectrum with `slit` and sample it at `target_grid`.
///
/// The result is normalized by the slit integral on the same abscissae, so a
/// constant spectrum stays constant and integrated optical depth is kept.
pub fn convolve_cross_section(
    wavelengths: &[f64],
    values: &[f64],
    slit: &SlitFunction,
    target_grid: &[f64],
) -> Result<Vec<f64>, ConvolutionError> {
    validate_source(wavelengths, values)?;
    slit.validate()?;

    let lower = wavelengths[0];
    let upper = wavelengths[wavelengths.len() - 1];
    target_grid
        .iter()
        .map(|target| {
            if !(lower..=upper).contains(target) {
                return Err(ConvolutionError::TargetOutsideSource {
                    target: *target,
                    lower,
                    upper,
                });
            }
            convolve_point(wavelengths, values, slit, *target)
        })
        .collect()
}

/// Effective cross-section seen through the slit when the solar spectrum is
/// structured: `-ln(conv(I0 exp(-sigma N)) / conv(I0)) / N`.
pub fn convolve_with_i0_correction(
    wavelengths: &[f64],
    values: &[f64],
    solar_wavelengths: &[f64],
    solar_values: &[f64],
    slit: &SlitFunction,
    target_grid: &[f64],
    column: f64,
) -> Result<Vec<f64>, ConvolutionError> {
    validate_source(wavelengths, values)?;
    validate_source(solar_wavelengths, solar_values)?;
    if !column.is_finite() || column <= 0.0 {
        return Err(ConvolutionError::NonPositiveColumn { column });
    }

    let solar = CubicSpline::new(solar_wavelengths.to_vec(), solar_values.to_vec())?;
    let solar_on_grid = wavelengths
        .iter()
        .map(|wavelength| solar.evaluate(*wavelength))
        .collect::<Result<Vec<f64>, SplineError>>()?;
    let attenuated: Vec<f64> = solar_on_grid
        .iter()
        .zip(values)
        .map(|(intensity, sigma)| intensity * (-sigma * column).exp())
        .collect();

    let numerator = convolve_cross_section(wavelengths, &attenuated, slit, target_grid)?;
    let denominator = convolve_cross_section(wavelengths, &solar_on_grid, slit, target_grid)?;
    numerator
        .iter()
        .zip(&denominator)
        .zip(target_grid)
        .map(|((num, den), target)| {
            if *num <= 0.0 || *den <= 0.0 {
                Err(ConvolutionError::NonPositiveIntensity { target: *target })
            } else {
                Ok(-(num / den).ln() / column)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        ConvolutionError, SlitFunction, convolve_cross_section, convolve_with_i0_correction,
    };

    fn grid(start: f64, step: f64, count: usize) -> Vec<f64> {
        (0..count).map(|index| start + step * index as f64).collect()
    }

    fn absorption_line(wavelengths: &[f64], centre: f64, width: f64) -> Vec<f64> {
        wavelengths
            .iter()
            .map(|wavelength| 1.0e-19 * (-((wavelength - centre) / width).powi(2)).exp())
            .collect()
    }

    fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
        x.windows(2)
            .zip(y.windows(2))
            .map(|(x, y)| 0.5 * (x[1] - x[0]) * (y[0] + y[1]))
            .sum()
    }

    #[test]
    fn constant_spectrum_is_unchanged() {
        let wavelengths = grid(300.0, 0.01, 2001);
        let values = vec![3.5; wavelengths.len()];
        for slit in [
            SlitFunction::Gaussian { fwhm: 0.5 },
            SlitFunction::Boxcar { width: 0.3 },
        ] {
            let convolved =
                convolve_cross_section(&wavelengths, &values, &slit, &[300.0, 310.0, 320.0])
                    .expect("targets inside source");
            for value in convolved {
                assert!((value - 3.5).abs() < 1.0e-12, "{slit:?}: {value}");
            }
        }
    }

    #[test]
    fn convolution_preserves_integrated_absorption() {
        let wavelengths = grid(300.0, 0.01, 4001);
        let values = absorption_line(&wavelengths, 320.0, 0.05);
        let slit = SlitFunction::Gaussian { fwhm: 0.8 };
        let target = grid(305.0, 0.05, 601);
        let convolved =
            convolve_cross_section(&wavelengths, &values, &slit, &target).expect("inside source");

        let before = trapezoid(&wavelengths, &values);
        let after = trapezoid(&target, &convolved);
        assert!(((after - before) / before).abs() < 1.0e-3, "{before} vs {after}");
        let peak = convolved.iter().copied().fold(0.0, f64::max);
        assert!(peak < 0.2e-19, "line should be broadened, peak {peak}");
    }

    #[test]
    fn targets_outside_the_source_are_rejected() {
        let wavelengths = grid(300.0, 0.1, 11);
        let values = vec![1.0; 11];
        let error = convolve_cross_section(
            &wavelengths,
            &values,
            &SlitFunction::Gaussian { fwhm: 0.2 },
            &[299.0],
        )
        .expect_err("target below source should fail");
        assert!(matches!(error, ConvolutionError::TargetOutsideSource { .. }));
    }

    #[test]
    fn i0_correction_vanishes_for_a_flat_sun() {
        let wavelengths = grid(300.0, 0.01, 2001);
        let values = absorption_line(&wavelengths, 310.0, 0.1);
        let solar = vec![1.0e14; wavelengths.len()];
        let slit = SlitFunction::Gaussian { fwhm: 0.5 };
        let target = grid(305.0, 0.1, 101);

        let plain = convolve_cross_section(&wavelengths, &values, &slit, &target)
            .expect("inside source");
        // Small column: the correction reduces to the plain convolution.
        let corrected = convolve_with_i0_correction(
            &wavelengths, &values, &wavelengths, &solar, &slit, &target, 1.0e12,
        )
        .expect("inside source");
        for (a, b) in plain.iter().zip(&corrected) {
            assert!((a - b).abs() <= 1.0e-4 * 1.0e-19, "{a} vs {b}");
        }

        let error = convolve_with_i0_correction(
            &wavelengths, &values, &wavelengths, &solar, &slit, &target, 0.0,
        )
        .expect_err("zero column should fail");
        assert_eq!(error, ConvolutionError::NonPositiveColumn { column: 0.0 });
    }
}
