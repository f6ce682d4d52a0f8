use super::bessel::bessel_i0;
use super::fft::{FftError, circular_convolution, next_power_of_two};
use super::linalg::{DenseMatrix, LuError, lu_solve};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Filter designs; widths are in pixels and must be odd.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FilterKind {
    /// Windowed-sinc low-pass. `cutoff` and `pass_band` are in cycles per
    /// pixel, `tolerance` is the admitted pass/stop band ripple.
    #[serde(rename_all = "camelCase")]
    Kaiser {
        cutoff: f64,
        pass_band: f64,
        tolerance: f64,
    },
    Gaussian {
        fwhm: f64,
    },
    Boxcar {
        width: usize,
    },
    Triangular {
        width: usize,
    },
    Binomial {
        width: usize,
    },
    SavitzkyGolay {
        width: usize,
        order: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgePolicy {
    /// Indices wrap around the signal.
    Circular,
    /// Indices reflect about the first and last pixel.
    #[default]
    Mirror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterMode {
    #[default]
    LowPass,
    /// `signal - lowpass(signal)`.
    HighPassSubtract,
    /// `signal / lowpass(signal)`.
    HighPassDivide,
}

impl FilterMode {
    pub const fn is_linear(self) -> bool {
        !matches!(self, Self::HighPassDivide)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("filter width must be odd and >= 1, got {width}")]
    InvalidWidth { width: usize },
    #[error("filter parameter '{name}' is out of range: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("Savitzky-Golay order {order} must be lower than width {width}")]
    OrderTooHigh { order: usize, width: usize },
    #[error("filter coefficients must have odd length, got {length}")]
    EvenKernel { length: usize },
    #[error("cannot filter an empty signal")]
    EmptySignal,
    #[error("filter pass count must be >= 1")]
    NoPasses,
    #[error("high-pass division by zero low-pass value at pixel {index}")]
    ZeroLowPass { index: usize },
    #[error(transparent)]
    Fft(#[from] FftError),
    #[error("Savitzky-Golay normal equations: {0}")]
    Lu(#[from] LuError),
}

/// Build the symmetric, odd-length kernel of `kind`, normalized to unit DC gain.
pub fn build_filter(kind: FilterKind) -> Result<Vec<f64>, FilterError> {
    let raw = match kind {
        FilterKind::Kaiser {
            cutoff,
            pass_band,
            tolerance,
        } => kaiser_kernel(cutoff, pass_band, tolerance)?,
        FilterKind::Gaussian { fwhm } => gaussian_kernel(fwhm)?,
        FilterKind::Boxcar { width } => {
            check_width(width)?;
            vec![1.0; width]
        }
        FilterKind::Triangular { width } => {
            let half = check_width(width)?;
            (0..width)
                .map(|index| (half + 1) as f64 - (index as f64 - half as f64).abs())
                .collect()
        }
        FilterKind::Binomial { width } => {
            check_width(width)?;
            binomial_row(width - 1)
        }
        FilterKind::SavitzkyGolay { width, order } => savitzky_golay_kernel(width, order)?,
    };

    normalize_unit_gain(raw)
}

fn check_width(width: usize) -> Result<usize, FilterError> {
    if width == 0 || width % 2 == 0 {
        return Err(FilterError::InvalidWidth { width });
    }
    Ok(width / 2)
}

fn normalize_unit_gain(mut kernel: Vec<f64>) -> Result<Vec<f64>, FilterError> {
    let gain: f64 = kernel.iter().sum();
    if !gain.is_finite() || gain.abs() < f64::EPSILON {
        return Err(FilterError::InvalidParameter {
            name: "dc_gain",
            value: gain,
        });
    }
    for value in &mut kernel {
        *value /= gain;
    }
    Ok(kernel)
}

/// Kaiser attenuation-to-beta design equation.
pub fn kaiser_beta(attenuation_db: f64) -> f64 {
    if attenuation_db > 50.0 {
        0.1102 * (attenuation_db - 8.7)
    } else if attenuation_db >= 21.0 {
        0.5842 * (attenuation_db - 21.0).powf(0.4) + 0.07886 * (attenuation_db - 21.0)
    } else {
        0.0
    }
}

fn kaiser_kernel(cutoff: f64, pass_band: f64, tolerance: f64) -> Result<Vec<f64>, FilterError> {
    if !cutoff.is_finite() || cutoff <= 0.0 || cutoff >= 0.5 {
        return Err(FilterError::InvalidParameter {
            name: "cutoff",
            value: cutoff,
        });
    }
    if !pass_band.is_finite() || pass_band <= 0.0 || pass_band >= 0.5 {
        return Err(FilterError::InvalidParameter {
            name: "pass_band",
            value: pass_band,
        });
    }
    if !tolerance.is_finite() || tolerance <= 0.0 || tolerance >= 1.0 {
        return Err(FilterError::InvalidParameter {
            name: "tolerance",
            value: tolerance,
        });
    }

    // Equal pass and stop band ripple expressed as attenuation.
    let attenuation = -20.0 * tolerance.log10();
    let beta = kaiser_beta(attenuation);
    let order = ((attenuation - 7.95) / (14.36 * pass_band)).ceil().max(2.0) as usize;
    let half = order.div_ceil(2);
    let i0_beta = bessel_i0(beta);

    Ok((0..=2 * half)
        .map(|index| {
            let k = index as f64 - half as f64;
            let ideal = if k == 0.0 {
                2.0 * cutoff
            } else {
                (2.0 * PI * cutoff * k).sin() / (PI * k)
            };
            let ratio = k / half as f64;
            let window = bessel_i0(beta * (1.0 - ratio * ratio).max(0.0).sqrt()) / i0_beta;
            ideal * window
        })
        .collect())
}

fn gaussian_kernel(fwhm: f64) -> Result<Vec<f64>, FilterError> {
    if !fwhm.is_finite() || fwhm <= 0.0 {
        return Err(FilterError::InvalidParameter {
            name: "fwhm",
            value: fwhm,
        });
    }
    let sigma = fwhm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt());
    let half = (3.0 * sigma).ceil().max(1.0) as usize;
    Ok((0..=2 * half)
        .map(|index| {
            let k = index as f64 - half as f64;
            (-0.5 * (k / sigma).powi(2)).exp()
        })
        .collect())
}

fn binomial_row(order: usize) -> Vec<f64> {
    let mut row = vec![1.0; order + 1];
    for k in 1..order {
        row[k] = row[k - 1] * (order - k + 1) as f64 / k as f64;
    }
    row
}

/// Smoothing weights of the local least-squares polynomial of `order` over
/// `width` points, evaluated at the window centre.
fn savitzky_golay_kernel(width: usize, order: usize) -> Result<Vec<f64>, FilterError> {
    let half = check_width(width)?;
    if order >= width {
        return Err(FilterError::OrderTooHigh { order, width });
    }

    let terms = order + 1;
    let mut normal = DenseMatrix::zeros(terms, terms);
    for index in 0..width {
        let k = index as f64 - half as f64;
        for row in 0..terms {
            for col in 0..terms {
                normal[(row, col)] += k.powi((row + col) as i32);
            }
        }
    }

    let mut unit = vec![0.0; terms];
    unit[0] = 1.0;
    let weights = lu_solve(&normal, &unit)?;

    Ok((0..width)
        .map(|index| {
            let k = index as f64 - half as f64;
            weights
                .iter()
                .enumerate()
                .map(|(power, weight)| weight * k.powi(power as i32))
                .sum()
        })
        .collect())
}

fn edge_index(index: isize, length: usize, edge: EdgePolicy) -> usize {
    let n = length as isize;
    match edge {
        EdgePolicy::Circular => index.rem_euclid(n) as usize,
        EdgePolicy::Mirror => {
            if length == 1 {
                return 0;
            }
            let period = 2 * (n - 1);
            let folded = index.rem_euclid(period);
            (if folded >= n { period - folded } else { folded }) as usize
        }
    }
}

/// `out[i] = sum(c[k] * signal[i + k - half])` with out-of-range indices
/// resolved by `edge`.
pub fn apply_filter_convolution(
    signal: &[f64],
    coefficients: &[f64],
    edge: EdgePolicy,
) -> Result<Vec<f64>, FilterError> {
    let half = check_kernel(signal, coefficients)?;
    let n = signal.len();
    Ok((0..n)
        .map(|i| {
            coefficients
                .iter()
                .enumerate()
                .map(|(k, weight)| {
                    let index = i as isize + k as isize - half as isize;
                    weight * signal[edge_index(index, n, edge)]
                })
                .sum()
        })
        .collect())
}

/// Same result as [`apply_filter_convolution`], computed by FFT over the
/// edge-extended signal padded to a power-of-two length.
pub fn apply_filter_fft(
    signal: &[f64],
    coefficients: &[f64],
    edge: EdgePolicy,
) -> Result<Vec<f64>, FilterError> {
    let half = check_kernel(signal, coefficients)?;
    let n = signal.len();
    let length = next_power_of_two(n + 2 * half);

    let extended: Vec<f64> = (0..length)
        .map(|m| signal[edge_index(m as isize - half as isize, n, edge)])
        .collect();
    let mut kernel = vec![0.0; length];
    for (k, weight) in coefficients.iter().enumerate() {
        let lag = half as isize - k as isize;
        kernel[lag.rem_euclid(length as isize) as usize] = *weight;
    }

    let convolved = circular_convolution(&extended, &kernel)?;
    Ok(convolved[half..half + n].to_vec())
}

fn check_kernel(signal: &[f64], coefficients: &[f64]) -> Result<usize, FilterError> {
    if signal.is_empty() {
        return Err(FilterError::EmptySignal);
    }
    if coefficients.len() % 2 == 0 {
        return Err(FilterError::EvenKernel {
            length: coefficients.len(),
        });
    }
    Ok(coefficients.len() / 2)
}

fn default_passes() -> usize {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSettings {
    #[serde(flatten)]
    pub kind: FilterKind,
    #[serde(default = "default_passes")]
    pub passes: usize,
    #[serde(default)]
    pub edge: EdgePolicy,
    #[serde(default)]
    pub mode: FilterMode,
}

impl FilterSettings {
    pub fn low_pass(kind: FilterKind) -> Self {
        Self {
            kind,
            passes: 1,
            edge: EdgePolicy::Mirror,
            mode: FilterMode::LowPass,
        }
    }
}

/// A designed filter ready to be applied repeatedly.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    settings: FilterSettings,
    coefficients: Vec<f64>,
}

impl Filter {
    pub fn new(settings: FilterSettings) -> Result<Self, FilterError> {
        if settings.passes == 0 {
            return Err(FilterError::NoPasses);
        }
        let coefficients = build_filter(settings.kind)?;
        Ok(Self {
            settings,
            coefficients,
        })
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn low_pass(&self, signal: &[f64]) -> Result<Vec<f64>, FilterError> {
        let mut filtered = signal.to_vec();
        for _ in 0..self.settings.passes {
            filtered = apply_filter_convolution(&filtered, &self.coefficients, self.settings.edge)?;
        }
        Ok(filtered)
    }

    pub fn apply(&self, signal: &[f64]) -> Result<Vec<f64>, FilterError> {
        let smooth = self.low_pass(signal)?;
        match self.settings.mode {
            FilterMode::LowPass => Ok(smooth),
            FilterMode::HighPassSubtract => Ok(signal
                .iter()
                .zip(&smooth)
                .map(|(value, low)| value - low)
                .collect()),
            FilterMode::HighPassDivide => signal
                .iter()
                .zip(&smooth)
                .enumerate()
                .map(|(index, (value, low))| {
                    if *low == 0.0 {
                        Err(FilterError::ZeroLowPass { index })
                    } else {
                        Ok(value / low)
                    }
                })
                .collect(),
        }
    }
}
