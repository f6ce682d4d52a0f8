//! Kurucz wavelength calibration: align a measured spectrum on a
//! high-resolution solar reference, sub-window by sub-window, and derive a
//! corrected wavelength grid for the whole detector.

mod model;

pub use model::{
    CalibrationState, KuruczCalibration, KuruczCalibrator, SubWindowFit, SubWindowStatus,
};

use crate::common::WavelengthInterval;
use crate::domain::{DoasError, DoasResult};
use crate::modules::convolution::SlitFunction;
use serde::{Deserialize, Serialize};

fn default_sub_windows() -> usize {
    5
}

fn default_shift_degree() -> usize {
    2
}

fn default_polynomial_degree() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_tolerance() -> f64 {
    1.0e-4
}

fn default_max_iterations() -> usize {
    20
}

fn default_singular_value_threshold() -> f64 {
    1.0e-12
}

fn default_slit() -> SlitFunction {
    SlitFunction::Gaussian { fwhm: 0.5 }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KuruczSettings {
    #[serde(default = "default_sub_windows")]
    pub sub_windows: usize,
    /// Calibrated interval; the whole detector when absent.
    #[serde(default)]
    pub window: Option<WavelengthInterval>,
    /// Degree of the shift polynomial applied across the detector.
    #[serde(default = "default_shift_degree")]
    pub shift_degree: usize,
    #[serde(default = "default_true")]
    pub fit_stretch: bool,
    #[serde(default)]
    pub fit_stretch2: bool,
    #[serde(default)]
    pub fit_slit_width: bool,
    /// Highest power of the closure polynomial of each sub-window fit.
    #[serde(default = "default_polynomial_degree")]
    pub polynomial_degree: usize,
    #[serde(default = "default_slit")]
    pub slit: SlitFunction,
    #[serde(default)]
    pub initial_shift: f64,
    #[serde(default)]
    pub initial_stretch: f64,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_singular_value_threshold")]
    pub singular_value_threshold: f64,
    /// Pixel-to-wavelength polynomial used when a record has no grid.
    #[serde(default)]
    pub dispersion: Option<Vec<f64>>,
}

impl Default for KuruczSettings {
    fn default() -> Self {
        Self {
            sub_windows: default_sub_windows(),
            window: None,
            shift_degree: default_shift_degree(),
            fit_stretch: true,
            fit_stretch2: false,
            fit_slit_width: false,
            polynomial_degree: default_polynomial_degree(),
            slit: default_slit(),
            initial_shift: 0.0,
            initial_stretch: 0.0,
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
            singular_value_threshold: default_singular_value_threshold(),
            dispersion: None,
        }
    }
}

impl KuruczSettings {
    pub fn validate(&self) -> DoasResult<()> {
        let invalid = |message: String| Err(DoasError::input_validation("KURUCZ.SETTINGS", message));
        if self.sub_windows == 0 {
            return invalid("at least one sub-window is required".to_string());
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return invalid(format!("tolerance {} must be positive", self.tolerance));
        }
        if self.max_iterations == 0 {
            return invalid("max iterations must be >= 1".to_string());
        }
        if let Err(error) = self.slit.validate() {
            return invalid(error.to_string());
        }
        if let Some(dispersion) = &self.dispersion {
            if dispersion.len() < 2 {
                return invalid("dispersion polynomial needs an offset and a slope".to_string());
            }
        }
        Ok(())
    }

    /// Number of non-linear parameters of a sub-window fit.
    pub fn non_linear_count(&self) -> usize {
        1 + usize::from(self.fit_stretch) + usize::from(self.fit_stretch2) + usize::from(self.fit_slit_width)
    }
}
