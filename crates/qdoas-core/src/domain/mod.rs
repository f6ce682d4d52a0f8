pub mod errors;

pub use errors::{DoasError, DoasErrorCategory, DoasResult, ErrorContext};

use serde::{Deserialize, Serialize};

/// Acquisition metadata every instrument reader is expected to provide.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectrumMetadata {
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub solar_zenith_angle: Option<f64>,
    #[serde(default)]
    pub integration_time: Option<f64>,
}

/// Normalized spectrum as produced by an instrument reader.
///
/// The signal is mandatory; the wavelength grid is absent for uncalibrated
/// records and is then derived by the calibration step.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", try_from = "RawSpectrum")]
pub struct Spectrum {
    signal: Vec<f64>,
    wavelengths: Option<Vec<f64>>,
    errors: Option<Vec<f64>>,
    metadata: SpectrumMetadata,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSpectrum {
    signal: Vec<f64>,
    #[serde(default)]
    wavelengths: Option<Vec<f64>>,
    #[serde(default)]
    errors: Option<Vec<f64>>,
    #[serde(default)]
    metadata: SpectrumMetadata,
}

impl TryFrom<RawSpectrum> for Spectrum {
    type Error = DoasError;

    fn try_from(raw: RawSpectrum) -> Result<Self, Self::Error> {
        let mut spectrum = Spectrum::new(raw.signal)?.with_metadata(raw.metadata);
        if let Some(wavelengths) = raw.wavelengths {
            spectrum = spectrum.with_wavelengths(wavelengths)?;
        }
        if let Some(errors) = raw.errors {
            spectrum = spectrum.with_errors(errors)?;
        }
        Ok(spectrum)
    }
}

impl Spectrum {
    pub fn new(signal: Vec<f64>) -> DoasResult<Self> {
        if signal.is_empty() {
            return Err(DoasError::input_validation(
                "SPECTRUM.SIGNAL",
                "spectrum signal must contain at least one pixel",
            ));
        }
        if let Some(index) = signal.iter().position(|value| !value.is_finite()) {
            return Err(DoasError::input_validation(
                "SPECTRUM.SIGNAL",
                format!("spectrum signal is not finite at pixel {index}"),
            ));
        }

        Ok(Self {
            signal,
            wavelengths: None,
            errors: None,
            metadata: SpectrumMetadata::default(),
        })
    }

    pub fn with_wavelengths(mut self, wavelengths: Vec<f64>) -> DoasResult<Self> {
        self.check_length("SPECTRUM.WAVELENGTHS", "wavelength", wavelengths.len())?;
        if let Some(index) = wavelengths.iter().position(|value| !value.is_finite()) {
            return Err(DoasError::input_validation(
                "SPECTRUM.WAVELENGTHS",
                format!("wavelength is not finite at pixel {index}"),
            ));
        }
        self.wavelengths = Some(wavelengths);
        Ok(self)
    }

    pub fn with_errors(mut self, errors: Vec<f64>) -> DoasResult<Self> {
        self.check_length("SPECTRUM.ERRORS", "error", errors.len())?;
        if let Some(index) = errors
            .iter()
            .position(|value| !value.is_finite() || *value <= 0.0)
        {
            return Err(DoasError::input_validation(
                "SPECTRUM.ERRORS",
                format!("pixel error must be finite and > 0 at pixel {index}"),
            ));
        }
        self.errors = Some(errors);
        Ok(self)
    }

    pub fn with_metadata(mut self, metadata: SpectrumMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn len(&self) -> usize {
        self.signal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    pub fn signal(&self) -> &[f64] {
        &self.signal
    }

    pub fn wavelengths(&self) -> Option<&[f64]> {
        self.wavelengths.as_deref()
    }

    pub fn errors(&self) -> Option<&[f64]> {
        self.errors.as_deref()
    }

    pub fn metadata(&self) -> &SpectrumMetadata {
        &self.metadata
    }

    fn check_length(&self, operation: &'static str, label: &str, actual: usize) -> DoasResult<()> {
        if actual != self.signal.len() {
            return Err(DoasError::input_validation(
                operation,
                format!(
                    "{label} array length {actual} does not match signal length {}",
                    self.signal.len()
                ),
            ));
        }
        Ok(())
    }
}
