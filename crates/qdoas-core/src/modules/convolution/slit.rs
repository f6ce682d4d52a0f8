use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;

/// Gaussian slits are truncated this many FWHM away from the centre.
const GAUSSIAN_SUPPORT_FWHM: f64 = 2.5;

/// Instrument line shape as a function of the wavelength offset in nm.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SlitFunction {
    Boxcar {
        width: f64,
    },
    Gaussian {
        fwhm: f64,
    },
    /// Tabulated line shape, linearly interpolated and zero outside the table.
    Measured {
        offsets: Vec<f64>,
        values: Vec<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SlitError {
    #[error("slit width must be finite and > 0, got {value}")]
    InvalidWidth { value: f64 },
    #[error("measured slit needs at least 2 samples with matching lengths (offsets={offsets}, values={values})")]
    InvalidTable { offsets: usize, values: usize },
    #[error("measured slit offsets must be strictly increasing at index {index}")]
    UnsortedOffsets { index: usize },
    #[error("measured slit values must be finite and >= 0 with a positive maximum")]
    InvalidValues,
}

impl SlitFunction {
    pub fn gaussian(fwhm: f64) -> Result<Self, SlitError> {
        let slit = Self::Gaussian { fwhm };
        slit.validate()?;
        Ok(slit)
    }

    pub fn validate(&self) -> Result<(), SlitError> {
        match self {
            Self::Boxcar { width: value } | Self::Gaussian { fwhm: value } => {
                if !value.is_finite() || *value <= 0.0 {
                    return Err(SlitError::InvalidWidth { value: *value });
                }
            }
            Self::Measured { offsets, values } => {
                if offsets.len() < 2 || offsets.len() != values.len() {
                    return Err(SlitError::InvalidTable {
                        offsets: offsets.len(),
                        values: values.len(),
                    });
                }
                if let Some(index) = crate::numerics::first_non_increasing(offsets) {
                    return Err(SlitError::UnsortedOffsets { index });
                }
                let valid = values.iter().all(|value| value.is_finite() && *value >= 0.0)
                    && values.iter().any(|value| *value > 0.0);
                if !valid {
                    return Err(SlitError::InvalidValues);
                }
            }
        }
        Ok(())
    }

    /// Unnormalized response at `offset` nm from the line centre.
    pub fn value(&self, offset: f64) -> f64 {
        match self {
            Self::Boxcar { width } => {
                if offset.abs() <= 0.5 * width {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Gaussian { fwhm } => (-4.0 * LN_2 * (offset / fwhm).powi(2)).exp(),
            Self::Measured { offsets, values } => {
                let last = offsets.len() - 1;
                if offset < offsets[0] || offset > offsets[last] {
                    return 0.0;
                }
                let upper = offsets.partition_point(|knot| *knot <= offset).clamp(1, last);
                let lower = upper - 1;
                let fraction = (offset - offsets[lower]) / (offsets[upper] - offsets[lower]);
                values[lower] + fraction * (values[upper] - values[lower])
            }
        }
    }

    /// Offsets `[lower, upper]` outside which the response is zero.
    pub fn support(&self) -> (f64, f64) {
        match self {
            Self::Boxcar { width } => (-0.5 * width, 0.5 * width),
            Self::Gaussian { fwhm } => (-GAUSSIAN_SUPPORT_FWHM * fwhm, GAUSSIAN_SUPPORT_FWHM * fwhm),
            Self::Measured { offsets, .. } => (offsets[0], offsets[offsets.len() - 1]),
        }
    }

    /// Full width at half maximum, in nm.
    pub fn fwhm(&self) -> f64 {
        match self {
            Self::Boxcar { width } => *width,
            Self::Gaussian { fwhm } => *fwhm,
            Self::Measured { offsets, values } => {
                let peak = values.iter().copied().fold(0.0, f64::max);
                let above: Vec<f64> = offsets
                    .iter()
                    .zip(values)
                    .filter(|(_, value)| **value >= 0.5 * peak)
                    .map(|(offset, _)| *offset)
                    .collect();
                match (above.first(), above.last()) {
                    (Some(first), Some(last)) => last - first,
                    _ => 0.0,
                }
            }
        }
    }

    /// The same line shape stretched by `factor` along the wavelength axis.
    pub fn scaled(&self, factor: f64) -> Self {
        match self {
            Self::Boxcar { width } => Self::Boxcar {
                width: width * factor,
            },
            Self::Gaussian { fwhm } => Self::Gaussian { fwhm: fwhm * factor },
            Self::Measured { offsets, values } => Self::Measured {
                offsets: offsets.iter().map(|offset| offset * factor).collect(),
                values: values.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SlitError, SlitFunction};

    #[test]
    fn gaussian_is_half_maximum_at_half_fwhm() {
        let slit = SlitFunction::gaussian(0.6).expect("positive width");
        assert!((slit.value(0.0) - 1.0).abs() < 1.0e-15);
        assert!((slit.value(0.3) - 0.5).abs() < 1.0e-12);
        assert!((slit.value(-0.3) - 0.5).abs() < 1.0e-12);
        assert_eq!(slit.support(), (-1.5, 1.5));
    }

    #[test]
    fn measured_slit_interpolates_and_reports_width() {
        let slit = SlitFunction::Measured {
            offsets: vec![-1.0, -0.5, 0.0, 0.5, 1.0],
            values: vec![0.0, 0.5, 1.0, 0.5, 0.0],
        };
        slit.validate().expect("valid table");
        assert!((slit.value(0.25) - 0.75).abs() < 1.0e-15);
        assert_eq!(slit.value(1.5), 0.0);
        assert!((slit.fwhm() - 1.0).abs() < 1.0e-15);
        assert!((slit.scaled(2.0).fwhm() - 2.0).abs() < 1.0e-15);
    }

    #[test]
    fn invalid_slits_are_rejected() {
        assert_eq!(
            SlitFunction::gaussian(0.0),
            Err(SlitError::InvalidWidth { value: 0.0 })
        );
        let unsorted = SlitFunction::Measured {
            offsets: vec![0.0, -1.0],
            values: vec![1.0, 1.0],
        };
        assert_eq!(unsorted.validate(), Err(SlitError::UnsortedOffsets { index: 1 }));
    }

    #[test]
    fn slit_deserializes_from_tagged_json() {
        let slit: SlitFunction =
            serde_json::from_str(r#"{"type": "boxcar", "width": 0.4}"#).expect("valid JSON");
        assert_eq!(slit, SlitFunction::Boxcar { width: 0.4 });
        assert_eq!(slit.value(0.2), 1.0);
        assert_eq!(slit.value(0.21), 0.0);
    }
}
