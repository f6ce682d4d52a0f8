use crate::modules::reference::ReferenceSource;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ParameterKind {
    CrossSection,
    /// Held at its configured amplitude; reported with a zero sigma.
    FixedCrossSection,
    Polynomial { power: usize },
    Offset { power: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FittedParameter {
    pub name: String,
    pub kind: ParameterKind,
    pub value: f64,
    pub sigma: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NonLinearKind {
    Shift,
    Stretch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NonLinearParameter {
    /// Cross-section symbol, or `"spectrum"` for the measured spectrum.
    pub target: String,
    pub kind: NonLinearKind,
    pub value: f64,
    /// `None` when the parameter was held fixed or its variance is unknown.
    pub sigma: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankDeficiency {
    pub rank: usize,
    pub columns: usize,
    pub singular_values: Vec<f64>,
}

/// Outcome of one record in one analysis window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FitResult {
    pub window: String,
    pub record_index: usize,
    pub parameters: Vec<FittedParameter>,
    pub non_linear: Vec<NonLinearParameter>,
    /// Wavelengths of the fitted pixels.
    pub wavelengths: Vec<f64>,
    /// Target minus model at the fitted pixels.
    pub residual: Vec<f64>,
    pub rms: f64,
    pub chi_square: f64,
    pub degrees_of_freedom: usize,
    pub converged: bool,
    pub iterations: usize,
    pub rank_deficiency: Option<RankDeficiency>,
    pub reference: ReferenceSource,
}

impl FitResult {
    pub fn parameter(&self, name: &str) -> Option<&FittedParameter> {
        self.parameters.iter().find(|parameter| parameter.name == name)
    }

    /// Values of the linear parameters in column order.
    pub fn coefficients(&self) -> Vec<f64> {
        self.parameters.iter().map(|parameter| parameter.value).collect()
    }

    pub fn non_linear_value(&self, target: &str, kind: NonLinearKind) -> Option<f64> {
        self.non_linear
            .iter()
            .find(|parameter| parameter.target == target && parameter.kind == kind)
            .map(|parameter| parameter.value)
    }
}
