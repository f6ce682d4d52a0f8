//! Analysis-window and project configuration.
//!
//! Every structure is immutable once a window has been set up; defaults match
//! the usual DOAS settings so that minimal JSON files stay short.

use crate::domain::{DoasError, DoasResult};
use crate::modules::kurucz::KuruczSettings;
use crate::modules::reference::ReferencePolicy;
use crate::numerics::{FilterSettings, MinimizerSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct WavelengthInterval {
    pub start: f64,
    pub end: f64,
}

impl WavelengthInterval {
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, wavelength: f64) -> bool {
        wavelength >= self.start && wavelength <= self.end
    }

    pub fn centre(&self) -> f64 {
        0.5 * (self.start + self.end)
    }

    fn is_valid(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.start < self.end
    }
}

/// A non-linear parameter, either held at a value or fitted from a start value.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterSetting {
    Fixed(f64),
    Fitted { initial: f64 },
}

impl Default for ParameterSetting {
    fn default() -> Self {
        Self::Fixed(0.0)
    }
}

impl ParameterSetting {
    pub const fn is_fitted(self) -> bool {
        matches!(self, Self::Fitted { .. })
    }

    pub const fn initial_value(self) -> f64 {
        match self {
            Self::Fixed(value) => value,
            Self::Fitted { initial } => initial,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AmplitudeSetting {
    #[default]
    Fitted,
    /// Column held at this value and removed from the target before the fit.
    Fixed(f64),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Orthogonalization {
    #[default]
    None,
    Polynomial,
    Symbol(String),
}

/// Fit options of one cross-section in an analysis window.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossSectionTerm {
    pub symbol: String,
    #[serde(default)]
    pub amplitude: AmplitudeSetting,
    #[serde(default)]
    pub orthogonalization: Orthogonalization,
    #[serde(default)]
    pub shift: ParameterSetting,
    #[serde(default)]
    pub stretch: ParameterSetting,
}

impl CrossSectionTerm {
    pub fn fitted(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            amplitude: AmplitudeSetting::Fitted,
            orthogonalization: Orthogonalization::None,
            shift: ParameterSetting::default(),
            stretch: ParameterSetting::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FitMethod {
    /// Fit `ln(I0) - ln(I)` against the selected reference.
    #[default]
    OpticalDensity,
    /// Decompose the measured signal itself.
    Direct,
}

fn default_singular_value_threshold() -> f64 {
    1.0e-12
}

fn default_convergence_tolerance() -> f64 {
    1.0e-4
}

fn default_max_iterations() -> usize {
    20
}

fn default_polynomial_degree() -> usize {
    2
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverSettings {
    /// Singular values below this fraction of the largest one are discarded.
    #[serde(default = "default_singular_value_threshold")]
    pub singular_value_threshold: f64,
    #[serde(default = "default_convergence_tolerance")]
    pub convergence_tolerance: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            singular_value_threshold: default_singular_value_threshold(),
            convergence_tolerance: default_convergence_tolerance(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl SolverSettings {
    pub fn minimizer(&self) -> MinimizerSettings {
        MinimizerSettings {
            tolerance: self.convergence_tolerance,
            max_iterations: self.max_iterations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisWindowConfig {
    pub name: String,
    pub fit_windows: Vec<WavelengthInterval>,
    #[serde(default)]
    pub gaps: Vec<WavelengthInterval>,
    #[serde(default)]
    pub method: FitMethod,
    /// Highest power of the closure polynomial.
    #[serde(default = "default_polynomial_degree")]
    pub polynomial_degree: usize,
    /// Expansion point of the polynomial; the fit-window centre when absent.
    #[serde(default)]
    pub polynomial_origin: Option<f64>,
    /// Highest power of the linear offset, optical-density method only.
    #[serde(default)]
    pub offset_degree: Option<usize>,
    pub cross_sections: Vec<CrossSectionTerm>,
    #[serde(default)]
    pub spectrum_shift: ParameterSetting,
    #[serde(default)]
    pub spectrum_stretch: ParameterSetting,
    #[serde(default)]
    pub solver: SolverSettings,
    #[serde(default)]
    pub reference: ReferencePolicy,
    #[serde(default)]
    pub filter: Option<FilterSettings>,
    /// Weight pixels by `1/error^2` when records carry errors.
    #[serde(default)]
    pub use_weights: bool,
    #[serde(default)]
    pub kurucz: Option<KuruczSettings>,
}

impl AnalysisWindowConfig {
    pub fn new(
        name: impl Into<String>,
        fit_window: WavelengthInterval,
        cross_sections: Vec<CrossSectionTerm>,
    ) -> Self {
        Self {
            name: name.into(),
            fit_windows: vec![fit_window],
            gaps: Vec::new(),
            method: FitMethod::default(),
            polynomial_degree: default_polynomial_degree(),
            polynomial_origin: None,
            offset_degree: None,
            cross_sections,
            spectrum_shift: ParameterSetting::default(),
            spectrum_stretch: ParameterSetting::default(),
            solver: SolverSettings::default(),
            reference: ReferencePolicy::default(),
            filter: None,
            use_weights: false,
            kurucz: None,
        }
    }

    /// Wavelength span covered by the fit windows.
    pub fn span(&self) -> Option<WavelengthInterval> {
        let start = self
            .fit_windows
            .iter()
            .map(|window| window.start)
            .fold(f64::INFINITY, f64::min);
        let end = self
            .fit_windows
            .iter()
            .map(|window| window.end)
            .fold(f64::NEG_INFINITY, f64::max);
        (start < end).then_some(WavelengthInterval { start, end })
    }

    pub fn polynomial_origin(&self) -> f64 {
        self.polynomial_origin
            .or_else(|| self.span().map(|span| span.centre()))
            .unwrap_or(0.0)
    }

    pub fn validate(&self) -> DoasResult<()> {
        let invalid = |message: String| {
            Err(DoasError::input_validation("CONFIG.WINDOW", message).in_window(&self.name))
        };

        if self.name.trim().is_empty() {
            return Err(DoasError::input_validation(
                "CONFIG.WINDOW",
                "analysis window name must not be empty",
            ));
        }
        if self.fit_windows.is_empty() {
            return invalid("at least one fit window is required".to_string());
        }
        for interval in self.fit_windows.iter().chain(&self.gaps) {
            if !interval.is_valid() {
                return invalid(format!(
                    "wavelength interval [{}, {}] is not increasing",
                    interval.start, interval.end
                ));
            }
        }
        if self.offset_degree.is_some() && self.method == FitMethod::Direct {
            return invalid("offset terms require the optical-density method".to_string());
        }

        let solver = &self.solver;
        if !solver.singular_value_threshold.is_finite()
            || solver.singular_value_threshold < 0.0
            || solver.singular_value_threshold >= 1.0
        {
            return invalid(format!(
                "singular value threshold {} must be in [0, 1)",
                solver.singular_value_threshold
            ));
        }
        if !solver.convergence_tolerance.is_finite() || solver.convergence_tolerance <= 0.0 {
            return invalid(format!(
                "convergence tolerance {} must be positive",
                solver.convergence_tolerance
            ));
        }
        if solver.max_iterations == 0 {
            return invalid("max iterations must be >= 1".to_string());
        }

        let symbols: HashSet<&str> = self
            .cross_sections
            .iter()
            .map(|term| term.symbol.as_str())
            .collect();
        for term in &self.cross_sections {
            if let Orthogonalization::Symbol(target) = &term.orthogonalization {
                if target == &term.symbol {
                    return invalid(format!("'{}' cannot be orthogonalized to itself", target));
                }
                if !symbols.contains(target.as_str()) {
                    return invalid(format!(
                        "'{}' is orthogonalized to unknown symbol '{}'",
                        term.symbol, target
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CrossSectionSource {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default)]
    pub cross_sections: Vec<CrossSectionSource>,
    /// High-resolution solar spectrum used by Kurucz calibration.
    #[serde(default)]
    pub solar_reference: Option<PathBuf>,
    /// Reference spectrum of the `fixed` reference policy.
    #[serde(default)]
    pub reference_spectrum: Option<PathBuf>,
    pub windows: Vec<AnalysisWindowConfig>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl ProjectConfig {
    /// Resolve a path from the project file relative to that file's directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn validate(&self) -> DoasResult<()> {
        if self.windows.is_empty() {
            return Err(DoasError::input_validation(
                "CONFIG.PROJECT",
                "project defines no analysis window",
            ));
        }
        let mut names = HashSet::new();
        for window in &self.windows {
            if !names.insert(window.name.as_str()) {
                return Err(DoasError::input_validation(
                    "CONFIG.PROJECT",
                    format!("duplicate analysis window '{}'", window.name),
                ));
            }
            window.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read project configuration '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse project configuration '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<ConfigError> for DoasError {
    fn from(error: ConfigError) -> Self {
        match &error {
            ConfigError::Read { .. } => DoasError::io_system("CONFIG.READ", error.to_string()),
            ConfigError::Parse { .. } => {
                DoasError::input_validation("CONFIG.PARSE", error.to_string())
            }
        }
    }
}

pub fn load_project_config(path: impl AsRef<Path>) -> Result<ProjectConfig, ConfigError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: ProjectConfig =
        serde_json::from_str(&source).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(config)
}
