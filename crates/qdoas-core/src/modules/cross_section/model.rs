use crate::domain::{DoasError, DoasResult};
use crate::numerics::{CubicSpline, InterpolationMode, SplineError, spline_interpolate};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reference absorption spectrum on a strictly increasing wavelength grid,
/// with its spline second derivatives computed once.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossSection {
    name: String,
    spline: CubicSpline,
}

impl CrossSection {
    pub fn new(name: impl Into<String>, wavelengths: Vec<f64>, values: Vec<f64>) -> DoasResult<Self> {
        let name = name.into();
        let spline = CubicSpline::new(wavelengths, values).map_err(|error| {
            DoasError::input_validation(
                "INPUT.CROSS_SECTION",
                format!("cross-section '{}' is invalid: {}", name, error),
            )
        })?;
        Ok(Self { name, spline })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wavelengths(&self) -> &[f64] {
        self.spline.x()
    }

    pub fn values(&self) -> &[f64] {
        self.spline.y()
    }

    pub fn domain(&self) -> (f64, f64) {
        self.spline.domain()
    }

    pub fn spline(&self) -> &CubicSpline {
        &self.spline
    }

    pub fn evaluate(&self, wavelength: f64) -> Result<f64, SplineError> {
        self.spline.evaluate(wavelength)
    }

    /// Values at `grid`; every target must lie inside the tabulated domain.
    pub fn resample(&self, grid: &[f64], mode: InterpolationMode) -> Result<Vec<f64>, SplineError> {
        match mode {
            InterpolationMode::Cubic => grid.iter().map(|target| self.spline.evaluate(*target)).collect(),
            InterpolationMode::Linear => grid
                .iter()
                .map(|target| {
                    spline_interpolate(self.spline.x(), self.spline.y(), &[], *target, mode)
                })
                .collect(),
        }
    }
}

/// Named cross-sections shared read-only between analysis windows.
#[derive(Debug, Clone, Default)]
pub struct CrossSectionLibrary {
    entries: BTreeMap<String, Arc<CrossSection>>,
}

impl CrossSectionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry of the same name.
    pub fn insert(&mut self, cross_section: CrossSection) -> Arc<CrossSection> {
        let shared = Arc::new(cross_section);
        self.entries
            .insert(shared.name().to_string(), Arc::clone(&shared));
        shared
    }

    pub fn get(&self, name: &str) -> Option<Arc<CrossSection>> {
        self.entries.get(name).cloned()
    }

    pub fn require(&self, name: &str) -> DoasResult<Arc<CrossSection>> {
        self.get(name).ok_or_else(|| {
            DoasError::input_validation(
                "INPUT.CROSS_SECTION",
                format!("cross-section '{}' is not loaded", name),
            )
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
