//! DOAS analysis: fit one record against the reference cross-sections of an
//! analysis window.
//!
//! The design matrix holds the fitted cross-sections first, then the closure
//! polynomial `(lambda - lambda0)^j`, then the optional offset terms
//! `-(lambda - lambda0)^j / I`. Non-linear shift and stretch parameters are
//! driven by [`minimize`]; every evaluation solves the linear part through
//! the SVD of the design matrix held in the window's [`FitWorkspace`].

mod columns;
mod model;

pub use model::{
    FitResult, FittedParameter, NonLinearKind, NonLinearParameter, ParameterKind, RankDeficiency,
};

use self::columns::{orthonormalize, polynomial_column, project_out, project_out_basis, set_column};
use crate::common::{
    AmplitudeSetting, AnalysisWindowConfig, FitMethod, Orthogonalization, ParameterSetting,
};
use crate::domain::{DoasError, DoasResult, Spectrum};
use crate::modules::cross_section::{CrossSection, CrossSectionLibrary};
use crate::modules::fit::{FitDimensions, FitWorkspace, SpectralRange};
use crate::modules::kurucz::KuruczCalibrator;
use crate::modules::reference::{ReferenceSource, SelectedReference};
use crate::numerics::{
    CubicSpline, Filter, FilterError, FilterMode, LeastSquaresSolution, NonLinearProblem, minimize,
    solve_least_squares,
};
use std::sync::Arc;
use tracing::{debug, warn};

const SPECTRUM_TARGET: &str = "spectrum";
const SHIFT_SCALE: f64 = 0.1;
const STRETCH_SCALE: f64 = 0.01;
const SAME_GRID_TOLERANCE: f64 = 1.0e-9;

#[derive(Debug, Clone)]
struct ResolvedTerm {
    symbol: String,
    cross_section: Arc<CrossSection>,
    amplitude: AmplitudeSetting,
    /// Design column; `None` for a fixed amplitude.
    column: Option<usize>,
    orthogonalization: TermOrthogonalization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TermOrthogonalization {
    None,
    Polynomial,
    /// Design column of the symbol this term is orthogonalized to.
    Column(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParameterOwner {
    Spectrum,
    Term(usize),
}

#[derive(Debug, Clone)]
struct NonLinearSlot {
    owner: ParameterOwner,
    kind: NonLinearKind,
    setting: ParameterSetting,
    /// Position in the minimizer's parameter vector when fitted.
    index: Option<usize>,
}

impl NonLinearSlot {
    fn value(&self, parameters: &[f64]) -> f64 {
        self.index
            .map_or(self.setting.initial_value(), |index| parameters[index])
    }
}

/// One configured analysis window with its reusable fit workspace.
#[derive(Debug)]
pub struct AnalysisWindow {
    config: AnalysisWindowConfig,
    terms: Vec<ResolvedTerm>,
    slots: Vec<NonLinearSlot>,
    filter: Option<Filter>,
    calibrator: Option<KuruczCalibrator>,
    workspace: FitWorkspace,
}

impl AnalysisWindow {
    /// Validate `config` and resolve its symbols in `library`.
    pub fn new(config: AnalysisWindowConfig, library: &CrossSectionLibrary) -> DoasResult<Self> {
        config.validate()?;
        let window = config.name.clone();

        let mut terms = Vec::with_capacity(config.cross_sections.len());
        let mut next_column = 0;
        for term in &config.cross_sections {
            let cross_section = library
                .require(&term.symbol)
                .map_err(|error| error.in_window(&window))?;
            let column = match term.amplitude {
                AmplitudeSetting::Fitted => {
                    next_column += 1;
                    Some(next_column - 1)
                }
                AmplitudeSetting::Fixed(_) => None,
            };
            terms.push(ResolvedTerm {
                symbol: term.symbol.clone(),
                cross_section,
                amplitude: term.amplitude,
                column,
                orthogonalization: TermOrthogonalization::None,
            });
        }

        for (index, term) in config.cross_sections.iter().enumerate() {
            let orthogonalization = match &term.orthogonalization {
                Orthogonalization::None => TermOrthogonalization::None,
                Orthogonalization::Polynomial => TermOrthogonalization::Polynomial,
                Orthogonalization::Symbol(target) => {
                    let column = terms
                        .iter()
                        .find(|candidate| &candidate.symbol == target)
                        .and_then(|candidate| candidate.column)
                        .ok_or_else(|| {
                            DoasError::input_validation(
                                "ANALYSE.ORTHOGONALIZATION",
                                format!("'{}' is orthogonalized to '{target}', which is not fitted", term.symbol),
                            )
                            .in_window(&window)
                        })?;
                    TermOrthogonalization::Column(column)
                }
            };
            if orthogonalization != TermOrthogonalization::None && terms[index].column.is_none() {
                return Err(DoasError::input_validation(
                    "ANALYSE.ORTHOGONALIZATION",
                    format!("fixed-amplitude '{}' cannot be orthogonalized", term.symbol),
                )
                .in_window(&window));
            }
            terms[index].orthogonalization = orthogonalization;
        }

        let mut slots = vec![
            NonLinearSlot {
                owner: ParameterOwner::Spectrum,
                kind: NonLinearKind::Shift,
                setting: config.spectrum_shift,
                index: None,
            },
            NonLinearSlot {
                owner: ParameterOwner::Spectrum,
                kind: NonLinearKind::Stretch,
                setting: config.spectrum_stretch,
                index: None,
            },
        ];
        for (index, term) in config.cross_sections.iter().enumerate() {
            for (kind, setting) in [
                (NonLinearKind::Shift, term.shift),
                (NonLinearKind::Stretch, term.stretch),
            ] {
                slots.push(NonLinearSlot {
                    owner: ParameterOwner::Term(index),
                    kind,
                    setting,
                    index: None,
                });
            }
        }
        let mut fitted = 0;
        for slot in &mut slots {
            if slot.setting.is_fitted() {
                slot.index = Some(fitted);
                fitted += 1;
            }
        }

        let filter = config
            .filter
            .map(Filter::new)
            .transpose()
            .map_err(|error| {
                DoasError::input_validation("ANALYSE.FILTER", error.to_string()).in_window(&window)
            })?;

        Ok(Self {
            config,
            terms,
            slots,
            filter,
            calibrator: None,
            workspace: FitWorkspace::new(),
        })
    }

    /// Calibrate every record with `calibrator` before it is analysed.
    pub fn with_calibrator(mut self, calibrator: KuruczCalibrator) -> Self {
        self.calibrator = Some(calibrator);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AnalysisWindowConfig {
        &self.config
    }

    pub fn workspace(&self) -> &FitWorkspace {
        &self.workspace
    }

    pub fn calibrator(&self) -> Option<&KuruczCalibrator> {
        self.calibrator.as_ref()
    }

    pub fn needs_reference(&self) -> bool {
        self.config.method == FitMethod::OpticalDensity
    }

    /// Number of fitted non-linear parameters.
    pub fn non_linear_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.index.is_some()).count()
    }

    /// Analyse `record`; `reference` is required by the optical-density method.
    pub fn fit(
        &mut self,
        record_index: usize,
        record: &Spectrum,
        reference: Option<&SelectedReference>,
    ) -> DoasResult<FitResult> {
        let window = self.config.name.clone();
        self.run(record_index, record, reference)
            .map_err(|error| error.in_window(&window))
    }

    fn run(
        &mut self,
        record_index: usize,
        record: &Spectrum,
        reference: Option<&SelectedReference>,
    ) -> DoasResult<FitResult> {
        let Self {
            ref config,
            ref terms,
            ref slots,
            ref filter,
            ref mut calibrator,
            ref mut workspace,
        } = *self;

        let calibrated;
        let record = match calibrator.as_mut() {
            Some(calibrator) => {
                let calibration = calibrator.calibrate(record)?;
                calibrated = calibration.apply(record)?;
                &calibrated
            }
            None => record,
        };

        let data = RecordData::prepare(config, slots, filter.as_ref(), record, reference)?;
        let fitted_terms = terms.iter().filter(|term| term.column.is_some()).count();
        let polynomial = config.polynomial_degree + 1;
        let offsets = config.offset_degree.map_or(0, |degree| degree + 1);
        let dimensions = FitDimensions {
            columns: fitted_terms + polynomial + offsets,
            points: data.pixels.len(),
            polynomial,
        };
        let non_linear = slots.iter().filter(|slot| slot.index.is_some()).count();
        let parameters = dimensions.columns + non_linear;
        if dimensions.points <= parameters {
            return Err(DoasError::input_validation(
                "ANALYSE.DIMENSIONS",
                format!(
                    "{} pixels cannot constrain {parameters} parameters",
                    dimensions.points
                ),
            ));
        }

        workspace.prepare(dimensions, data.range.clone())?;
        workspace.begin()?;

        let settings = config.solver.minimizer();
        let mut problem = WindowProblem {
            config,
            terms: terms.as_slice(),
            slots: slots.as_slice(),
            filter: filter.as_ref(),
            workspace: &mut *workspace,
            data: &data,
            dimensions,
            last: None,
        };
        let initial: Vec<f64> = problem
            .slots
            .iter()
            .filter(|slot| slot.index.is_some())
            .map(|slot| slot.setting.initial_value())
            .collect();
        let outcome = minimize(&mut problem, &initial, settings)?;
        if non_linear > 0 {
            problem.residuals(&outcome.parameters)?;
        }
        let evaluation = problem.last.take().ok_or_else(|| {
            DoasError::internal("ANALYSE.SOLVE", "no linear solution was evaluated")
        })?;

        let degrees_of_freedom = dimensions.points - parameters;
        let solution = &evaluation.solution;
        let variance_scale = solution.chi_square / degrees_of_freedom as f64;
        let sigmas: Vec<f64> = workspace
            .store_covariance(&solution.covariance, variance_scale)?
            .iter()
            .map(|variance| variance.max(0.0).sqrt())
            .collect();

        let residual: Vec<f64> = match &data.weights {
            Some(weights) => solution
                .residual
                .iter()
                .zip(weights)
                .map(|(value, weight)| value / weight)
                .collect(),
            None => solution.residual.clone(),
        };
        let rms = (residual.iter().map(|value| value * value).sum::<f64>()
            / residual.len() as f64)
            .sqrt();

        let mut fitted_parameters = Vec::with_capacity(dimensions.columns + terms.len());
        for term in terms.iter() {
            if let Some(column) = term.column {
                fitted_parameters.push(FittedParameter {
                    name: term.symbol.clone(),
                    kind: ParameterKind::CrossSection,
                    value: solution.coefficients[column],
                    sigma: sigmas[column],
                });
            }
        }
        for power in 0..polynomial {
            let column = fitted_terms + power;
            fitted_parameters.push(FittedParameter {
                name: format!("poly{power}"),
                kind: ParameterKind::Polynomial { power },
                value: solution.coefficients[column],
                sigma: sigmas[column],
            });
        }
        for power in 0..offsets {
            let column = fitted_terms + polynomial + power;
            fitted_parameters.push(FittedParameter {
                name: format!("offset{power}"),
                kind: ParameterKind::Offset { power },
                value: solution.coefficients[column],
                sigma: sigmas[column],
            });
        }
        for term in terms.iter() {
            if let AmplitudeSetting::Fixed(value) = term.amplitude {
                fitted_parameters.push(FittedParameter {
                    name: term.symbol.clone(),
                    kind: ParameterKind::FixedCrossSection,
                    value,
                    sigma: 0.0,
                });
            }
        }

        let non_linear_parameters = slots
            .iter()
            .filter(|slot| slot.index.is_some() || slot.setting.initial_value() != 0.0)
            .map(|slot| NonLinearParameter {
                target: match slot.owner {
                    ParameterOwner::Spectrum => SPECTRUM_TARGET.to_string(),
                    ParameterOwner::Term(index) => terms[index].symbol.clone(),
                },
                kind: slot.kind,
                value: slot.value(&outcome.parameters),
                sigma: slot.index.and_then(|index| {
                    outcome
                        .unscaled_variances
                        .as_ref()
                        .map(|variances| (variances[index] * variance_scale).max(0.0).sqrt())
                }),
            })
            .collect();

        let rank_deficiency = solution.is_rank_deficient().then(|| RankDeficiency {
            rank: solution.rank(),
            columns: dimensions.columns,
            singular_values: solution.singular_values.clone(),
        });
        if let Some(deficiency) = &rank_deficiency {
            warn!(
                window = %config.name,
                record = record_index,
                rank = deficiency.rank,
                columns = deficiency.columns,
                "rank-deficient design matrix"
            );
        }
        if !outcome.converged {
            warn!(
                window = %config.name,
                record = record_index,
                iterations = outcome.iterations,
                "analysis did not converge"
            );
        }
        debug!(
            window = %config.name,
            record = record_index,
            rms,
            chi_square = solution.chi_square,
            iterations = outcome.iterations,
            "record analysed"
        );

        workspace.finish();
        Ok(FitResult {
            window: config.name.clone(),
            record_index,
            parameters: fitted_parameters,
            non_linear: non_linear_parameters,
            wavelengths: data.wavelengths.clone(),
            residual,
            rms,
            chi_square: solution.chi_square,
            degrees_of_freedom,
            converged: outcome.converged,
            iterations: outcome.iterations,
            rank_deficiency,
            reference: reference.map_or(ReferenceSource::None, |selected| selected.source.clone()),
        })
    }
}

/// Everything about one record that does not depend on the non-linear
/// parameters.
struct RecordData {
    range: SpectralRange,
    pixels: Vec<usize>,
    wavelengths: Vec<f64>,
    /// `lambda - lambda0` at the selected pixels.
    offsets: Vec<f64>,
    /// Measured signal at the selected pixels.
    signal: Vec<f64>,
    /// Interpolant of the full measured signal, present when the spectrum
    /// itself is shifted or stretched.
    signal_spline: Option<CubicSpline>,
    log_reference: Option<Vec<f64>>,
    /// Polynomial then offset columns.
    static_columns: Vec<Vec<f64>>,
    weights: Option<Vec<f64>>,
}

impl RecordData {
    fn prepare(
        config: &AnalysisWindowConfig,
        slots: &[NonLinearSlot],
        filter: Option<&Filter>,
        record: &Spectrum,
        reference: Option<&SelectedReference>,
    ) -> DoasResult<Self> {
        let grid = record.wavelengths().ok_or_else(|| {
            DoasError::input_validation("ANALYSE.GRID", "record has no wavelength grid")
        })?;
        let range = SpectralRange::from_wavelength_windows(grid, &config.fit_windows, &config.gaps)
            .map_err(|error| DoasError::input_validation("ANALYSE.RANGE", error.to_string()))?;
        let pixels: Vec<usize> = range.pixels().collect();
        let wavelengths = range.restrict(grid);
        let origin = config.polynomial_origin();
        let offsets: Vec<f64> = wavelengths.iter().map(|wavelength| wavelength - origin).collect();

        let dividing = filter.filter(|filter| filter.settings().mode == FilterMode::HighPassDivide);
        let divide = |values: &[f64]| -> DoasResult<Vec<f64>> {
            match dividing {
                Some(filter) => filter
                    .apply(values)
                    .map_err(|error| DoasError::numerical("ANALYSE.FILTER", error.to_string())),
                None => Ok(values.to_vec()),
            }
        };

        let full_signal = divide(record.signal())?;
        let signal = range.restrict(&full_signal);
        let spectrum_moves = slots.iter().any(|slot| {
            slot.owner == ParameterOwner::Spectrum
                && (slot.index.is_some() || slot.setting.initial_value() != 0.0)
        });
        let signal_spline = if spectrum_moves {
            Some(CubicSpline::new(grid.to_vec(), full_signal).map_err(|error| {
                DoasError::input_validation("ANALYSE.SPECTRUM", error.to_string())
            })?)
        } else {
            None
        };

        let log_reference = match config.method {
            FitMethod::Direct => None,
            FitMethod::OpticalDensity => {
                let reference = reference.ok_or_else(|| {
                    DoasError::input_validation(
                        "ANALYSE.REFERENCE",
                        "optical-density fit requires a reference spectrum",
                    )
                })?;
                let values = divide(&reference_on_grid(&reference.spectrum, grid)?)?;
                let mut logs = Vec::with_capacity(pixels.len());
                for &pixel in &pixels {
                    let value = values[pixel];
                    if value <= 0.0 {
                        return Err(DoasError::numerical(
                            "ANALYSE.OPTICAL_DENSITY",
                            format!("reference is not positive at pixel {pixel}"),
                        ));
                    }
                    logs.push(value.ln());
                }
                Some(logs)
            }
        };

        let mut static_columns: Vec<Vec<f64>> = (0..=config.polynomial_degree)
            .map(|power| polynomial_column(&offsets, power))
            .collect();
        if let Some(degree) = config.offset_degree {
            let measured = range.restrict(record.signal());
            if let Some(position) = measured.iter().position(|value| *value <= 0.0) {
                return Err(DoasError::numerical(
                    "ANALYSE.OFFSET",
                    format!("offset terms need a positive signal, pixel {} is not", pixels[position]),
                ));
            }
            for power in 0..=degree {
                static_columns.push(
                    polynomial_column(&offsets, power)
                        .iter()
                        .zip(&measured)
                        .map(|(value, intensity)| -value / intensity)
                        .collect(),
                );
            }
        }

        let weights = match (config.use_weights, record.errors()) {
            (true, Some(errors)) => {
                let measured = range.restrict(record.signal());
                let mut weights = Vec::with_capacity(pixels.len());
                for (position, &pixel) in pixels.iter().enumerate() {
                    let sigma = match config.method {
                        FitMethod::OpticalDensity => errors[pixel] / measured[position].abs(),
                        FitMethod::Direct => errors[pixel],
                    };
                    if !sigma.is_finite() || sigma <= 0.0 {
                        return Err(DoasError::input_validation(
                            "ANALYSE.WEIGHTS",
                            format!("pixel {pixel} has no usable error estimate"),
                        ));
                    }
                    weights.push(1.0 / sigma);
                }
                Some(weights)
            }
            (true, None) => {
                debug!(window = %config.name, "record carries no errors, fitting unweighted");
                None
            }
            (false, _) => None,
        };

        Ok(Self {
            range,
            pixels,
            wavelengths,
            offsets,
            signal,
            signal_spline,
            log_reference,
            static_columns,
            weights,
        })
    }
}

/// `reference` sampled on `grid`: used as is when it shares the grid,
/// interpolated otherwise.
fn reference_on_grid(reference: &Spectrum, grid: &[f64]) -> DoasResult<Vec<f64>> {
    let same_grid = reference.len() == grid.len()
        && reference.wavelengths().is_none_or(|wavelengths| {
            wavelengths
                .iter()
                .zip(grid)
                .all(|(a, b)| (a - b).abs() <= SAME_GRID_TOLERANCE)
        });
    if same_grid {
        return Ok(reference.signal().to_vec());
    }
    let wavelengths = reference.wavelengths().ok_or_else(|| {
        DoasError::input_validation(
            "ANALYSE.REFERENCE",
            format!(
                "reference has {} pixels and no grid, record has {}",
                reference.len(),
                grid.len()
            ),
        )
    })?;
    let spline = CubicSpline::new(wavelengths.to_vec(), reference.signal().to_vec())
        .map_err(|error| DoasError::input_validation("ANALYSE.REFERENCE", error.to_string()))?;
    grid.iter()
        .map(|wavelength| {
            spline
                .evaluate(*wavelength)
                .map_err(|error| DoasError::input_validation("ANALYSE.REFERENCE", error.to_string()))
        })
        .collect()
}

struct Evaluation {
    solution: LeastSquaresSolution,
}

struct WindowProblem<'a> {
    config: &'a AnalysisWindowConfig,
    terms: &'a [ResolvedTerm],
    slots: &'a [NonLinearSlot],
    filter: Option<&'a Filter>,
    workspace: &'a mut FitWorkspace,
    data: &'a RecordData,
    dimensions: FitDimensions,
    last: Option<Evaluation>,
}

impl WindowProblem<'_> {
    fn slot_value(&self, owner: ParameterOwner, kind: NonLinearKind, parameters: &[f64]) -> f64 {
        self.slots
            .iter()
            .find(|slot| slot.owner == owner && slot.kind == kind)
            .map_or(0.0, |slot| slot.value(parameters))
    }

    fn measured(&self, parameters: &[f64]) -> DoasResult<Vec<f64>> {
        let Some(spline) = &self.data.signal_spline else {
            return Ok(self.data.signal.clone());
        };
        let shift = self.slot_value(ParameterOwner::Spectrum, NonLinearKind::Shift, parameters);
        let stretch = self.slot_value(ParameterOwner::Spectrum, NonLinearKind::Stretch, parameters);
        self.data
            .wavelengths
            .iter()
            .zip(&self.data.offsets)
            .map(|(wavelength, offset)| {
                spline
                    .evaluate(wavelength + shift + stretch * offset)
                    .map_err(|error| DoasError::numerical("ANALYSE.SPECTRUM_SHIFT", error.to_string()))
            })
            .collect()
    }

    fn cross_section_column(&self, index: usize, parameters: &[f64]) -> DoasResult<Vec<f64>> {
        let term = &self.terms[index];
        let shift = self.slot_value(ParameterOwner::Term(index), NonLinearKind::Shift, parameters);
        let stretch =
            self.slot_value(ParameterOwner::Term(index), NonLinearKind::Stretch, parameters);
        self.data
            .wavelengths
            .iter()
            .zip(&self.data.offsets)
            .map(|(wavelength, offset)| {
                term.cross_section
                    .evaluate(wavelength + shift + stretch * offset)
                    .map_err(|error| {
                        DoasError::input_validation(
                            "ANALYSE.CROSS_SECTION",
                            format!("'{}': {error}", term.symbol),
                        )
                    })
            })
            .collect()
    }

    /// `apply` run on each contiguous run of selected pixels, so no kernel
    /// spans a gap.
    fn per_segment(
        &self,
        values: &[f64],
        apply: impl Fn(&[f64]) -> Result<Vec<f64>, FilterError>,
    ) -> DoasResult<Vec<f64>> {
        let mut filtered = Vec::with_capacity(values.len());
        for segment in self.data.range.segments(values) {
            filtered.extend(
                apply(segment)
                    .map_err(|error| DoasError::numerical("ANALYSE.FILTER", error.to_string()))?,
            );
        }
        Ok(filtered)
    }

    fn filtered(&self, values: Vec<f64>) -> DoasResult<Vec<f64>> {
        match self.filter {
            Some(filter) if filter.settings().mode.is_linear() => {
                self.per_segment(&values, |segment| filter.apply(segment))
            }
            _ => Ok(values),
        }
    }

    /// Cross-section column matching the target: after a dividing filter
    /// the optical density has lost its low-pass part, so the column does too.
    fn filtered_cross_section(&self, values: Vec<f64>) -> DoasResult<Vec<f64>> {
        match self.filter {
            Some(filter)
                if filter.settings().mode == FilterMode::HighPassDivide
                    && self.data.log_reference.is_some() =>
            {
                self.per_segment(&values, |segment| {
                    let smooth = filter.low_pass(segment)?;
                    Ok(segment.iter().zip(&smooth).map(|(value, low)| value - low).collect())
                })
            }
            _ => self.filtered(values),
        }
    }
}

impl NonLinearProblem for WindowProblem<'_> {
    type Error = DoasError;

    fn parameter_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.index.is_some()).count()
    }

    fn residuals(&mut self, parameters: &[f64]) -> DoasResult<Vec<f64>> {
        let measured = self.measured(parameters)?;
        let mut target = match &self.data.log_reference {
            Some(log_reference) => {
                let mut density = Vec::with_capacity(measured.len());
                for (position, (log_i0, intensity)) in log_reference.iter().zip(&measured).enumerate() {
                    if *intensity <= 0.0 {
                        return Err(DoasError::numerical(
                            "ANALYSE.OPTICAL_DENSITY",
                            format!("signal is not positive at pixel {}", self.data.pixels[position]),
                        ));
                    }
                    density.push(log_i0 - intensity.ln());
                }
                density
            }
            None => measured,
        };

        let mut columns = vec![Vec::new(); self.dimensions.columns];
        for (index, term) in self.terms.iter().enumerate() {
            let values = self.cross_section_column(index, parameters)?;
            match (term.column, term.amplitude) {
                (Some(column), _) => columns[column] = values,
                (None, AmplitudeSetting::Fixed(amplitude)) => {
                    for (value, absorption) in target.iter_mut().zip(&values) {
                        *value -= amplitude * absorption;
                    }
                }
                (None, AmplitudeSetting::Fitted) => {}
            }
        }
        let fitted_terms = self.dimensions.columns - self.data.static_columns.len();
        for (offset, values) in self.data.static_columns.iter().enumerate() {
            columns[fitted_terms + offset] = values.clone();
        }

        target = self.filtered(target)?;
        for (index, column) in columns.iter_mut().enumerate() {
            let values = std::mem::take(column);
            *column = if index < fitted_terms {
                self.filtered_cross_section(values)?
            } else {
                self.filtered(values)?
            };
        }
        if let Some(weights) = &self.data.weights {
            for values in std::iter::once(&mut target).chain(columns.iter_mut()) {
                for (value, weight) in values.iter_mut().zip(weights) {
                    *value *= weight;
                }
            }
        }

        if self
            .terms
            .iter()
            .any(|term| term.orthogonalization == TermOrthogonalization::Polynomial)
        {
            let basis = self.workspace.polynomial_basis_mut()?;
            for power in 0..self.dimensions.polynomial {
                set_column(basis, power, &columns[fitted_terms + power]);
            }
            orthonormalize(basis);
            for term in self.terms {
                if let (Some(column), TermOrthogonalization::Polynomial) =
                    (term.column, term.orthogonalization)
                {
                    project_out_basis(&mut columns[column], basis);
                }
            }
        }
        for term in self.terms {
            if let (Some(column), TermOrthogonalization::Column(reference)) =
                (term.column, term.orthogonalization)
            {
                let reference = columns[reference].clone();
                project_out(&mut columns[column], &reference);
            }
        }

        let design = self.workspace.design_mut()?;
        for (index, values) in columns.iter().enumerate() {
            set_column(design, index, values);
        }
        let solution = solve_least_squares(
            design,
            &target,
            self.config.solver.singular_value_threshold,
        )
        .map_err(|error| DoasError::numerical("ANALYSE.SVD", error.to_string()))?;
        let residual = solution.residual.clone();
        self.last = Some(Evaluation { solution });
        Ok(residual)
    }

    fn parameter_scale(&self, index: usize) -> f64 {
        let kind = self
            .slots
            .iter()
            .find(|slot| slot.index == Some(index))
            .map(|slot| slot.kind);
        match kind {
            Some(NonLinearKind::Stretch) => STRETCH_SCALE,
            _ => SHIFT_SCALE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AnalysisWindow, NonLinearKind, ParameterKind};
    use crate::common::{
        AmplitudeSetting, AnalysisWindowConfig, CrossSectionTerm, FitMethod, Orthogonalization,
        ParameterSetting, WavelengthInterval,
    };
    use crate::domain::{DoasErrorCategory, Spectrum};
    use crate::modules::cross_section::{CrossSection, CrossSectionLibrary};
    use crate::modules::fit::WorkspaceState;
    use crate::modules::reference::{ReferenceSource, SelectedReference};
    use crate::numerics::{EdgePolicy, FilterKind, FilterMode, FilterSettings};
    use std::sync::Arc;

    fn grid() -> Vec<f64> {
        (0..501).map(|index| 300.0 + 0.2 * index as f64).collect()
    }

    fn band(wavelength: f64) -> f64 {
        (-((wavelength - 330.0) / 5.0).powi(2)).exp()
    }

    fn wiggle(wavelength: f64) -> f64 {
        0.5 + 0.5 * (wavelength / 3.0).sin()
    }

    fn library() -> CrossSectionLibrary {
        let grid = grid();
        let mut library = CrossSectionLibrary::new();
        for (name, shape) in [("xs1", band as fn(f64) -> f64), ("xs2", wiggle), ("xs1copy", band)] {
            let values = grid.iter().map(|wavelength| shape(*wavelength)).collect();
            library.insert(CrossSection::new(name, grid.clone(), values).expect("valid cross-section"));
        }
        library
    }

    fn direct_record() -> Spectrum {
        let grid = grid();
        let signal = grid
            .iter()
            .map(|wavelength| {
                let x = wavelength - 350.0;
                2.0 * band(*wavelength) + 0.5 * wiggle(*wavelength) + 100.0 - 0.01 * x + 0.0001 * x * x
            })
            .collect();
        Spectrum::new(signal)
            .expect("valid signal")
            .with_wavelengths(grid)
            .expect("matching grid")
    }

    fn direct_config(terms: Vec<CrossSectionTerm>) -> AnalysisWindowConfig {
        let mut config =
            AnalysisWindowConfig::new("direct", WavelengthInterval::new(300.0, 400.0), terms);
        config.method = FitMethod::Direct;
        config
    }

    #[test]
    fn linear_fit_converges_in_one_iteration() {
        let config = direct_config(vec![CrossSectionTerm::fitted("xs1"), CrossSectionTerm::fitted("xs2")]);
        let mut window = AnalysisWindow::new(config, &library()).expect("window should build");
        let result = window.fit(0, &direct_record(), None).expect("fit should succeed");

        assert!(result.converged);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.reference, ReferenceSource::None);
        assert!(result.rank_deficiency.is_none());
        let value = |name: &str| result.parameter(name).expect("parameter reported").value;
        assert!((value("xs1") - 2.0).abs() < 1.0e-8);
        assert!((value("xs2") - 0.5).abs() < 1.0e-8);
        assert!((value("poly0") - 100.0).abs() < 1.0e-7);
        assert!((value("poly1") + 0.01).abs() < 1.0e-9);
        assert!((value("poly2") - 0.0001).abs() < 1.0e-10);
        assert!(result.rms < 1.0e-9);
        assert_eq!(result.degrees_of_freedom, 501 - 5);
        assert_eq!(window.workspace().state(), WorkspaceState::Ready);
    }

    #[test]
    fn duplicate_columns_are_flagged_not_fatal() {
        let config = direct_config(vec![
            CrossSectionTerm::fitted("xs1"),
            CrossSectionTerm::fitted("xs1copy"),
            CrossSectionTerm::fitted("xs2"),
        ]);
        let mut window = AnalysisWindow::new(config, &library()).expect("window should build");
        let result = window.fit(3, &direct_record(), None).expect("fit should succeed");

        let deficiency = result.rank_deficiency.as_ref().expect("rank deficiency reported");
        assert_eq!(deficiency.columns, 6);
        assert_eq!(deficiency.rank, 5);
        let value = |name: &str| result.parameter(name).expect("parameter reported").value;
        assert!((value("xs1") + value("xs1copy") - 2.0).abs() < 1.0e-6);
        assert!((value("xs2") - 0.5).abs() < 1.0e-6);
        assert!(result.rms < 1.0e-6);
    }

    #[test]
    fn fixed_amplitude_and_orthogonalization_keep_the_model() {
        let mut fixed = CrossSectionTerm::fitted("xs2");
        fixed.amplitude = AmplitudeSetting::Fixed(0.5);
        let config = direct_config(vec![CrossSectionTerm::fitted("xs1"), fixed]);
        let mut window = AnalysisWindow::new(config, &library()).expect("window should build");
        let result = window.fit(0, &direct_record(), None).expect("fit should succeed");
        let xs2 = result.parameter("xs2").expect("fixed parameter reported");
        assert_eq!(xs2.kind, ParameterKind::FixedCrossSection);
        assert_eq!((xs2.value, xs2.sigma), (0.5, 0.0));
        assert!((result.parameter("xs1").expect("fitted").value - 2.0).abs() < 1.0e-8);

        let mut orthogonal = CrossSectionTerm::fitted("xs2");
        orthogonal.orthogonalization = Orthogonalization::Polynomial;
        let config = direct_config(vec![CrossSectionTerm::fitted("xs1"), orthogonal]);
        let mut window = AnalysisWindow::new(config, &library()).expect("window should build");
        let result = window.fit(0, &direct_record(), None).expect("fit should succeed");
        assert!((result.parameter("xs2").expect("fitted").value - 0.5).abs() < 1.0e-8);
        assert!((result.parameter("xs1").expect("fitted").value - 2.0).abs() < 1.0e-8);
        assert!(result.rms < 1.0e-9);
    }

    fn bands(wavelength: f64) -> f64 {
        [312.0, 318.5, 326.0, 333.5, 341.0, 347.5]
            .iter()
            .map(|centre| (-((wavelength - centre) / 1.2).powi(2)).exp())
            .sum()
    }

    #[test]
    fn optical_density_fit_recovers_a_cross_section_shift() {
        let fine: Vec<f64> = (0..12001).map(|index| 290.0 + 0.01 * index as f64).collect();
        let values = fine.iter().map(|wavelength| bands(*wavelength)).collect();
        let mut library = CrossSectionLibrary::new();
        library.insert(CrossSection::new("bands", fine, values).expect("valid cross-section"));

        let grid: Vec<f64> = (0..301).map(|index| 305.0 + 0.2 * index as f64).collect();
        let i0: Vec<f64> = grid.iter().map(|wavelength| 1.0e4 * (1.0 + 0.002 * (wavelength - 305.0))).collect();
        let signal: Vec<f64> = grid
            .iter()
            .zip(&i0)
            .map(|(wavelength, i0)| {
                let x = wavelength - 335.0;
                let density = 0.05 * bands(wavelength + 0.05) + 0.1 + 0.001 * x;
                i0 * (-density).exp()
            })
            .collect();
        let record = Spectrum::new(signal)
            .expect("valid signal")
            .with_wavelengths(grid.clone())
            .expect("matching grid");
        let reference = SelectedReference {
            spectrum: Arc::new(
                Spectrum::new(i0)
                    .expect("valid reference")
                    .with_wavelengths(grid)
                    .expect("matching grid"),
            ),
            source: ReferenceSource::Fixed,
        };

        let mut term = CrossSectionTerm::fitted("bands");
        term.shift = ParameterSetting::Fitted { initial: 0.0 };
        let mut config =
            AnalysisWindowConfig::new("od", WavelengthInterval::new(305.0, 365.0), vec![term]);
        config.polynomial_degree = 1;
        config.solver.convergence_tolerance = 1.0e-6;
        config.solver.max_iterations = 50;
        let mut window = AnalysisWindow::new(config, &library).expect("window should build");
        assert_eq!(window.non_linear_count(), 1);

        let result = window.fit(0, &record, Some(&reference)).expect("fit should succeed");
        assert!(result.converged);
        assert_eq!(result.reference, ReferenceSource::Fixed);
        let shift = result
            .non_linear_value("bands", NonLinearKind::Shift)
            .expect("shift reported");
        assert!((shift - 0.05).abs() < 1.0e-3, "shift = {shift}");
        let amplitude = result.parameter("bands").expect("fitted").value;
        assert!((amplitude - 0.05).abs() < 1.0e-4, "amplitude = {amplitude}");
        assert!(result.non_linear[0].sigma.is_some());
    }

    #[test]
    fn missing_reference_is_an_input_error() {
        let config = AnalysisWindowConfig::new(
            "od",
            WavelengthInterval::new(300.0, 400.0),
            vec![CrossSectionTerm::fitted("xs1")],
        );
        let mut window = AnalysisWindow::new(config, &library()).expect("window should build");
        let error = window
            .fit(0, &direct_record(), None)
            .expect_err("reference is required");
        assert_eq!(error.category(), DoasErrorCategory::InputValidation);
        assert_eq!(error.window(), Some("od"));
    }

    #[test]
    fn unknown_symbols_and_tiny_ranges_are_rejected() {
        let config = direct_config(vec![CrossSectionTerm::fitted("BrO")]);
        let error = AnalysisWindow::new(config, &library()).expect_err("unknown symbol");
        assert_eq!(error.window(), Some("direct"));

        let mut config = direct_config(vec![CrossSectionTerm::fitted("xs1")]);
        config.fit_windows = vec![WavelengthInterval::new(330.0, 330.5)];
        let mut window = AnalysisWindow::new(config, &library()).expect("window should build");
        let error = window
            .fit(0, &direct_record(), None)
            .expect_err("three pixels cannot fit four parameters");
        assert_eq!(error.category(), DoasErrorCategory::InputValidation);
    }

    #[test]
    fn uniform_errors_leave_the_weighted_fit_unchanged() {
        let record = direct_record();
        let noisy: Vec<f64> = record
            .signal()
            .iter()
            .enumerate()
            .map(|(index, value)| value + 0.01 * (index as f64 * 1.7).sin())
            .collect();
        let plain = Spectrum::new(noisy)
            .expect("valid signal")
            .with_wavelengths(grid())
            .expect("matching grid");
        let weighted = plain.clone().with_errors(vec![0.2; 501]).expect("valid errors");

        let terms = vec![CrossSectionTerm::fitted("xs1"), CrossSectionTerm::fitted("xs2")];
        let mut window = AnalysisWindow::new(direct_config(terms.clone()), &library())
            .expect("window should build");
        let unweighted = window.fit(0, &plain, None).expect("fit should succeed");
        let mut config = direct_config(terms);
        config.use_weights = true;
        let mut window = AnalysisWindow::new(config, &library()).expect("window should build");
        let result = window.fit(0, &weighted, None).expect("fit should succeed");

        assert!(unweighted.rms > 1.0e-4);
        for expected in &unweighted.parameters {
            let value = result.parameter(&expected.name).expect("parameter reported").value;
            assert!(
                (value - expected.value).abs() <= 1.0e-9 * expected.value.abs().max(1.0),
                "{}: {value} vs {}",
                expected.name,
                expected.value
            );
        }
    }

    #[test]
    fn high_pass_divide_removes_a_multiplicative_trend() {
        let fine: Vec<f64> = (0..12001).map(|index| 290.0 + 0.01 * index as f64).collect();
        let values = fine.iter().map(|wavelength| bands(*wavelength)).collect();
        let mut library = CrossSectionLibrary::new();
        library.insert(CrossSection::new("bands", fine, values).expect("valid cross-section"));

        let grid: Vec<f64> = (0..351).map(|index| 300.0 + 0.2 * index as f64).collect();
        let i0: Vec<f64> = grid.iter().map(|wavelength| 1.0e4 * (1.0 + 0.002 * (wavelength - 300.0))).collect();
        let signal: Vec<f64> = grid
            .iter()
            .zip(&i0)
            .map(|(wavelength, i0)| {
                let trend = (0.3 * ((wavelength - 300.0) / 8.0).sin()).exp();
                i0 * trend * (-0.05 * bands(*wavelength)).exp()
            })
            .collect();
        let record = Spectrum::new(signal)
            .expect("valid signal")
            .with_wavelengths(grid.clone())
            .expect("matching grid");
        let reference = SelectedReference {
            spectrum: Arc::new(
                Spectrum::new(i0)
                    .expect("valid reference")
                    .with_wavelengths(grid)
                    .expect("matching grid"),
            ),
            source: ReferenceSource::Fixed,
        };

        let config = AnalysisWindowConfig::new(
            "od",
            WavelengthInterval::new(322.0, 352.0),
            vec![CrossSectionTerm::fitted("bands")],
        );
        let mut window = AnalysisWindow::new(config.clone(), &library).expect("window should build");
        let raw = window.fit(0, &record, Some(&reference)).expect("fit should succeed");

        let mut config = config;
        config.filter = Some(FilterSettings {
            kind: FilterKind::Gaussian { fwhm: 15.0 },
            passes: 1,
            edge: EdgePolicy::Mirror,
            mode: FilterMode::HighPassDivide,
        });
        let mut window = AnalysisWindow::new(config, &library).expect("window should build");
        let filtered = window.fit(0, &record, Some(&reference)).expect("fit should succeed");

        let amplitude = filtered.parameter("bands").expect("fitted").value;
        assert!((amplitude - 0.05).abs() < 2.5e-3, "amplitude = {amplitude}");
        assert!(
            filtered.rms * 5.0 < raw.rms,
            "filtered rms {} vs raw rms {}",
            filtered.rms,
            raw.rms
        );
    }

    #[test]
    fn linear_filter_does_not_reach_across_a_gap() {
        let grid = grid();
        let signal = grid
            .iter()
            .map(|wavelength| {
                let level = if *wavelength < 340.0 { 100.0 } else { 130.0 };
                2.0 * band(*wavelength) + 0.5 * wiggle(*wavelength) + level
            })
            .collect();
        let record = Spectrum::new(signal)
            .expect("valid signal")
            .with_wavelengths(grid)
            .expect("matching grid");

        let mut config = direct_config(vec![CrossSectionTerm::fitted("xs1"), CrossSectionTerm::fitted("xs2")]);
        config.fit_windows = vec![WavelengthInterval::new(310.0, 380.0)];
        config.gaps = vec![WavelengthInterval::new(338.0, 342.0)];
        config.polynomial_degree = 0;
        config.filter = Some(FilterSettings {
            kind: FilterKind::Gaussian { fwhm: 15.0 },
            passes: 1,
            edge: EdgePolicy::Mirror,
            mode: FilterMode::HighPassSubtract,
        });
        let mut window = AnalysisWindow::new(config, &library()).expect("window should build");
        let result = window.fit(0, &record, None).expect("fit should succeed");

        // Each side of the gap is flat after the high-pass, so the step
        // between the two levels leaves no residual.
        let value = |name: &str| result.parameter(name).expect("parameter reported").value;
        assert!((value("xs1") - 2.0).abs() < 1.0e-6, "xs1 = {}", value("xs1"));
        assert!((value("xs2") - 0.5).abs() < 1.0e-6, "xs2 = {}", value("xs2"));
        assert!(result.rms < 1.0e-8, "rms = {}", result.rms);
    }
}
