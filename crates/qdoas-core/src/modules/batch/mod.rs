//! Batch processing: every record through every analysis window.
//!
//! Windows run in parallel, each with its own workspace; records inside a
//! window are analysed in order. A failing record is skipped unless its
//! error category ends the whole window.

use crate::common::ProjectConfig;
use crate::domain::{DoasError, DoasErrorCategory, DoasResult, Spectrum};
use crate::modules::analysis::{AnalysisWindow, FitResult};
use crate::modules::cross_section::{
    load_project_library, parse_two_column_source, read_cross_section_file, read_text_source,
};
use crate::modules::kurucz::KuruczCalibrator;
use crate::modules::reference::ReferenceSelector;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Shared flag checked between records.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RecordOutcome {
    Fitted(FitResult),
    #[serde(rename_all = "camelCase")]
    Skipped {
        record_index: usize,
        reason: String,
        category: DoasErrorCategory,
    },
}

impl RecordOutcome {
    pub fn fit(&self) -> Option<&FitResult> {
        match self {
            Self::Fitted(result) => Some(result),
            Self::Skipped { .. } => None,
        }
    }

    pub fn record_index(&self) -> usize {
        match self {
            Self::Fitted(result) => result.record_index,
            Self::Skipped { record_index, .. } => *record_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowReport {
    pub window: String,
    pub outcomes: Vec<RecordOutcome>,
    /// Diagnostic of the error that ended the window early.
    pub aborted: Option<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub windows: Vec<WindowReport>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn window(&self, name: &str) -> Option<&WindowReport> {
        self.windows.iter().find(|report| report.window == name)
    }

    pub fn fitted_count(&self) -> usize {
        self.windows
            .iter()
            .flat_map(|report| &report.outcomes)
            .filter(|outcome| outcome.fit().is_some())
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.windows
            .iter()
            .map(|report| report.outcomes.len())
            .sum::<usize>()
            - self.fitted_count()
    }
}

#[derive(Debug)]
struct WindowPipeline {
    window: AnalysisWindow,
    selector: Option<Box<dyn ReferenceSelector>>,
}

impl WindowPipeline {
    fn run(&mut self, records: &[Arc<Spectrum>], token: &CancellationToken) -> WindowReport {
        let mut report = WindowReport {
            window: self.window.name().to_string(),
            outcomes: Vec::with_capacity(records.len()),
            aborted: None,
            cancelled: false,
        };

        for (index, record) in records.iter().enumerate() {
            if token.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let reference = match &self.selector {
                Some(selector) => match selector.select(record, Some(index), records) {
                    Ok(reference) => Some(reference),
                    Err(error) => {
                        let error = error.in_window(self.window.name());
                        warn!(record = index, error = %error, "no reference, record skipped");
                        report.outcomes.push(skipped(index, &error));
                        continue;
                    }
                },
                None => None,
            };

            match self.window.fit(index, record, reference.as_ref()) {
                Ok(result) => report.outcomes.push(RecordOutcome::Fitted(result)),
                Err(error) => {
                    report.outcomes.push(skipped(index, &error));
                    if error.category().aborts_window() {
                        warn!(record = index, error = %error, "analysis window aborted");
                        report.aborted = Some(error.diagnostic_line());
                        break;
                    }
                    warn!(record = index, error = %error, "record skipped");
                }
            }
        }
        report
    }
}

fn skipped(record_index: usize, error: &DoasError) -> RecordOutcome {
    RecordOutcome::Skipped {
        record_index,
        reason: error.diagnostic_line(),
        category: error.category(),
    }
}

/// Analysis windows ready to process batches of records.
#[derive(Debug)]
pub struct BatchProcessor {
    pipelines: Vec<WindowPipeline>,
}

impl BatchProcessor {
    /// Attach a reference selector to every window that fits optical densities.
    pub fn new(windows: Vec<AnalysisWindow>, fixed_reference: Option<Arc<Spectrum>>) -> DoasResult<Self> {
        let pipelines = windows
            .into_iter()
            .map(|window| -> DoasResult<WindowPipeline> {
                let selector = if window.needs_reference() {
                    Some(
                        window
                            .config()
                            .reference
                            .build(fixed_reference.clone())
                            .map_err(|error| error.in_window(window.name()))?,
                    )
                } else {
                    None
                };
                Ok(WindowPipeline { window, selector })
            })
            .collect::<DoasResult<Vec<_>>>()?;
        Ok(Self { pipelines })
    }

    /// Load cross-sections, the reference and solar spectra of `project`
    /// and set up every window.
    pub fn from_project(project: &ProjectConfig) -> DoasResult<Self> {
        project.validate()?;
        let library = load_project_library(project)?;
        let fixed_reference = project
            .reference_spectrum
            .as_ref()
            .map(|path| read_spectrum_table(&project.resolve(path)).map(Arc::new))
            .transpose()?;
        let solar = project
            .solar_reference
            .as_ref()
            .map(|path| read_cross_section_file("solar", &project.resolve(path)).map(Arc::new))
            .transpose()?;

        let mut windows = Vec::with_capacity(project.windows.len());
        for config in &project.windows {
            let mut window = AnalysisWindow::new(config.clone(), &library)?;
            if let Some(settings) = &config.kurucz {
                let solar = solar.as_ref().ok_or_else(|| {
                    DoasError::input_validation(
                        "KURUCZ.SOLAR",
                        "Kurucz calibration requires a solar reference",
                    )
                    .in_window(&config.name)
                })?;
                let calibrator = KuruczCalibrator::new(settings.clone(), Arc::clone(solar))
                    .map_err(|error| error.in_window(&config.name))?;
                window = window.with_calibrator(calibrator);
            }
            windows.push(window);
        }
        Self::new(windows, fixed_reference)
    }

    pub fn window_names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.iter().map(|pipeline| pipeline.window.name())
    }

    pub fn process(&mut self, records: &[Spectrum], token: &CancellationToken) -> BatchReport {
        info!(
            windows = self.pipelines.len(),
            records = records.len(),
            "batch started"
        );
        let candidates: Vec<Arc<Spectrum>> = records.iter().cloned().map(Arc::new).collect();
        let windows: Vec<WindowReport> = self
            .pipelines
            .par_iter_mut()
            .map(|pipeline| pipeline.run(&candidates, token))
            .collect();
        let report = BatchReport {
            cancelled: windows.iter().any(|window| window.cancelled),
            windows,
        };
        info!(
            fitted = report.fitted_count(),
            skipped = report.skipped_count(),
            cancelled = report.cancelled,
            "batch finished"
        );
        report
    }
}

/// Two-column `wavelength intensity` table as a spectrum.
pub fn read_spectrum_table(path: &Path) -> DoasResult<Spectrum> {
    let source = read_text_source(path, "spectrum")?;
    let label = path.display().to_string();
    let (wavelengths, values) = parse_two_column_source(&source, &label)?;
    Spectrum::new(values)?.with_wavelengths(wavelengths)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecordFile {
    Many(Vec<Spectrum>),
    One(Spectrum),
}

/// Records of a JSON file holding one spectrum or an array of spectra.
pub fn read_records_file(path: &Path) -> DoasResult<Vec<Spectrum>> {
    let source = read_text_source(path, "record file")?;
    let records: RecordFile = serde_json::from_str(&source).map_err(|error| {
        DoasError::input_validation(
            "INPUT.RECORDS",
            format!("failed to parse records '{}': {error}", path.display()),
        )
    })?;
    Ok(match records {
        RecordFile::Many(records) => records,
        RecordFile::One(record) => vec![record],
    })
}
