use super::CliError;
use super::helpers::*;
use qdoas_core::common::constants::DEFAULT_RING_TEMPERATURE;
use qdoas_core::common::load_project_config;
use qdoas_core::domain::DoasError;
use qdoas_core::modules::batch::{BatchProcessor, CancellationToken};
use qdoas_core::modules::convolution::{SlitFunction, convolve_cross_section, raman_ring_spectrum};
use qdoas_core::modules::cross_section::read_cross_section_file;
use std::path::PathBuf;
use tracing::info;

#[derive(clap::Args)]
#[command(group(clap::ArgGroup::new("records").required(true).multiple(true).args(["input", "input_dir"])))]
pub(super) struct AnalyseArgs {
    /// Project configuration (JSON)
    #[arg(long)]
    project: PathBuf,

    /// Record file (JSON spectrum or array of spectra); repeatable
    #[arg(long)]
    input: Vec<PathBuf>,

    /// Directory searched recursively for record files
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Glob selecting record files under --input-dir
    #[arg(long, default_value = "*.json")]
    pattern: String,

    /// JSON report output path
    #[arg(long, default_value = "qdoas-report.json")]
    output: PathBuf,
}

#[derive(clap::Args)]
pub(super) struct GridArgs {
    /// First wavelength of the output grid (nm)
    #[arg(long)]
    start: f64,

    /// Last wavelength of the output grid (nm)
    #[arg(long)]
    end: f64,

    /// Output grid spacing (nm)
    #[arg(long, default_value_t = 0.1)]
    step: f64,
}

#[derive(clap::Args)]
pub(super) struct RingArgs {
    /// High-resolution solar spectrum (two-column table)
    #[arg(long)]
    solar: PathBuf,

    /// Gaussian slit FWHM (nm)
    #[arg(long, default_value_t = 0.5)]
    fwhm: f64,

    /// Rotational temperature of the air molecules (K)
    #[arg(long, default_value_t = DEFAULT_RING_TEMPERATURE)]
    temperature: f64,

    #[command(flatten)]
    grid: GridArgs,

    /// Output table: wavelength, ring, raman, solar
    #[arg(long)]
    output: PathBuf,
}

#[derive(clap::Args)]
pub(super) struct ConvolveArgs {
    /// High-resolution cross-section (two-column table)
    #[arg(long)]
    cross_section: PathBuf,

    /// Gaussian slit FWHM (nm)
    #[arg(long)]
    fwhm: f64,

    #[command(flatten)]
    grid: GridArgs,

    /// Output table: wavelength, convolved cross-section
    #[arg(long)]
    output: PathBuf,
}

pub(super) fn run_analyse_command(args: AnalyseArgs) -> Result<i32, CliError> {
    let project = load_project_config(&args.project).map_err(DoasError::from)?;
    let mut processor = BatchProcessor::from_project(&project)?;

    let paths = collect_record_paths(&args.input, args.input_dir.as_deref(), &args.pattern)?;
    let records = load_records(&paths)?;
    info!(files = paths.len(), records = records.len(), "records loaded");

    let report = processor.process(&records, &CancellationToken::new());
    write_json(&args.output, &report)?;

    for window in &report.windows {
        let fitted = window
            .outcomes
            .iter()
            .filter(|outcome| outcome.fit().is_some())
            .count();
        println!(
            "Window {}: {} fitted, {} skipped",
            window.window,
            fitted,
            window.outcomes.len() - fitted
        );
        if let Some(diagnostic) = &window.aborted {
            eprintln!("{diagnostic}");
        }
    }
    println!("JSON report: {}", args.output.display());

    let aborted = report.windows.iter().any(|window| window.aborted.is_some());
    if aborted { Ok(1) } else { Ok(0) }
}

pub(super) fn run_ring_command(args: RingArgs) -> Result<i32, CliError> {
    let solar = read_cross_section_file("solar", &args.solar)?;
    let grid = regular_grid(args.grid.start, args.grid.end, args.grid.step)?;
    let slit = SlitFunction::Gaussian { fwhm: args.fwhm };

    let ring = raman_ring_spectrum(
        solar.wavelengths(),
        solar.values(),
        &slit,
        args.temperature,
        &grid,
    )
    .map_err(DoasError::from)?;
    write_columns(
        &args.output,
        "wavelength ring raman solar",
        &[
            ring.wavelengths.as_slice(),
            ring.ring.as_slice(),
            ring.raman.as_slice(),
            ring.solar.as_slice(),
        ],
    )?;
    println!("Ring spectrum: {} points -> {}", grid.len(), args.output.display());
    Ok(0)
}

pub(super) fn run_convolve_command(args: ConvolveArgs) -> Result<i32, CliError> {
    let name = args
        .cross_section
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cross-section".to_string());
    let cross_section = read_cross_section_file(&name, &args.cross_section)?;
    let grid = regular_grid(args.grid.start, args.grid.end, args.grid.step)?;
    let slit = SlitFunction::Gaussian { fwhm: args.fwhm };

    let convolved = convolve_cross_section(
        cross_section.wavelengths(),
        cross_section.values(),
        &slit,
        &grid,
    )
    .map_err(DoasError::from)?;
    write_columns(&args.output, "wavelength cross-section", &[grid.as_slice(), convolved.as_slice()])?;
    println!("Convolved {}: {} points -> {}", name, grid.len(), args.output.display());
    Ok(0)
}
