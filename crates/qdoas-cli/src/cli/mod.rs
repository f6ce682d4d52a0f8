mod commands;
mod helpers;

use clap::Parser;
use qdoas_core::domain::DoasError;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directives.
const LOG_ENV: &str = "QDOAS_LOG";

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let diagnostic = error.as_doas_error();
            eprintln!("{}", diagnostic.diagnostic_line());
            diagnostic.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("qdoas-rs".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();

    match Cli::try_parse_from(&full_args) {
        Ok(cli) => {
            init_logging(cli.verbose);
            dispatch_parsed(cli.command)
        }
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    // A subscriber may already be installed when `run` is called repeatedly.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(name = "qdoas-rs", about = "DOAS spectral analysis engine")]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace); overrides QDOAS_LOG
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Fit every record against every analysis window of a project
    Analyse(commands::AnalyseArgs),
    /// Compute a Ring spectrum from a high-resolution solar spectrum
    Ring(commands::RingArgs),
    /// Convolve a cross-section with a Gaussian slit onto a regular grid
    Convolve(commands::ConvolveArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Analyse(args) => commands::run_analyse_command(args),
        CliCommand::Ring(args) => commands::run_ring_command(args),
        CliCommand::Convolve(args) => commands::run_convolve_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(DoasError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<DoasError> for CliError {
    fn from(error: DoasError) -> Self {
        Self::Compute(error)
    }
}

impl CliError {
    fn as_doas_error(&self) -> DoasError {
        match self {
            Self::Usage(message) => DoasError::input_validation("INPUT.CLI_USAGE", message.clone()),
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => DoasError::io_system("IO.CLI", format!("{error:#}")),
        }
    }
}
