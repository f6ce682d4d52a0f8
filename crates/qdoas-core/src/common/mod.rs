pub mod config;
pub mod constants;

pub use config::{
    AmplitudeSetting, AnalysisWindowConfig, ConfigError, CrossSectionSource, CrossSectionTerm,
    FitMethod, Orthogonalization, ParameterSetting, ProjectConfig, SolverSettings,
    WavelengthInterval, load_project_config,
};
