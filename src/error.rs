use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    #[diagnostic(help("pass --project_config or --site-config to select a configuration explicitly"))]
    Configuration(String),

    #[error("cannot resolve study metadata from {path}: {reason}")]
    UnresolvableMetadata { path: Utf8PathBuf, reason: String },

    #[error("missing raw EPI data in {0}")]
    #[diagnostic(help("check that --output_path points at an HCP-processed subject folder"))]
    NoInputData(Utf8PathBuf),

    #[error("missing required input: {0}")]
    MissingInput(Utf8PathBuf),

    #[error("cannot derive a series index from {0}")]
    InvalidSeriesName(String),

    #[error("unable to create directory {path}: {message}")]
    DirectoryCreation { path: Utf8PathBuf, message: String },

    #[error("missing movement regressor file {0}")]
    MissingRegressor(Utf8PathBuf),

    #[error("movement regressor file {path} is invalid (checker said: {verdict})")]
    #[diagnostic(help("this is usually a race condition inside HCP; rerun the HCP volume stage"))]
    InvalidRegressor { path: Utf8PathBuf, verdict: String },

    #[error("mean signal extraction failed for {series}: {message}")]
    Extraction { series: String, message: String },

    #[error("{program} exceeded its {seconds}s budget")]
    EngineTimeout { program: String, seconds: u64 },

    #[error("numerical engine stage {stage} failed after {attempts} attempt(s): {message}")]
    Engine {
        stage: String,
        attempts: u32,
        message: String,
    },

    #[error("{program} failed: {message}")]
    ToolFailed { program: String, message: String },

    #[error("series {index} merged out of order (last merged: {last})")]
    MergeOrder { index: u32, last: u32 },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid batch list {path}: {message}")]
    Manifest { path: Utf8PathBuf, message: String },
}
