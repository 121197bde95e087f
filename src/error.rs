use std::path::PathBuf;

use thiserror::Error;

use crate::submitter::SubmissionResult;

/// Startup-fatal configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("failed to encode record: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("signer backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Anything that aborts a single cycle. Caught at the cycle boundary.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),
    #[error("submission failed: {0}")]
    Submission(SubmissionResult),
}
