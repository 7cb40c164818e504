// src/errors.rs
use thiserror::Error;

use crate::models::{ERROR_CORRECTOR_EXCEPTION, ERROR_GENERIC, ERROR_RUNNER_EXCEPTION, ERROR_TIMEOUT, Outcome};

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Runner is not initialized: {0}")]
    NotInitialized(String),

    #[error("Runner support failure: {0}")]
    Support(String),

    #[error("Deadline of {0}s exceeded")]
    Timeout(u64),

    #[error("Corrector returned an invalid score: '{0}'")]
    InvalidScore(String),

    #[error("Corrector terminated abnormally: {0}")]
    Corrector(String),
}

impl RunnerError {
    /// Outcome code reported to the caller for this error.
    pub fn outcome(&self) -> Outcome {
        match self {
            RunnerError::Config(_) | RunnerError::NotInitialized(_) => ERROR_GENERIC,
            RunnerError::Support(_) => ERROR_RUNNER_EXCEPTION,
            RunnerError::Timeout(_) => ERROR_TIMEOUT,
            RunnerError::Io(_)
            | RunnerError::TomlParse(_)
            | RunnerError::JsonParse(_)
            | RunnerError::Request(_)
            | RunnerError::InvalidScore(_)
            | RunnerError::Corrector(_) => ERROR_CORRECTOR_EXCEPTION,
        }
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
