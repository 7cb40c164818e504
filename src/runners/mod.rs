// src/runners/mod.rs

use async_trait::async_trait;
use log::error;
use std::path::Path;

use crate::errors::RunnerError;
use crate::models::{Outcome, Submission, error_path};

pub mod dummy;
pub mod http;
pub mod local;
pub mod ssh;
pub mod storage;

/// A tool runner performs the assessment of one attempt.
///
/// Runners are built once per tool configuration and then shared: `execute`
/// takes `&self` and may be called concurrently for different submissions,
/// as long as every submission has its own output path.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Assesses `submission`, writing the corrector's output to
    /// `submission.output_path`.
    ///
    /// # Returns
    /// A score in 0-100, or one of the error codes in [`crate::models`]. This
    /// never fails: errors are logged and reported as outcome codes.
    async fn execute(&self, submission: &Submission) -> Outcome;

    /// Suffix of the error file written next to the output file.
    fn error_suffix(&self) -> &str;

    /// Removes the output and error files of an attempt. Failures are logged.
    async fn clean(&self, output_path: &Path) {
        let error_output = error_path(output_path, self.error_suffix());
        for path in [output_path, error_output.as_path()] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => error!("Error deleting {}: {}", path.display(), e),
            }
        }
    }
}

/// Turns an internal result into an outcome, logging the failure.
pub(crate) fn settle(runner: &str, result: Result<Outcome, RunnerError>) -> Outcome {
    match result {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{}: {}", runner, e);
            e.outcome()
        }
    }
}
