// src/runners/storage.rs

use async_trait::async_trait;

use crate::config::RunnerSettings;
use crate::errors::Result;
use crate::models::{MAX_SCORE, Outcome, Submission};
use crate::runners::{ToolRunner, settle};

/// Marker written for every stored attempt.
pub const STORED_MARKER: &str = "\u{2713}";

/// Deposit-only tool: nothing is assessed, every attempt gets full score.
pub struct StorageRunner {
    settings: RunnerSettings,
}

impl StorageRunner {
    pub fn init(settings: RunnerSettings) -> Self {
        Self { settings }
    }

    async fn run(&self, submission: &Submission) -> Result<Outcome> {
        tokio::fs::write(&submission.output_path, format!("{}\n", STORED_MARKER)).await?;
        Ok(MAX_SCORE)
    }
}

#[async_trait]
impl ToolRunner for StorageRunner {
    async fn execute(&self, submission: &Submission) -> Outcome {
        settle("StorageRunner", self.run(submission).await)
    }

    fn error_suffix(&self) -> &str {
        &self.settings.error_suffix
    }
}
