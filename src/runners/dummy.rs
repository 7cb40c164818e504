// src/runners/dummy.rs

use async_trait::async_trait;
use log::info;
use std::time::Duration;

use crate::config::{ExecutionRestrictions, RunnerSettings};
use crate::errors::Result;
use crate::models::{MAX_SCORE, Outcome, Submission};
use crate::runners::{ToolRunner, settle};

const DEFAULT_WAIT_SECS: u64 = 5;

/// Placeholder runner for tools of unknown type. It writes the argument
/// vector a real corrector would have received, waits, and scores 100.
///
/// The wait is the first extra argument in seconds, else the submission
/// deadline, else five seconds.
pub struct DummyRunner {
    exe: String,
    pre_args: Vec<String>,
    settings: RunnerSettings,
}

impl DummyRunner {
    pub fn init(exe_data: &str, restrictions: Option<&str>, settings: RunnerSettings) -> Self {
        Self {
            exe: exe_data.to_string(),
            pre_args: ExecutionRestrictions::parse(restrictions).pre_args,
            settings,
        }
    }

    fn wait_time(submission: &Submission) -> Duration {
        let mut seconds = submission.max_seconds_wait;
        if let Some(first) = submission.extra_args.first() {
            match first.trim().parse::<i64>() {
                Ok(value) => seconds = value,
                Err(_) => info!("First extra argument must be an integer (seconds of waiting)."),
            }
        }
        match u64::try_from(seconds) {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => Duration::from_secs(DEFAULT_WAIT_SECS),
        }
    }

    async fn run(&self, submission: &Submission) -> Result<Outcome> {
        let args = submission.command_line(&self.pre_args, &self.exe);
        let lines: String = args
            .iter()
            .enumerate()
            .map(|(i, arg)| format!("{}:[{}]\n", i, arg))
            .collect();
        let dump = format!("<pre>\n{}</pre>\n", lines);
        tokio::fs::write(&submission.output_path, dump).await?;

        tokio::time::sleep(Self::wait_time(submission)).await;
        Ok(MAX_SCORE)
    }
}

#[async_trait]
impl ToolRunner for DummyRunner {
    async fn execute(&self, submission: &Submission) -> Outcome {
        settle("DummyRunner", self.run(submission).await)
    }

    fn error_suffix(&self) -> &str {
        &self.settings.error_suffix
    }
}
