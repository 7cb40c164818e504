// src/runners/local.rs

use async_trait::async_trait;
use log::{debug, error};

use crate::config::{ExecutionRestrictions, RunnerSettings};
use crate::errors::{Result, RunnerError};
use crate::models::{Outcome, Submission};
use crate::process::{redirected_command, run_command};
use crate::runners::{ToolRunner, settle};

/// Runs a corrector executable on this machine.
///
/// The command line is the prefix arguments, the executable, the submission
/// file and the positional arguments. Stdout goes to the output file, stderr
/// to the error file, and the exit code is the outcome.
pub struct LocalToolRunner {
    exe: String,
    pre_args: Vec<String>,
    settings: RunnerSettings,
}

impl LocalToolRunner {
    /// `exe_data` is the path of the corrector executable.
    pub fn init(exe_data: &str, restrictions: Option<&str>, settings: RunnerSettings) -> Self {
        if exe_data.trim().is_empty() {
            error!("LocalToolRunner: no corrector executable configured");
        }
        Self {
            exe: exe_data.to_string(),
            pre_args: ExecutionRestrictions::parse(restrictions).pre_args,
            settings,
        }
    }

    async fn run(&self, submission: &Submission) -> Result<Outcome> {
        if self.exe.trim().is_empty() {
            return Err(RunnerError::NotInitialized("no corrector executable".to_string()));
        }
        let args = submission.command_line(&self.pre_args, &self.exe);
        debug!("LocalToolRunner: running {:?}", args);

        let command = redirected_command(
            &args,
            &submission.output_path,
            &submission.error_path(&self.settings.error_suffix),
        )?;
        run_command(command, None, submission.deadline(), self.settings.kill_grace_period).await
    }
}

#[async_trait]
impl ToolRunner for LocalToolRunner {
    async fn execute(&self, submission: &Submission) -> Outcome {
        settle("LocalToolRunner", self.run(submission).await)
    }

    fn error_suffix(&self) -> &str {
        &self.settings.error_suffix
    }
}
