// src/process.rs
//! Spawning correctors and waiting for them under a deadline.
//!
//! A waited process moves through `Running`, then on deadline expiry to
//! `TerminationRequested` (SIGKILL sent), and ends `Finished` either because
//! it exited or because the grace period ran out and it was abandoned.

use log::{debug, error, warn};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;

use crate::errors::{Result, RunnerError};
use crate::models::{ERROR_CORRECTOR_EXCEPTION, ERROR_TIMEOUT, Outcome, normalize_outcome};

/// How a waited process ended.
#[derive(Debug)]
pub enum Termination {
    /// Exited on its own before any deadline.
    Exited(ExitStatus),
    /// Killed after the deadline and reaped within the grace period.
    Killed(ExitStatus),
    /// Killed after the deadline but still not gone when the grace period ran out.
    Abandoned,
}

impl Termination {
    pub fn outcome(&self) -> Outcome {
        match self {
            Termination::Exited(status) => exit_outcome(*status),
            Termination::Killed(_) | Termination::Abandoned => ERROR_TIMEOUT,
        }
    }
}

#[derive(Debug)]
enum WaitState {
    Running,
    TerminationRequested,
    Finished(Termination),
}

/// Outcome carried by an exit status. A process ended by a signal reports
/// `128 + signal`, the way shells do.
pub fn exit_outcome(status: ExitStatus) -> Outcome {
    if let Some(code) = status.code() {
        return normalize_outcome(i64::from(code));
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return normalize_outcome(128 + i64::from(signal));
        }
    }
    ERROR_CORRECTOR_EXCEPTION
}

/// Waits for `child`. Without a deadline the wait is unbounded. With one, the
/// child is killed when it expires and then given `grace` to disappear.
pub async fn wait_with_deadline(
    child: &mut Child,
    deadline: Option<Duration>,
    grace: Duration,
) -> Result<Termination> {
    let mut state = WaitState::Running;
    loop {
        state = match state {
            WaitState::Running => match deadline {
                None => WaitState::Finished(Termination::Exited(child.wait().await?)),
                Some(limit) => match timeout(limit, child.wait()).await {
                    Ok(status) => WaitState::Finished(Termination::Exited(status?)),
                    Err(_) => {
                        warn!(
                            "Corrector (pid {:?}) exceeded {}s, killing it",
                            child.id(),
                            limit.as_secs()
                        );
                        if let Err(e) = child.start_kill() {
                            error!("Failed to kill corrector: {}", e);
                        }
                        WaitState::TerminationRequested
                    }
                },
            },
            WaitState::TerminationRequested => match timeout(grace, child.wait()).await {
                Ok(status) => WaitState::Finished(Termination::Killed(status?)),
                Err(_) => {
                    error!(
                        "Corrector (pid {:?}) still running {}s after kill, abandoning it",
                        child.id(),
                        grace.as_secs()
                    );
                    WaitState::Finished(Termination::Abandoned)
                }
            },
            WaitState::Finished(termination) => return Ok(termination),
        };
    }
}

/// Builds a command from `args` (program first) with stdout sent to `output`
/// and stderr to `error_output`. Both files are truncated.
pub fn redirected_command(args: &[String], output: &Path, error_output: &Path) -> Result<Command> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| RunnerError::Config("empty command line".to_string()))?;

    let stdout = std::fs::File::create(output)?;
    let stderr = std::fs::File::create(error_output)?;

    let mut command = Command::new(program);
    command
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    Ok(command)
}

/// Spawns `command`, optionally feeds `input` to its stdin, and waits for it
/// under the deadline.
pub async fn run_command(
    mut command: Command,
    input: Option<&str>,
    deadline: Option<Duration>,
    grace: Duration,
) -> Result<Outcome> {
    if input.is_some() {
        command.stdin(Stdio::piped());
    }

    let mut child = command.spawn()?;
    debug!("Spawned corrector pid {:?}", child.id());

    // Input is written alongside the deadline wait. Killing the child closes
    // the pipe and ends the write.
    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        let input = input.to_string();
        tokio::spawn(async move {
            let written = async {
                stdin.write_all(input.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.shutdown().await
            }
            .await;
            // The shell may exit before reading everything; its exit code decides.
            if let Err(e) = written {
                warn!("Could not write corrector input: {}", e);
            }
        });
    }

    let termination = wait_with_deadline(&mut child, deadline, grace).await?;
    debug!("Corrector finished: {:?}", termination);
    Ok(termination.outcome())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }

    #[tokio::test]
    async fn test_exit_code_is_outcome() {
        let outcome = run_command(sh("exit 73"), None, None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, 73);
    }

    #[tokio::test]
    async fn test_unknown_exit_code_is_corrector_exception() {
        let outcome = run_command(sh("exit 200"), None, None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, ERROR_CORRECTOR_EXCEPTION);
    }

    #[tokio::test]
    async fn test_deadline_kills_process() {
        let start = Instant::now();
        let mut child = sh("exec sleep 30").spawn().unwrap();
        let termination = wait_with_deadline(&mut child, Some(Duration::from_secs(1)), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(termination, Termination::Killed(_)));
        assert_eq!(termination.outcome(), ERROR_TIMEOUT);
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_no_deadline_waits_for_completion() {
        let start = Instant::now();
        let mut child = sh("sleep 1; exit 5").spawn().unwrap();
        let termination = wait_with_deadline(&mut child, None, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(termination, Termination::Exited(_)));
        assert_eq!(termination.outcome(), 5);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_input_is_fed_to_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let err = dir.path().join("out.error");
        let command = redirected_command(&["sh".to_string()], &out, &err).unwrap();
        let outcome = run_command(command, Some("echo fed; exit 9"), None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, 9);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "fed\n");
    }

    #[tokio::test]
    async fn test_unread_input_does_not_outlive_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let args = ["sh".to_string(), "-c".to_string(), "exec sleep 30".to_string()];
        let command = redirected_command(&args, &dir.path().join("o"), &dir.path().join("e")).unwrap();
        let input = "x".repeat(4 * 1024 * 1024);

        let start = Instant::now();
        let outcome = run_command(
            command,
            Some(&input),
            Some(Duration::from_secs(1)),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(outcome, ERROR_TIMEOUT);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_empty_command_line() {
        let dir = tempfile::tempdir().unwrap();
        let result = redirected_command(&[], &dir.path().join("o"), &dir.path().join("e"));
        assert!(matches!(result, Err(RunnerError::Config(_))));
    }
}
