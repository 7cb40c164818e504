// src/models.rs
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result of one assessment: 0-100 is a score, anything above is an error code.
pub type Outcome = i32;

/// Highest valid score.
pub const MAX_SCORE: Outcome = 100;

/// Generic error.
pub const ERROR_GENERIC: Outcome = 101;
/// Error writing the outcome back to the tool consumer.
pub const ERROR_WRITE_OUTCOME: Outcome = 102;
/// Exception in the corrector.
pub const ERROR_CORRECTOR_EXCEPTION: Outcome = 111;
/// Exception in the runner itself.
pub const ERROR_RUNNER_EXCEPTION: Outcome = 112;
/// Attempt rejected because too many assessments were running.
pub const ERROR_CONCURRENT_EXCEPTION: Outcome = 113;
/// Maximum assessment time exceeded.
pub const ERROR_TIMEOUT: Outcome = 137;

const ERROR_CODES: [Outcome; 6] = [
    ERROR_GENERIC,
    ERROR_WRITE_OUTCOME,
    ERROR_CORRECTOR_EXCEPTION,
    ERROR_RUNNER_EXCEPTION,
    ERROR_CONCURRENT_EXCEPTION,
    ERROR_TIMEOUT,
];

/// Returns true if `outcome` is a score or one of the named error codes.
pub fn is_known_outcome(outcome: Outcome) -> bool {
    (0..=MAX_SCORE).contains(&outcome) || ERROR_CODES.contains(&outcome)
}

/// Folds anything outside the outcome vocabulary into a corrector exception.
pub fn normalize_outcome(raw: i64) -> Outcome {
    match Outcome::try_from(raw) {
        Ok(outcome) if is_known_outcome(outcome) => outcome,
        _ => {
            log::warn!("Corrector produced out-of-range outcome {}", raw);
            ERROR_CORRECTOR_EXCEPTION
        }
    }
}

/// One attempt handed to a runner. The runner only reads it.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Uploaded file.
    pub file_path: PathBuf,
    /// Where the runner writes its result; errors go to a sibling file.
    pub output_path: PathBuf,
    /// Tool consumer user identifier.
    pub consumer_id: String,
    /// File name as given by the user.
    pub original_filename: String,
    /// Per-tool attempt counter.
    pub counter: u32,
    pub is_instructor: bool,
    pub extra_args: Vec<String>,
    /// Deadline in seconds; zero or negative waits forever.
    pub max_seconds_wait: i64,
}

impl Submission {
    pub fn new(file_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            output_path: output_path.into(),
            consumer_id: String::new(),
            original_filename: String::new(),
            counter: 0,
            is_instructor: false,
            extra_args: Vec::new(),
            max_seconds_wait: 0,
        }
    }

    pub fn consumer_id(mut self, consumer_id: impl Into<String>) -> Self {
        self.consumer_id = consumer_id.into();
        self
    }

    pub fn original_filename(mut self, original_filename: impl Into<String>) -> Self {
        self.original_filename = original_filename.into();
        self
    }

    pub fn counter(mut self, counter: u32) -> Self {
        self.counter = counter;
        self
    }

    pub fn instructor(mut self, is_instructor: bool) -> Self {
        self.is_instructor = is_instructor;
        self
    }

    pub fn extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn deadline_secs(mut self, seconds: i64) -> Self {
        self.max_seconds_wait = seconds;
        self
    }

    /// The deadline, if one applies.
    pub fn deadline(&self) -> Option<Duration> {
        u64::try_from(self.max_seconds_wait)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Arguments passed after the executable, in order: consumer id, original
    /// filename, counter, instructor flag, extra arguments.
    pub fn positional_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(4 + self.extra_args.len());
        args.push(self.consumer_id.clone());
        args.push(self.original_filename.clone());
        args.push(self.counter.to_string());
        args.push(self.is_instructor.to_string());
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Full argument vector for an executable: prefix arguments, the
    /// executable, the submission file path and the positional arguments.
    pub fn command_line(&self, pre_args: &[String], exe: &str) -> Vec<String> {
        let mut args: Vec<String> = pre_args.to_vec();
        args.push(exe.to_string());
        args.push(self.file_path.to_string_lossy().into_owned());
        args.extend(self.positional_args());
        args
    }

    /// Path of the error/log file that sits next to the output file.
    pub fn error_path(&self, error_suffix: &str) -> PathBuf {
        error_path(&self.output_path, error_suffix)
    }
}

/// Appends `error_suffix` to the file name of `output_path`.
pub fn error_path(output_path: &Path, error_suffix: &str) -> PathBuf {
    let mut name = output_path.as_os_str().to_os_string();
    name.push(error_suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_outcome() {
        assert_eq!(normalize_outcome(0), 0);
        assert_eq!(normalize_outcome(87), 87);
        assert_eq!(normalize_outcome(100), 100);
        assert_eq!(normalize_outcome(137), ERROR_TIMEOUT);
        assert_eq!(normalize_outcome(113), ERROR_CONCURRENT_EXCEPTION);
        assert_eq!(normalize_outcome(-1), ERROR_CORRECTOR_EXCEPTION);
        assert_eq!(normalize_outcome(255), ERROR_CORRECTOR_EXCEPTION);
        assert_eq!(normalize_outcome(i64::MAX), ERROR_CORRECTOR_EXCEPTION);
    }

    #[test]
    fn test_command_line_order() {
        let submission = Submission::new("/in/file.c", "/out/result")
            .consumer_id("user-7")
            .original_filename("main.c")
            .counter(3)
            .instructor(true)
            .extra_args(["-v", "fast"]);

        let args = submission.command_line(&["nice".to_string()], "/opt/corrector");
        assert_eq!(
            args,
            vec!["nice", "/opt/corrector", "/in/file.c", "user-7", "main.c", "3", "true", "-v", "fast"]
        );
    }

    #[test]
    fn test_deadline() {
        assert_eq!(Submission::new("a", "b").deadline_secs(0).deadline(), None);
        assert_eq!(Submission::new("a", "b").deadline_secs(-5).deadline(), None);
        assert_eq!(
            Submission::new("a", "b").deadline_secs(7).deadline(),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_error_path() {
        let submission = Submission::new("in", "/tmp/out.txt");
        assert_eq!(submission.error_path(".error"), PathBuf::from("/tmp/out.txt.error"));
    }
}
