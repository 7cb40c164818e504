// src/config.rs
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

use crate::errors::{Result, RunnerError};
use crate::models::{MAX_SCORE, Outcome};

/// Settings shared by every runner, loaded from the environment.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Largest response body, in bytes, copied from a remote corrector.
    pub max_upload_size: u64,
    /// Suffix appended to the output path to name the error file.
    pub error_suffix: String,
    /// How long to wait for a killed process to go away.
    pub kill_grace_period: Duration,
    /// Connect timeout for remote HTTP correctors.
    pub connect_timeout: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_upload_size: 10 * 1024 * 1024,
            error_suffix: ".error".to_string(),
            kill_grace_period: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl RunnerSettings {
    /// Load settings from environment variables, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Ok(value) = std::env::var("TOOLRUNNER_MAX_UPLOAD_SIZE") {
            settings.max_upload_size = parse_env("TOOLRUNNER_MAX_UPLOAD_SIZE", &value)?;
        }
        if let Ok(value) = std::env::var("TOOLRUNNER_ERROR_SUFFIX") {
            if value.is_empty() {
                return Err(RunnerError::Config(
                    "TOOLRUNNER_ERROR_SUFFIX can not be empty".to_string(),
                ));
            }
            settings.error_suffix = value;
        }
        if let Ok(value) = std::env::var("TOOLRUNNER_KILL_GRACE_SECS") {
            settings.kill_grace_period =
                Duration::from_secs(parse_env("TOOLRUNNER_KILL_GRACE_SECS", &value)?);
        }
        if let Ok(value) = std::env::var("TOOLRUNNER_CONNECT_TIMEOUT_SECS") {
            settings.connect_timeout =
                Duration::from_secs(parse_env("TOOLRUNNER_CONNECT_TIMEOUT_SECS", &value)?);
        }

        Ok(settings)
    }
}

fn parse_env(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| RunnerError::Config(format!("{} must be a non-negative integer, got '{}'", name, value)))
}

/// Reads a configuration file. `.toml` files are parsed as TOML, anything
/// else as JSON.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        Ok(toml::from_str(&text)?)
    } else {
        Ok(serde_json::from_str(&text)?)
    }
}

/// Restrictions placed on every command a runner spawns.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRestrictions {
    /// Arguments prepended to the command line, e.g. a sandbox wrapper.
    #[serde(default)]
    pub pre_args: Vec<String>,
}

impl ExecutionRestrictions {
    /// Parses restrictions from their JSON form. Missing or malformed input
    /// yields no restrictions.
    pub fn parse(json: Option<&str>) -> Self {
        Self::try_parse(json).unwrap_or_default()
    }

    /// Like [`parse`](Self::parse) but reports malformed input.
    pub fn try_parse(json: Option<&str>) -> Result<Self> {
        match json.map(str::trim) {
            None | Some("") | Some("null") => Ok(Self::default()),
            Some(text) => Ok(serde_json::from_str(text)?),
        }
    }
}

/// Configuration of a corrector reached over SSH.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SshToolConfig {
    /// Remote corrector executable.
    #[serde(default)]
    pub corrector: Option<String>,
    /// Remote directory the submission is copied to.
    #[serde(default)]
    pub remote_folder: Option<String>,
    /// Correction servers, `user@host` or `user@host:port`.
    #[serde(default)]
    pub servers: Vec<String>,
    /// Rotate the server list with the attempt counter.
    #[serde(default)]
    pub round_robin: bool,
    /// Private key, one entry per line.
    #[serde(default)]
    pub private_key_lines: Vec<String>,
    #[serde(default)]
    pub special_user: Option<String>,
    #[serde(default)]
    pub special_file: Option<String>,
    #[serde(default)]
    pub special_corrector: Option<String>,
}

impl SshToolConfig {
    /// Server order for an attempt: rotated left by `counter` when round robin
    /// is enabled, configured order otherwise.
    pub fn server_order(&self, counter: u32) -> Vec<&str> {
        let total = self.servers.len();
        if total == 0 {
            return Vec::new();
        }
        let start = if self.round_robin { counter as usize % total } else { 0 };
        self.servers[start..]
            .iter()
            .chain(&self.servers[..start])
            .map(String::as_str)
            .collect()
    }

    /// Server order in the form the shell script expects: every server
    /// followed by a space.
    pub fn servers_line(&self, counter: u32) -> String {
        self.server_order(counter)
            .into_iter()
            .map(|server| format!("{} ", server))
            .collect()
    }
}

/// A header or request parameter.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    #[serde(default)]
    pub value: String,
    /// Literal entries are sent as configured, without substitution.
    #[serde(default)]
    pub literal: bool,
}

/// Configuration of a corrector reached over HTTP.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HttpToolConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_method")]
    pub request_method: String,
    #[serde(default)]
    pub headers: Vec<Entry>,
    #[serde(default)]
    pub parameters: Vec<Entry>,
    #[serde(default)]
    pub request_body: Option<String>,
    /// Multipart field carrying the submission file.
    #[serde(default)]
    pub file_parameter: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub no_verify_certificate: bool,
    #[serde(default)]
    pub score_template: Option<String>,
    /// Lines written to the output file.
    #[serde(default)]
    pub response_template: Option<Vec<String>>,
    #[serde(default = "default_score_on_success")]
    pub default_score_on_success: Outcome,
    #[serde(default)]
    pub default_score_on_error: Outcome,
    #[serde(default)]
    pub json_response: bool,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_score_on_success() -> Outcome {
    MAX_SCORE
}

impl HttpToolConfig {
    /// Checks mandatory fields and normalizes the request method.
    pub fn validate(mut self) -> Result<Self> {
        match &self.url {
            Some(url) if !url.trim().is_empty() => {}
            _ => return Err(RunnerError::Config("URL can not be empty".to_string())),
        }
        self.request_method = self.request_method.trim().to_uppercase();
        if self.request_method.is_empty() {
            self.request_method = default_method();
        }
        Ok(self)
    }
}
