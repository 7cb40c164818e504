// src/runner.rs
use log::info;
use std::sync::Arc;

use crate::config::RunnerSettings;
use crate::runners::{
    ToolRunner, dummy::DummyRunner, http::HttpToolRunner, local::LocalToolRunner, ssh::SshToolRunner,
    storage::StorageRunner,
};

/// Kind of tool runner, as stored with the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolRunnerKind {
    /// Unknown or invalid type; served by the diagnostic runner.
    Unknown,
    /// Local execution.
    Local,
    /// Remote execution via SSH.
    Ssh,
    /// Remote execution via HTTP.
    Http,
    /// No execution, only storage.
    Storage,
}

impl ToolRunnerKind {
    pub fn code(self) -> i32 {
        match self {
            ToolRunnerKind::Unknown => 0,
            ToolRunnerKind::Local => 1,
            ToolRunnerKind::Ssh => 2,
            ToolRunnerKind::Http => 3,
            ToolRunnerKind::Storage => 4,
        }
    }

    /// Decodes a stored code; anything unrecognized is `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ToolRunnerKind::Local,
            2 => ToolRunnerKind::Ssh,
            3 => ToolRunnerKind::Http,
            4 => ToolRunnerKind::Storage,
            _ => ToolRunnerKind::Unknown,
        }
    }
}

impl std::fmt::Display for ToolRunnerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolRunnerKind::Unknown => write!(f, "unknown"),
            ToolRunnerKind::Local => write!(f, "local"),
            ToolRunnerKind::Ssh => write!(f, "ssh"),
            ToolRunnerKind::Http => write!(f, "http"),
            ToolRunnerKind::Storage => write!(f, "storage"),
        }
    }
}

/// Builds and initializes the runner for a tool.
///
/// # Arguments
/// * `exe_data` - The corrector executable for local tools, otherwise the path of the runner configuration file.
/// * `restrictions` - Serialized execution restrictions of the tool owner, if any.
///
/// Initialization never fails: a runner whose configuration can not be read
/// answers every attempt with the generic error code.
pub fn build_runner(
    kind: ToolRunnerKind,
    exe_data: &str,
    restrictions: Option<&str>,
    settings: &RunnerSettings,
) -> Arc<dyn ToolRunner> {
    info!("Initializing {} runner from {}", kind, exe_data);
    let settings = settings.clone();
    match kind {
        ToolRunnerKind::Local => Arc::new(LocalToolRunner::init(exe_data, restrictions, settings)),
        ToolRunnerKind::Ssh => Arc::new(SshToolRunner::init(exe_data, restrictions, settings)),
        ToolRunnerKind::Http => Arc::new(HttpToolRunner::init(exe_data, restrictions, settings)),
        ToolRunnerKind::Storage => Arc::new(StorageRunner::init(settings)),
        ToolRunnerKind::Unknown => Arc::new(DummyRunner::init(exe_data, restrictions, settings)),
    }
}
