// src/lib.rs
pub mod config;
pub mod errors;
pub mod models;
pub mod process;
pub mod runner;
pub mod runners;
pub mod template;

pub use config::RunnerSettings;
pub use models::{Outcome, Submission};
pub use runner::{ToolRunnerKind, build_runner};
pub use runners::ToolRunner;
