// src/runners/ssh.rs

use async_trait::async_trait;
use log::{debug, error};
use rust_embed::RustEmbed;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::{ExecutionRestrictions, RunnerSettings, SshToolConfig, load_config};
use crate::errors::{Result, RunnerError};
use crate::models::{ERROR_RUNNER_EXCEPTION, Outcome, Submission};
use crate::process::{redirected_command, run_command};
use crate::runners::{ToolRunner, settle};
use crate::template::form_encode;

#[derive(RustEmbed)]
#[folder = "resources/"]
struct Resources;

/// Shell that runs the helper script.
pub const BIN_NAME: &str = "sh";
/// Helper script that copies the submission to a server and runs the corrector there.
pub const SCRIPT_NAME: &str = "ssh_tool.sh";
/// Remote folder used when the configuration names none.
pub const DEFAULT_REMOTE_FOLDER: &str = "/tmp";

pub const VAR_CORRECTOR: &str = "TPMcorrector";
pub const VAR_CONSUMERID: &str = "TPMconsumerid";
pub const VAR_FILEPATH: &str = "TPMfilepath";
pub const VAR_FILE_URLENCODED: &str = "TPMfileurlencoded";
pub const VAR_FILENAME: &str = "TPMfilename";
pub const VAR_COUNTER: &str = "TPMcounter";
pub const VAR_INSTRUCTOR: &str = "TPMinstructor";
pub const VAR_EXTRA: &str = "TPMextraargs";
pub const VAR_REMOTEFOLDER: &str = "TPMremotefolder";
pub const VAR_SERVERS: &str = "TPMservers";
pub const VAR_SSHKEY: &str = "TPMsshkey";
pub const VAR_SPECIAL_USER: &str = "TPMspecialuser";
pub const VAR_SPECIAL_FILE: &str = "TPMspecialfile";
pub const VAR_SPECIAL_CORRECTOR: &str = "TPMspecialcorrector";

/// Loads the helper script, or a stand-in that fails with a runner exception.
fn load_script() -> String {
    match Resources::get(SCRIPT_NAME) {
        Some(file) => match String::from_utf8(file.data.into_owned()) {
            Ok(script) => script,
            Err(_) => format!("echo ERROR READING SCRIPT; exit {}", ERROR_RUNNER_EXCEPTION),
        },
        None => format!("echo ERROR SCRIPT DOES NOT EXIST; exit {}", ERROR_RUNNER_EXCEPTION),
    }
}

/// Path of the private key file derived from a configuration file.
pub fn key_file_path(exe_data: &str) -> PathBuf {
    PathBuf::from(format!("{}.key", exe_data))
}

/// Writes the key, one line each, readable and writable by the owner only.
fn create_key_file(lines: &[String], path: &Path) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    for line in lines {
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
    }
    // The file may predate this configuration with wider permissions.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Parsed configuration plus the environment shared by every attempt.
struct Prepared {
    config: SshToolConfig,
    env: HashMap<&'static str, String>,
}

/// Runs a remote corrector over SSH through a helper shell script.
///
/// The script is fed to `sh` on stdin; everything it needs travels in
/// `TPM*` environment variables. The script picks the first reachable server
/// from `TPMservers`, copies the submission, runs the corrector and exits
/// with its outcome.
pub struct SshToolRunner {
    prepared: Option<Prepared>,
    pre_args: Vec<String>,
    script: String,
    working_dir: Option<PathBuf>,
    settings: RunnerSettings,
}

impl SshToolRunner {
    /// `exe_data` is the path of the serialized [`SshToolConfig`].
    pub fn init(exe_data: &str, restrictions: Option<&str>, settings: RunnerSettings) -> Self {
        let config_path = Path::new(exe_data);
        let working_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf);

        let prepared = match load_config::<SshToolConfig>(config_path) {
            Ok(config) => {
                let env = Self::default_env(&config, exe_data);
                Some(Prepared { config, env })
            }
            Err(e) => {
                error!("SshToolRunner: error reading configuration {}: {}", exe_data, e);
                None
            }
        };

        Self {
            prepared,
            pre_args: ExecutionRestrictions::parse(restrictions).pre_args,
            script: load_script(),
            working_dir,
            settings,
        }
    }

    /// Environment that does not depend on the attempt. Also materializes or
    /// removes the private key file.
    fn default_env(config: &SshToolConfig, exe_data: &str) -> HashMap<&'static str, String> {
        let mut env = HashMap::new();
        if let Some(corrector) = &config.corrector {
            env.insert(VAR_CORRECTOR, corrector.clone());
        }
        env.insert(
            VAR_REMOTEFOLDER,
            config
                .remote_folder
                .clone()
                .unwrap_or_else(|| DEFAULT_REMOTE_FOLDER.to_string()),
        );
        if let Some(user) = &config.special_user {
            env.insert(VAR_SPECIAL_USER, user.clone());
        }
        if let Some(file) = &config.special_file {
            env.insert(VAR_SPECIAL_FILE, file.clone());
        }
        if let Some(corrector) = &config.special_corrector {
            env.insert(VAR_SPECIAL_CORRECTOR, corrector.clone());
        }
        if !config.round_robin {
            env.insert(VAR_SERVERS, config.servers_line(0));
        }

        let key_path = key_file_path(exe_data);
        if config.private_key_lines.is_empty() {
            match std::fs::remove_file(&key_path) {
                Ok(()) => debug!("Removed stale key file {}", key_path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => error!("Error deleting old key file {}: {}", key_path.display(), e),
            }
        } else {
            match create_key_file(&config.private_key_lines, &key_path) {
                Ok(()) => {
                    env.insert(VAR_SSHKEY, key_path.to_string_lossy().into_owned());
                }
                Err(e) => error!("Error creating key file {}: {}", key_path.display(), e),
            }
        }
        env
    }

    /// Environment for one attempt.
    fn attempt_env(&self, prepared: &Prepared, submission: &Submission) -> HashMap<&'static str, String> {
        let mut env = prepared.env.clone();
        let file_name = submission
            .file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        env.insert(VAR_FILEPATH, submission.file_path.to_string_lossy().into_owned());
        env.insert(VAR_FILE_URLENCODED, form_encode(&file_name));
        env.insert(VAR_CONSUMERID, submission.consumer_id.clone());
        env.insert(VAR_FILENAME, submission.original_filename.clone());
        env.insert(VAR_COUNTER, submission.counter.to_string());
        env.insert(VAR_INSTRUCTOR, submission.is_instructor.to_string());
        env.insert(VAR_EXTRA, submission.extra_args.join(" "));
        if prepared.config.round_robin {
            env.insert(VAR_SERVERS, prepared.config.servers_line(submission.counter));
        }
        env
    }

    async fn run(&self, submission: &Submission) -> Result<Outcome> {
        let prepared = self
            .prepared
            .as_ref()
            .ok_or_else(|| RunnerError::NotInitialized("SSH configuration not loaded".to_string()))?;

        let mut args = self.pre_args.clone();
        args.push(BIN_NAME.to_string());

        let mut command = redirected_command(
            &args,
            &submission.output_path,
            &submission.error_path(&self.settings.error_suffix),
        )?;
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command.envs(self.attempt_env(prepared, submission));

        debug!(
            "SshToolRunner: attempt {} of {} on servers '{}'",
            submission.counter,
            submission.consumer_id,
            prepared.config.servers_line(submission.counter)
        );
        run_command(
            command,
            Some(&self.script),
            submission.deadline(),
            self.settings.kill_grace_period,
        )
        .await
    }
}

#[async_trait]
impl ToolRunner for SshToolRunner {
    async fn execute(&self, submission: &Submission) -> Outcome {
        settle("SshToolRunner", self.run(submission).await)
    }

    fn error_suffix(&self) -> &str {
        &self.settings.error_suffix
    }
}
