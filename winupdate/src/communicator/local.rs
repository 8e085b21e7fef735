//! A communicator that targets the local machine.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{CommandOutput, Communicator, CommunicatorError, RemoteCommand};

/// Stages files in a local directory and runs commands through the local shell.
///
/// Staged files are created exclusively, so a name that already exists is an
/// upload failure rather than an overwrite.
#[derive(Debug, Clone)]
pub struct LocalCommunicator {
    staging_dir: PathBuf,
}

impl Default for LocalCommunicator {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir(),
        }
    }
}

impl LocalCommunicator {
    /// Creates a communicator staging into the OS temp directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a communicator staging into `dir`.
    #[must_use]
    pub fn with_staging_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: dir.into(),
        }
    }

    /// Returns the staging directory.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

fn write_staged(dir: &Path, name: &str, content: &[u8]) -> Result<String, CommunicatorError> {
    let (prefix, suffix) = split_name(name);

    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .rand_bytes(0)
        .tempfile_in(dir)
        .map_err(|e| CommunicatorError::io(format!("creating {name}"), e))?;

    file.write_all(content)
        .map_err(|e| CommunicatorError::io(format!("writing {name}"), e))?;
    file.flush()
        .map_err(|e| CommunicatorError::io(format!("flushing {name}"), e))?;
    file.as_file()
        .sync_all()
        .map_err(|e| CommunicatorError::io(format!("syncing {name}"), e))?;

    let (_, path) = file
        .keep()
        .map_err(|e| CommunicatorError::io(format!("finalizing {name}"), e.error))?;

    Ok(path.to_string_lossy().into_owned())
}

#[cfg(windows)]
fn shell() -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C");
    cmd
}

#[cfg(not(windows))]
fn shell() -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c");
    cmd
}

#[async_trait]
impl Communicator for LocalCommunicator {
    async fn upload(&self, name: &str, content: &[u8]) -> Result<String, CommunicatorError> {
        let dir = self.staging_dir.clone();
        let owned_name = name.to_string();
        let content = content.to_vec();

        let location = tokio::task::spawn_blocking(move || write_staged(&dir, &owned_name, &content))
            .await
            .map_err(|e| CommunicatorError::Upload {
                name: name.to_string(),
                reason: format!("staging task failed: {e}"),
            })??;

        debug!(location = %location, "Staged file locally");
        Ok(location)
    }

    async fn discard(&self, name: &str) -> Result<(), CommunicatorError> {
        let path = self.staging_dir.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CommunicatorError::io(format!("removing {}", path.display()), e)),
        }
    }

    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, CommunicatorError> {
        if let Some(credentials) = &command.credentials {
            warn!(
                username = %credentials.username,
                "Local commands run as the current user; credentials are ignored"
            );
        }

        let output = shell()
            .arg(&command.command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CommunicatorError::io("starting local command", e))?;

        let code = output.status.code().ok_or(CommunicatorError::NoExitStatus)?;

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: u32::from_ne_bytes(code.to_ne_bytes()),
        })
    }
}
