//! The remote channel used to stage files and run commands.
//!
//! The workflow only consumes this contract; transports (WinRM, SSH, a
//! local shell) live behind the [`Communicator`] trait.

mod local;

pub use local::LocalCommunicator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a communicator.
#[derive(Debug, Error)]
pub enum CommunicatorError {
    /// The upload was refused or interrupted.
    #[error("upload of '{name}' failed: {reason}")]
    Upload {
        /// The staging target name.
        name: String,
        /// Why the upload failed.
        reason: String,
    },

    /// A local I/O operation failed.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The command terminated without reporting an exit status.
    #[error("remote command terminated without an exit status")]
    NoExitStatus,

    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}

impl CommunicatorError {
    /// Creates an I/O error with context.
    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Credentials used to run a command with elevated rights.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// The account name.
    pub username: String,
    /// The account password.
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A command to run on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    /// The full command line.
    pub command: String,
    /// Credentials to run the command as, if any.
    pub credentials: Option<Credentials>,
}

impl RemoteCommand {
    /// Creates a command run with the communicator's own identity.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            credentials: None,
        }
    }

    /// Sets the credentials to run the command as.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }
}

/// The captured result of a finished command.
///
/// Stdout and stderr are kept in separate buffers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Bytes written to stdout.
    pub stdout: Vec<u8>,
    /// Bytes written to stderr.
    pub stderr: Vec<u8>,
    /// The process exit code.
    pub exit_code: u32,
}

impl CommandOutput {
    /// Creates an output with only an exit code.
    #[must_use]
    pub fn with_exit_code(exit_code: u32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    /// Returns stdout as lossy UTF-8.
    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Returns stderr as lossy UTF-8.
    #[must_use]
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Capabilities the workflow needs from the target machine.
///
/// Implementations must allow only one command in flight at a time per
/// workflow; the workflow never issues a second command before the first
/// has returned.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Writes `content` to a new staging target called `name`.
    ///
    /// Returns the location of the written target. The content must be
    /// fully written and finalized when this returns `Ok`; a failed upload
    /// must be safe to retry with a different name.
    async fn upload(&self, name: &str, content: &[u8]) -> Result<String, CommunicatorError>;

    /// Removes a staging target left behind by a failed upload.
    async fn discard(&self, name: &str) -> Result<(), CommunicatorError> {
        let _ = name;
        Ok(())
    }

    /// Runs a command and blocks until it terminates.
    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, CommunicatorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials {
            username: "Administrator".to_string(),
            password: Some("hunter2".to_string()),
        };

        let debug = format!("{credentials:?}");
        assert!(debug.contains("Administrator"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_command_output_lossy() {
        let output = CommandOutput {
            stdout: b"installed 3 updates".to_vec(),
            stderr: b"warning".to_vec(),
            exit_code: 0,
        };

        assert_eq!(output.stdout_lossy(), "installed 3 updates");
        assert_eq!(output.stderr_lossy(), "warning");
    }

    #[test]
    fn test_remote_command_builder() {
        let command = RemoteCommand::new("whoami").with_credentials(Some(Credentials {
            username: "builder".to_string(),
            password: None,
        }));

        assert_eq!(command.command, "whoami");
        assert_eq!(command.credentials.unwrap().username, "builder");
    }
}
