//! Running the staged script and classifying its exit code.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::{InvocationBuilder, StagedLocation, UpdateSelection};
use crate::cancellation::CancellationToken;
use crate::communicator::{Communicator, CommunicatorError, Credentials};
use crate::errors::ProvisionError;
use crate::events::StatusSink;
use crate::retry::{run_with_retry, RetryError, RetryPolicy};

/// The script finished and nothing else is needed.
pub const EXIT_SUCCESS: u32 = 0;

/// The script finished and the target needs a restart.
pub const EXIT_RESTART_PENDING: u32 = 101;

/// `ERROR_SUCCESS_REBOOT_REQUIRED` as an HRESULT: the installer finished
/// and the target needs a restart.
pub const EXIT_SUCCESS_REBOOT_REQUIRED: u32 = 2_147_942_501;

/// How an exit code is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitOutcome {
    /// Finished, no restart required.
    Success,
    /// Finished, restart pending.
    SuccessRestartPending,
    /// Any other exit code.
    Failure(u32),
}

impl ExitOutcome {
    /// Classifies a raw exit code.
    #[must_use]
    pub fn classify(exit_code: u32) -> Self {
        match exit_code {
            EXIT_SUCCESS => Self::Success,
            EXIT_RESTART_PENDING | EXIT_SUCCESS_REBOOT_REQUIRED => Self::SuccessRestartPending,
            other => Self::Failure(other),
        }
    }

    /// Returns true for the accepted exit codes.
    #[must_use]
    pub fn is_success(self) -> bool {
        !matches!(self, Self::Failure(_))
    }

    /// Returns true if another attempt may be made.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !self.is_success()
    }

    /// Returns true if the target needs a restart.
    #[must_use]
    pub fn restart_pending(self) -> bool {
        matches!(self, Self::SuccessRestartPending)
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::SuccessRestartPending => write!(f, "success (restart pending)"),
            Self::Failure(code) => write!(f, "failure (exit status {code})"),
        }
    }
}

/// Why a single execution attempt did not succeed.
#[derive(Debug, Error)]
pub enum ExecutionAttemptError {
    /// The script ran and returned an unaccepted exit code.
    #[error("update script exited with non-zero exit status: {exit_code}")]
    ExitCode {
        /// The returned exit code.
        exit_code: u32,
    },

    /// The command could not be run.
    #[error(transparent)]
    Transport(#[from] CommunicatorError),
}

/// Result of a successful execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// The accepted exit code.
    pub exit_code: u32,
    /// Its classification.
    pub outcome: ExitOutcome,
    /// Runs made, including the successful one.
    pub attempts: u32,
    /// Stdout of the successful run.
    pub stdout: String,
    /// Stderr of the successful run.
    pub stderr: String,
}

/// Runs the staged script under the update retry policy.
pub struct Executor {
    communicator: Arc<dyn Communicator>,
    policy: RetryPolicy,
    selection: UpdateSelection,
    credentials: Option<Credentials>,
    sink: Arc<dyn StatusSink>,
}

impl Executor {
    /// Creates an executor.
    pub fn new(
        communicator: Arc<dyn Communicator>,
        policy: RetryPolicy,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            communicator,
            policy,
            selection: UpdateSelection::default(),
            credentials: None,
            sink,
        }
    }

    /// Sets which updates the script installs.
    #[must_use]
    pub fn with_selection(mut self, selection: UpdateSelection) -> Self {
        self.selection = selection;
        self
    }

    /// Sets the credentials the script runs as.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Runs the script at `location` until an accepted exit code is seen.
    ///
    /// The same command is reissued on every attempt. A run that fails
    /// without an exit code is retried like an unaccepted exit code. On
    /// failure the error carries the last exit code any attempt returned,
    /// even if later attempts never got that far.
    pub async fn execute(
        &self,
        location: &StagedLocation,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ProvisionError> {
        if location.is_empty() {
            return Err(ProvisionError::EmptyLocation);
        }

        let command = InvocationBuilder::for_selection(location.as_str(), &self.selection)
            .build(self.credentials.clone());

        info!(
            location = %location,
            max_attempts = self.policy.effective_attempts(),
            elevated = command.credentials.is_some(),
            "Running update script"
        );
        self.sink.say("Running Windows update...");

        let last_exit_code = Arc::new(Mutex::new(None));
        let outcome = run_with_retry("update", &self.policy, cancel, |attempt| {
            let communicator = Arc::clone(&self.communicator);
            let sink = Arc::clone(&self.sink);
            let last_exit_code = Arc::clone(&last_exit_code);
            let command = command.clone();
            async move {
                let output = communicator.run(&command).await.map_err(|err| {
                    sink.error(&format!("Update attempt {attempt} failed: {err}"));
                    ExecutionAttemptError::from(err)
                })?;

                let stdout = output.stdout_lossy();
                let stderr = output.stderr_lossy();
                stdout.lines().for_each(|line| sink.message(line));
                stderr.lines().for_each(|line| sink.error(line));
                *last_exit_code.lock() = Some(output.exit_code);

                let outcome = ExitOutcome::classify(output.exit_code);
                if outcome.is_retryable() {
                    warn!(attempt, exit_code = output.exit_code, "Update script failed");
                    return Err(ExecutionAttemptError::ExitCode {
                        exit_code: output.exit_code,
                    });
                }

                Ok(ExecutionReport {
                    exit_code: output.exit_code,
                    outcome,
                    attempts: attempt,
                    stdout,
                    stderr,
                })
            }
        })
        .await
        .map_err(|err| match err {
            RetryError::Cancelled { phase, reason, .. } => ProvisionError::Cancelled { phase, reason },
            other => ProvisionError::Execution {
                exit_code: *last_exit_code.lock(),
                source: other,
            },
        })?;

        let report = outcome.value;
        info!(
            exit_code = report.exit_code,
            outcome = %report.outcome,
            attempts = report.attempts,
            "Update script finished"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("policy", &self.policy)
            .field("selection", &self.selection)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}
