//! Error types for the provisioning workflow.
//!
//! The taxonomy separates configuration problems (never retried),
//! exhausted retry budgets for staging and execution, cancellation, and
//! internal contract violations so callers can tell a broken environment
//! from a broken invariant.

use thiserror::Error;

use crate::communicator::CommunicatorError;
use crate::provisioner::ExecutionAttemptError;
use crate::retry::RetryError;

/// The main error type for provisioning operations.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The configuration or the payload is unusable.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Staging the payload failed after its retry budget was spent.
    #[error("{0}")]
    Staging(#[from] RetryError<CommunicatorError>),

    /// Staging reported success but produced no location.
    #[error("staging reported success but produced an empty location")]
    EmptyLocation,

    /// The update script never finished with an accepted exit code.
    #[error("{source}")]
    Execution {
        /// The last exit code observed, if any attempt completed.
        exit_code: Option<u32>,
        /// The exhausted retry budget with the last attempt error.
        #[source]
        source: RetryError<ExecutionAttemptError>,
    },

    /// The workflow was cancelled from outside.
    #[error("{phase} cancelled: {reason}")]
    Cancelled {
        /// The phase that observed the cancellation.
        phase: &'static str,
        /// The cancellation reason.
        reason: String,
    },
}

impl ProvisionError {
    /// Returns true for configuration errors raised before remote activity.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true when an internal invariant was broken.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::EmptyLocation)
    }

    /// Returns true when a retry budget ran out of wall-clock time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Staging(err) => err.is_timeout(),
            Self::Execution { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Returns true when the workflow was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns the definitive exit code carried by the error, if any.
    #[must_use]
    pub fn exit_code(&self) -> Option<u32> {
        match self {
            Self::Execution { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Returns the number of attempts spent by a retried phase.
    #[must_use]
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Staging(err) => Some(err.attempts()),
            Self::Execution { source, .. } => Some(source.attempts()),
            _ => None,
        }
    }
}

/// Error raised when the configuration or payload cannot be used.
///
/// Problems are accumulated so that every issue is reported at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("invalid configuration: {}", problems.join("; "))]
pub struct ConfigError {
    /// Individual problems found.
    pub problems: Vec<String>,
}

impl ConfigError {
    /// Creates an empty error accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an error with a single problem.
    #[must_use]
    pub fn single(problem: impl Into<String>) -> Self {
        Self {
            problems: vec![problem.into()],
        }
    }

    /// Records a problem.
    pub fn push(&mut self, problem: impl Into<String>) {
        self.problems.push(problem.into());
    }

    /// Returns true if no problems were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Converts the accumulator into a result.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_error_accumulates() {
        let mut err = ConfigError::new();
        assert!(err.is_empty());

        err.push("first");
        err.push("second");

        let message = err.to_string();
        assert_eq!(message, "invalid configuration: first; second");
        assert!(err.into_result().is_err());
    }

    #[test]
    fn test_empty_config_error_is_ok() {
        assert!(ConfigError::new().into_result().is_ok());
    }

    #[test]
    fn test_error_identities_are_distinct() {
        let config = ProvisionError::from(ConfigError::single("payload is empty"));
        assert!(config.is_config());
        assert!(!config.is_contract_violation());

        let contract = ProvisionError::EmptyLocation;
        assert!(contract.is_contract_violation());
        assert!(!contract.is_config());

        let staging = ProvisionError::Staging(RetryError::Exhausted {
            phase: "upload",
            attempts: 5,
            last: CommunicatorError::Transport("connection reset".to_string()),
        });
        assert!(!staging.is_config());
        assert!(!staging.is_contract_violation());
        assert_eq!(staging.attempts(), Some(5));
    }

    #[test]
    fn test_execution_error_exposes_exit_code() {
        let err = ProvisionError::Execution {
            exit_code: Some(5),
            source: RetryError::Exhausted {
                phase: "update",
                attempts: 3,
                last: ExecutionAttemptError::ExitCode { exit_code: 5 },
            },
        };

        assert_eq!(err.exit_code(), Some(5));
        assert!(err.to_string().contains("after 3 attempt(s)"));
        assert!(err.to_string().contains("exit status: 5"));
    }

    #[test]
    fn test_timeout_detection() {
        let err = ProvisionError::Staging(RetryError::TimedOut {
            phase: "upload",
            attempts: 2,
            elapsed: Duration::from_millis(200),
            last: Some(CommunicatorError::Transport("refused".to_string())),
        });

        assert!(err.is_timeout());
        assert!(!err.is_cancelled());
    }
}
