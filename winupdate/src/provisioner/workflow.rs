//! The provisioning state machine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::config::PreparedConfig;
use super::{ExecutionReport, ExitOutcome, Executor, Payload, StageReport, StagedLocation, Stager};
use crate::cancellation::CancellationToken;
use crate::communicator::Communicator;
use crate::errors::ProvisionError;
use crate::events::{NoOpStatusSink, StatusSink};

/// A state of one provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Nothing has happened yet.
    Start,
    /// The payload is being uploaded.
    Staging,
    /// The payload is on the target.
    Staged,
    /// The script is running.
    Executing,
    /// The run finished with an accepted exit code.
    Done,
    /// The run failed.
    Failed,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::Start
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Staging => write!(f, "staging"),
            Self::Staged => write!(f, "staged"),
            Self::Executing => write!(f, "executing"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl WorkflowState {
    /// Returns true if no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if `next` may follow this state.
    ///
    /// Transitions only move forward; `Failed` is reachable from every
    /// non-terminal state.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Done | Self::Failed, _) => false,
            (_, Self::Failed) => true,
            (Self::Start, Self::Staging)
            | (Self::Staging, Self::Staged)
            | (Self::Staged, Self::Executing)
            | (Self::Executing, Self::Done) => true,
            _ => false,
        }
    }
}

/// Outcome of a successful provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// The last exit code returned by the update script.
    pub final_exit_code: u32,
    /// Its classification.
    pub classification: ExitOutcome,
    /// Upload attempts used.
    pub upload_attempts: u32,
    /// Script runs used.
    pub update_attempts: u32,
    /// Where the script was staged.
    pub location: StagedLocation,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// How long the run took.
    pub duration: Duration,
    /// States visited, in order.
    pub states: Vec<WorkflowState>,
}

impl WorkflowResult {
    /// Returns true if the target needs a restart before it is usable.
    ///
    /// The run never restarts the target itself.
    #[must_use]
    pub fn restart_pending(&self) -> bool {
        self.classification.restart_pending()
    }
}

/// Records the state path of one run and reports each transition.
struct StateTracker<'a> {
    current: WorkflowState,
    visited: Vec<WorkflowState>,
    sink: &'a dyn StatusSink,
}

impl<'a> StateTracker<'a> {
    fn new(sink: &'a dyn StatusSink) -> Self {
        Self {
            current: WorkflowState::Start,
            visited: vec![WorkflowState::Start],
            sink,
        }
    }

    fn advance(&mut self, next: WorkflowState) {
        debug_assert!(
            self.current.can_transition_to(next),
            "invalid transition {} -> {next}",
            self.current
        );
        info!(from = %self.current, to = %next, "Workflow state changed");
        self.sink.event(
            "provision.state",
            Some(serde_json::json!({
                "from": self.current,
                "to": next,
            })),
        );
        self.current = next;
        self.visited.push(next);
    }

    fn fail(&mut self, err: ProvisionError) -> ProvisionError {
        error!(state = %self.current, error = %err, "Provisioning failed");
        self.sink.error(&err.to_string());
        self.advance(WorkflowState::Failed);
        err
    }
}

/// Runs the Windows update workflow against one target.
///
/// A provisioner holds only immutable configuration, so one instance may
/// drive any number of concurrent runs.
pub struct Provisioner {
    config: PreparedConfig,
    communicator: Arc<dyn Communicator>,
    sink: Arc<dyn StatusSink>,
}

impl Provisioner {
    /// Creates a provisioner that reports to no one.
    pub fn new(config: PreparedConfig, communicator: Arc<dyn Communicator>) -> Self {
        Self {
            config,
            communicator,
            sink: Arc::new(NoOpStatusSink),
        }
    }

    /// Sets the status sink.
    #[must_use]
    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the prepared configuration.
    #[must_use]
    pub fn config(&self) -> &PreparedConfig {
        &self.config
    }

    /// Stages `payload` and runs it.
    ///
    /// Exactly one staging pass and one execution pass are made; each is
    /// retried internally under its own policy. A restart-pending exit code
    /// ends the run in `Done` and is reported through
    /// [`WorkflowResult::restart_pending`].
    pub async fn provision(
        &self,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<WorkflowResult, ProvisionError> {
        let started_at = Utc::now();
        let clock = tokio::time::Instant::now();
        let mut tracker = StateTracker::new(self.sink.as_ref());

        let (staged, report) = self.drive(&mut tracker, payload, cancel).await?;
        let result = WorkflowResult {
            final_exit_code: report.exit_code,
            classification: report.outcome,
            upload_attempts: staged.attempts,
            update_attempts: report.attempts,
            location: staged.location,
            started_at,
            duration: clock.elapsed(),
            states: tracker.visited,
        };
        info!(
            exit_code = result.final_exit_code,
            classification = %result.classification,
            restart_pending = result.restart_pending(),
            duration_ms = u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
            "Provisioning finished"
        );
        Ok(result)
    }

    async fn drive(
        &self,
        tracker: &mut StateTracker<'_>,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<(StageReport, ExecutionReport), ProvisionError> {
        tracker.advance(WorkflowState::Staging);
        let stager = Stager::new(
            Arc::clone(&self.communicator),
            self.config.upload_policy.clone(),
            Arc::clone(&self.sink),
        );
        let staged = match stager.stage(payload, cancel).await {
            Ok(staged) => staged,
            Err(err) => return Err(tracker.fail(err)),
        };

        if staged.location.is_empty() {
            return Err(tracker.fail(ProvisionError::EmptyLocation));
        }
        tracker.advance(WorkflowState::Staged);

        tracker.advance(WorkflowState::Executing);
        let executor = Executor::new(
            Arc::clone(&self.communicator),
            self.config.update_policy.clone(),
            Arc::clone(&self.sink),
        )
        .with_selection(self.config.selection.clone())
        .with_credentials(self.config.credentials.clone());
        let report = match executor.execute(&staged.location, cancel).await {
            Ok(report) => report,
            Err(err) => return Err(tracker.fail(err)),
        };

        if report.outcome.restart_pending() {
            warn!(
                exit_code = report.exit_code,
                restart_disabled = self.config.disable_restart,
                "Updates installed; restart pending"
            );
            self.sink.say("Updates installed; the machine needs a restart");
        }

        tracker.advance(WorkflowState::Done);
        Ok((staged, report))
    }
}

impl fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provisioner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
