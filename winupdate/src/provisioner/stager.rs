//! Staging the payload on the target.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Payload;
use crate::cancellation::CancellationToken;
use crate::communicator::Communicator;
use crate::errors::{ConfigError, ProvisionError};
use crate::events::StatusSink;
use crate::retry::{run_with_retry, RetryError, RetryPolicy};

/// Prefix of every staged script name.
pub const STAGED_NAME_PREFIX: &str = "Invoke-WinUpdate";

/// Returns a fresh staging name.
///
/// Every call yields a different name, so concurrent workflows and retried
/// uploads never write to the same target.
#[must_use]
pub fn unique_stage_name() -> String {
    format!("{STAGED_NAME_PREFIX}-{}.ps1", Uuid::new_v4().simple())
}

/// Where a staged payload landed on the target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StagedLocation(String);

impl StagedLocation {
    /// Wraps a location returned by a communicator.
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    /// Returns the location as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the location is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the wrapper.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for StagedLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a successful staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// The location of the fully written payload.
    pub location: StagedLocation,
    /// Upload attempts made, including the successful one.
    pub attempts: u32,
}

/// Uploads the payload under the upload retry policy.
pub struct Stager {
    communicator: Arc<dyn Communicator>,
    policy: RetryPolicy,
    sink: Arc<dyn StatusSink>,
}

impl Stager {
    /// Creates a stager.
    pub fn new(
        communicator: Arc<dyn Communicator>,
        policy: RetryPolicy,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            communicator,
            policy,
            sink,
        }
    }

    /// Returns the upload policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Stages `payload` and returns where it landed.
    ///
    /// Each attempt uploads the full payload under a new unique name. A
    /// failed attempt's partial target is discarded on a best-effort basis.
    /// The location is returned as reported; the workflow rejects an empty
    /// one before leaving staging.
    pub async fn stage(
        &self,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<StageReport, ProvisionError> {
        if payload.is_empty() {
            return Err(ConfigError::single("update script payload is empty").into());
        }

        let digest = payload.sha256_hex();
        info!(
            bytes = payload.len(),
            sha256 = %digest,
            max_attempts = self.policy.effective_attempts(),
            "Staging update script"
        );
        self.sink.say("Uploading the Windows update script...");

        let outcome = run_with_retry("upload", &self.policy, cancel, |attempt| {
            let communicator = Arc::clone(&self.communicator);
            let sink = Arc::clone(&self.sink);
            let content = payload.clone();
            async move {
                let name = unique_stage_name();
                debug!(attempt, name = %name, "Uploading");
                match communicator.upload(&name, content.as_bytes()).await {
                    Ok(location) => Ok(location),
                    Err(err) => {
                        sink.error(&format!("Upload attempt {attempt} failed: {err}"));
                        if let Err(discard_err) = communicator.discard(&name).await {
                            warn!(name = %name, error = %discard_err, "Failed to discard partial upload");
                        }
                        Err(err)
                    }
                }
            }
        })
        .await
        .map_err(|err| match err {
            RetryError::Cancelled { phase, reason, .. } => ProvisionError::Cancelled { phase, reason },
            other => ProvisionError::Staging(other),
        })?;

        let location = StagedLocation::new(outcome.value);
        info!(location = %location, attempts = outcome.attempts, "Update script staged");
        Ok(StageReport {
            location,
            attempts: outcome.attempts,
        })
    }
}

impl std::fmt::Debug for Stager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stager")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::{CommunicatorError, MockCommunicator};
    use crate::events::{CollectingStatusSink, NoOpStatusSink, StatusKind};
    use mockall::Sequence;
    use std::time::Duration;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_secs(60)).with_delay(Duration::from_millis(10))
    }

    #[test]
    fn test_unique_stage_names() {
        let a = unique_stage_name();
        let b = unique_stage_name();
        assert_ne!(a, b);
        assert!(a.starts_with("Invoke-WinUpdate-"));
        assert!(a.ends_with(".ps1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_first_try() {
        let mut mock = MockCommunicator::new();
        mock.expect_upload()
            .withf(|name, content| name.starts_with(STAGED_NAME_PREFIX) && content == b"script")
            .times(1)
            .returning(|name, _| Ok(format!("C:\\Windows\\Temp\\{name}")));

        let stager = Stager::new(Arc::new(mock), policy(3), Arc::new(NoOpStatusSink));
        let report = stager
            .stage(&Payload::from("script"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.attempts, 1);
        assert!(report.location.as_str().starts_with("C:\\Windows\\Temp\\Invoke-WinUpdate-"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_retries_with_fresh_names_and_discards() {
        let mut mock = MockCommunicator::new();
        let mut seq = Sequence::new();
        mock.expect_upload()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(CommunicatorError::Transport("reset".to_string())));
        mock.expect_upload()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name, _| Ok(name.to_string()));
        mock.expect_discard().times(2).returning(|_| Ok(()));

        let sink = Arc::new(CollectingStatusSink::new());
        let stager = Stager::new(Arc::new(mock), policy(5), sink.clone());
        let report = stager
            .stage(&Payload::from("script"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.attempts, 3);
        assert_eq!(sink.texts(StatusKind::Error).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_exhausted() {
        let mut mock = MockCommunicator::new();
        mock.expect_upload()
            .times(2)
            .returning(|_, _| Err(CommunicatorError::Transport("refused".to_string())));
        mock.expect_discard()
            .returning(|_| Err(CommunicatorError::Transport("gone".to_string())));

        let stager = Stager::new(Arc::new(mock), policy(2), Arc::new(NoOpStatusSink));
        let err = stager
            .stage(&Payload::from("script"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Staging(_)));
        assert_eq!(err.attempts(), Some(2));
        assert!(err.to_string().contains("refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_payload_is_config_error() {
        let mock = MockCommunicator::new();
        let stager = Stager::new(Arc::new(mock), policy(3), Arc::new(NoOpStatusSink));

        let err = stager
            .stage(&Payload::new(Vec::new()), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_config());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_location_is_passed_through() {
        let mut mock = MockCommunicator::new();
        mock.expect_upload().times(1).returning(|_, _| Ok(String::new()));

        let stager = Stager::new(Arc::new(mock), policy(3), Arc::new(NoOpStatusSink));
        let report = stager
            .stage(&Payload::from("script"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.location.is_empty());
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_upload() {
        let mock = MockCommunicator::new();
        let cancel = CancellationToken::new();
        cancel.cancel("build aborted");

        let stager = Stager::new(Arc::new(mock), policy(3), Arc::new(NoOpStatusSink));
        let err = stager.stage(&Payload::from("script"), &cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(err.to_string().contains("build aborted"));
    }
}
