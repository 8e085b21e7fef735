//! A cancellation flag that async code can wait on.

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// Requests a provisioning run to stop.
///
/// The first recorded reason is the only one kept; later calls to
/// [`cancel`](Self::cancel) are ignored.
#[derive(Default)]
pub struct CancellationToken {
    reason: OnceLock<String>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels with `reason` and wakes every waiter.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let first = self.reason.get().is_none() && self.reason.set(reason.clone()).is_ok();
        if first {
            debug!(reason = %reason, "Cancellation requested");
            self.notify.notify_waiters();
        }
    }

    /// Cancels the token once `delay` has elapsed.
    ///
    /// Aborting the returned handle disarms the deadline.
    pub fn cancel_after(self: &Arc<Self>, delay: Duration) -> JoinHandle<()> {
        let token = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            token.cancel(format!("deadline of {delay:?} elapsed"));
        })
    }

    /// Returns true once a reason has been recorded.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.reason.get().is_some()
    }

    /// Returns the recorded reason.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.get().cloned()
    }

    /// Completes once the token is cancelled.
    pub async fn cancelled(&self) {
        // Created before the check so a cancel in between still wakes us.
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CancellationToken")
            .field(&self.reason.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), None);
    }

    #[test]
    fn test_first_reason_is_kept() {
        let token = CancellationToken::new();
        token.cancel("packer build interrupted");
        token.cancel("second caller");

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("packer build interrupted"));
        assert!(format!("{token:?}").contains("interrupted"));
    }

    #[tokio::test]
    async fn test_wait_after_cancel_completes() {
        let token = CancellationToken::new();
        token.cancel("done");

        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_waiting_task_is_woken() {
        let token = Arc::new(CancellationToken::new());
        let waiter = tokio::spawn({
            let token = Arc::clone(&token);
            async move { token.cancelled().await }
        });

        tokio::task::yield_now().await;
        token.cancel("stop");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels() {
        let token = Arc::new(CancellationToken::new());
        let deadline = token.cancel_after(Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(!token.is_cancelled());

        deadline.await.unwrap();
        assert!(token.reason().unwrap().contains("deadline"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_deadline_never_fires() {
        let token = Arc::new(CancellationToken::new());
        token.cancel_after(Duration::from_secs(5)).abort();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!token.is_cancelled());
    }
}
