//! Cooperative run cancellation

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tokio::sync::Notify;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The host asked the run to stop
    Requested,
    /// A case failed while stop-on-fail is enabled
    StopOnFail,
    /// An event subscriber asked the run to stop
    Subscriber,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => write!(f, "stop requested"),
            CancelReason::StopOnFail => write!(f, "stop on first failure"),
            CancelReason::Subscriber => write!(f, "stop requested by subscriber"),
        }
    }
}

/// Shared stop signal for one run, polled at slot acquisition and between
/// children. Running test bodies are never interrupted.
#[derive(Debug, Default)]
pub struct CancellationHandle {
    cancelled: AtomicBool,
    reason: OnceLock<CancelReason>,
    notify: Notify,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation; returns true for the call that flipped the flag
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
        if first {
            info!("Run cancelled: {}", reason);
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Reason given by the first cancel call
    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// Resolves once the run is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let handle = CancellationHandle::new();
        assert!(!handle.is_cancelled());
        assert!(handle.cancel(CancelReason::StopOnFail));
        assert!(!handle.cancel(CancelReason::Requested));

        assert!(handle.is_cancelled());
        assert_eq!(handle.reason(), Some(CancelReason::StopOnFail));
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let handle = Arc::new(CancellationHandle::new());
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel(CancelReason::Requested);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let handle = CancellationHandle::new();
        handle.cancel(CancelReason::Requested);
        tokio::time::timeout(Duration::from_millis(100), handle.cancelled())
            .await
            .unwrap();
    }
}
