//! Failure aggregation
//!
//! [`ExceptionAggregator`] runs work and records its errors and panics instead
//! of propagating them, so one failing operation never stops its siblings.
//! Cleanup failures are kept apart so they cannot mask earlier failures.

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::models::{FailureInfo, FailureKind};

/// One captured failure; the original error value is shared, not re-rendered
#[derive(Clone)]
pub struct CapturedFailure {
    kind: FailureKind,
    error: Arc<anyhow::Error>,
}

impl CapturedFailure {
    pub fn error(err: anyhow::Error) -> Self {
        Self {
            kind: FailureKind::Error,
            error: Arc::new(err),
        }
    }

    pub fn panic(payload: Box<dyn Any + Send>) -> Self {
        Self {
            kind: FailureKind::Panic,
            error: Arc::new(anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref()))),
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.error
    }

    pub fn info(&self) -> FailureInfo {
        FailureInfo {
            kind: self.kind,
            message: format!("{:#}", self.error),
            chain: self.error.chain().map(|e| e.to_string()).collect(),
        }
    }
}

impl fmt::Debug for CapturedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedFailure")
            .field("kind", &self.kind)
            .field("error", &format_args!("{:#}", self.error))
            .finish()
    }
}

impl fmt::Display for CapturedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

/// All failures of one aggregator, in capture order
#[derive(Clone, Debug, Error)]
#[error("{} failure(s): {}", .failures.len(), join_messages(.failures))]
pub struct AggregateFailure {
    pub failures: Vec<CapturedFailure>,
}

fn join_messages(failures: &[CapturedFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Default)]
struct Captured {
    failures: Mutex<Vec<CapturedFailure>>,
    cleanup: Mutex<Vec<CapturedFailure>>,
    failure_count: AtomicUsize,
    cleanup_count: AtomicUsize,
}

/// Thread-safe failure collector; clones share the same storage
#[derive(Clone, Default)]
pub struct ExceptionAggregator {
    inner: Arc<Captured>,
}

impl ExceptionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent aggregator for one child unit
    pub fn child(&self) -> Self {
        Self::new()
    }

    /// Run synchronous work, capturing an error or panic
    pub fn run<T>(&self, work: impl FnOnce() -> anyhow::Result<T>) -> Option<T> {
        match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                self.add(err);
                None
            }
            Err(payload) => {
                self.record(CapturedFailure::panic(payload));
                None
            }
        }
    }

    /// Run asynchronous work, capturing an error or panic
    pub async fn run_async<T, Fut>(&self, work: Fut) -> Option<T>
    where
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                self.add(err);
                None
            }
            Err(payload) => {
                self.record(CapturedFailure::panic(payload));
                None
            }
        }
    }

    /// Run cleanup work; failures land in the cleanup set
    pub fn run_cleanup(&self, work: impl FnOnce() -> anyhow::Result<()>) {
        match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.add_cleanup(err),
            Err(payload) => self.record_cleanup(CapturedFailure::panic(payload)),
        }
    }

    pub async fn run_cleanup_async<Fut>(&self, work: Fut)
    where
        Fut: Future<Output = anyhow::Result<()>>,
    {
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.add_cleanup(err),
            Err(payload) => self.record_cleanup(CapturedFailure::panic(payload)),
        }
    }

    pub fn add(&self, err: anyhow::Error) {
        self.record(CapturedFailure::error(err));
    }

    pub fn add_cleanup(&self, err: anyhow::Error) {
        self.record_cleanup(CapturedFailure::error(err));
    }

    pub fn record(&self, failure: CapturedFailure) {
        let mut failures = lock(&self.inner.failures);
        failures.push(failure);
        self.inner.failure_count.store(failures.len(), Ordering::Release);
    }

    pub fn record_cleanup(&self, failure: CapturedFailure) {
        let mut cleanup = lock(&self.inner.cleanup);
        cleanup.push(failure);
        self.inner.cleanup_count.store(cleanup.len(), Ordering::Release);
    }

    pub fn has_errors(&self) -> bool {
        self.inner.failure_count.load(Ordering::Acquire) > 0
    }

    pub fn has_cleanup_errors(&self) -> bool {
        self.inner.cleanup_count.load(Ordering::Acquire) > 0
    }

    pub fn count(&self) -> usize {
        self.inner.failure_count.load(Ordering::Acquire)
    }

    pub fn failures(&self) -> Vec<CapturedFailure> {
        lock(&self.inner.failures).clone()
    }

    pub fn cleanup_failures(&self) -> Vec<CapturedFailure> {
        lock(&self.inner.cleanup).clone()
    }

    /// Failures followed by cleanup failures, or `None` when nothing failed
    pub fn to_aggregate_failure(&self) -> Option<AggregateFailure> {
        let mut failures = self.failures();
        failures.extend(self.cleanup_failures());
        (!failures.is_empty()).then_some(AggregateFailure { failures })
    }

    pub fn clear(&self) {
        let mut failures = lock(&self.inner.failures);
        let mut cleanup = lock(&self.inner.cleanup);
        failures.clear();
        cleanup.clear();
        self.inner.failure_count.store(0, Ordering::Release);
        self.inner.cleanup_count.store(0, Ordering::Release);
    }
}

impl fmt::Debug for ExceptionAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionAggregator")
            .field("failures", &self.count())
            .field("cleanup_failures", &self.inner.cleanup_count.load(Ordering::Acquire))
            .finish()
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
