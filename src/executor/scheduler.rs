//! Parallelization scheduler
//!
//! Owns the execution slots and decides at which level of the hierarchy a slot
//! is taken. Slots are handed out in FIFO order by a fair semaphore.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::cancellation::CancellationHandle;
use crate::config::{MaxParallelThreads, ParallelAlgorithm, ResolvedConfiguration};

/// Hierarchy level asking for admission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotLevel {
    Collection,
    TestCase,
}

/// Held for as long as the admitted unit runs
#[derive(Debug)]
pub struct SlotPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

#[derive(Debug)]
pub enum Admission {
    Granted(SlotPermit),
    /// The run is cancelled; go straight to cleanup
    Cancelled,
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted(_))
    }
}

/// Slot accounting for one run
#[derive(Debug)]
pub struct ParallelizationScheduler {
    algorithm: ParallelAlgorithm,
    limit: MaxParallelThreads,
    semaphore: Option<Arc<Semaphore>>,
    parallelize_collections: bool,
}

impl ParallelizationScheduler {
    pub fn new(limit: MaxParallelThreads, algorithm: ParallelAlgorithm) -> Self {
        let semaphore = limit.slots().map(|n| Arc::new(Semaphore::new(n)));
        Self {
            algorithm,
            limit,
            semaphore,
            parallelize_collections: true,
        }
    }

    pub fn from_config(config: &ResolvedConfiguration) -> Self {
        Self::new(config.max_parallel_threads, config.parallel_algorithm)
            .parallelize_collections(config.parallelize_test_collections)
    }

    pub fn parallelize_collections(mut self, enabled: bool) -> Self {
        self.parallelize_collections = enabled;
        self
    }

    pub fn algorithm(&self) -> ParallelAlgorithm {
        self.algorithm
    }

    pub fn limit(&self) -> MaxParallelThreads {
        self.limit
    }

    pub fn collections_in_parallel(&self) -> bool {
        self.parallelize_collections
    }

    /// Free slots right now; `None` when unlimited
    pub fn available_slots(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Level at which the active algorithm takes a slot
    pub fn slot_level(&self) -> SlotLevel {
        match self.algorithm {
            ParallelAlgorithm::Conservative => SlotLevel::Collection,
            ParallelAlgorithm::Aggressive => SlotLevel::TestCase,
        }
    }

    /// Admit a unit at `level`. Levels that do not own slots under the active
    /// algorithm are admitted without waiting, unless the run is cancelled.
    pub async fn acquire(&self, level: SlotLevel, cancel: &CancellationHandle) -> Admission {
        if cancel.is_cancelled() {
            return Admission::Cancelled;
        }

        let semaphore = match &self.semaphore {
            Some(semaphore) if level == self.slot_level() => semaphore.clone(),
            _ => return Admission::Granted(SlotPermit { _permit: None }),
        };

        debug!(
            "Waiting for {:?} slot ({} free)",
            level,
            semaphore.available_permits()
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Admission::Cancelled,
            permit = semaphore.acquire_owned() => match permit {
                Ok(_) if cancel.is_cancelled() => Admission::Cancelled,
                Ok(permit) => Admission::Granted(SlotPermit { _permit: Some(permit) }),
                Err(_) => Admission::Cancelled,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CancelReason;
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn limited(n: usize) -> MaxParallelThreads {
        MaxParallelThreads::Limited(NonZeroUsize::new(n).unwrap())
    }

    #[test]
    fn test_slot_level_follows_algorithm() {
        let conservative = ParallelizationScheduler::new(limited(2), ParallelAlgorithm::Conservative);
        assert_eq!(conservative.slot_level(), SlotLevel::Collection);

        let aggressive = ParallelizationScheduler::new(limited(2), ParallelAlgorithm::Aggressive);
        assert_eq!(aggressive.slot_level(), SlotLevel::TestCase);
    }

    #[tokio::test]
    async fn test_other_level_is_not_counted() {
        let scheduler = ParallelizationScheduler::new(limited(1), ParallelAlgorithm::Conservative);
        let cancel = CancellationHandle::new();

        let held = scheduler.acquire(SlotLevel::Collection, &cancel).await;
        assert!(held.is_granted());
        assert_eq!(scheduler.available_slots(), Some(0));

        let case = scheduler.acquire(SlotLevel::TestCase, &cancel).await;
        assert!(case.is_granted());
    }

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let scheduler =
            ParallelizationScheduler::new(MaxParallelThreads::Unlimited, ParallelAlgorithm::Aggressive);
        let cancel = CancellationHandle::new();

        let mut permits = Vec::new();
        for _ in 0..100 {
            permits.push(scheduler.acquire(SlotLevel::TestCase, &cancel).await);
        }
        assert!(permits.iter().all(Admission::is_granted));
        assert_eq!(scheduler.available_slots(), None);
    }

    #[tokio::test]
    async fn test_cancelled_run_is_not_admitted() {
        let scheduler = ParallelizationScheduler::new(limited(4), ParallelAlgorithm::Conservative);
        let cancel = CancellationHandle::new();
        cancel.cancel(CancelReason::Requested);

        let admission = scheduler.acquire(SlotLevel::Collection, &cancel).await;
        assert!(!admission.is_granted());
        assert_eq!(scheduler.available_slots(), Some(4));
    }

    #[tokio::test]
    async fn test_waiter_released_by_cancellation() {
        let scheduler = Arc::new(ParallelizationScheduler::new(
            limited(1),
            ParallelAlgorithm::Aggressive,
        ));
        let cancel = Arc::new(CancellationHandle::new());
        let _held = scheduler.acquire(SlotLevel::TestCase, &cancel).await;

        let waiter = {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.acquire(SlotLevel::TestCase, &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel(CancelReason::Requested);

        let admission = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!admission.is_granted());
    }

    #[tokio::test]
    async fn test_never_more_than_slot_count() {
        let scheduler = Arc::new(ParallelizationScheduler::new(
            limited(3),
            ParallelAlgorithm::Aggressive,
        ));
        let cancel = Arc::new(CancellationHandle::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let (scheduler, cancel) = (scheduler.clone(), cancel.clone());
                let (active, peak) = (active.clone(), peak.clone());
                tokio::spawn(async move {
                    let _slot = scheduler.acquire(SlotLevel::TestCase, &cancel).await;
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(scheduler.available_slots(), Some(3));
    }
}
