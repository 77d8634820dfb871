//! Runner context
//!
//! One [`RunnerContext`] per runner invocation. It carries the unit being run,
//! its cases, and handles to the run-wide services. Only the bus, the
//! cancellation handle and the scheduler are shared between branches.

use std::sync::Arc;
use tracing::warn;

use super::aggregator::{CapturedFailure, ExceptionAggregator};
use super::cancellation::CancellationHandle;
use super::scheduler::ParallelizationScheduler;
use crate::config::{ExplicitOption, ResolvedConfiguration};
use crate::fixtures::{FixtureDefinition, FixtureMappingManager, FixtureScope};
use crate::messages::{ExecutionEvent, MessageBus};
use crate::models::{ExecutionUnit, TestCaseUnit};

pub struct RunnerContext<U: ExecutionUnit> {
    pub unit: Arc<U>,
    /// Cases below `unit`, in discovery order
    pub cases: Vec<Arc<TestCaseUnit>>,
    pub config: Arc<ResolvedConfiguration>,
    pub message_bus: Arc<MessageBus>,
    /// Failures of this unit itself: scope setup and cleanup, or the case
    /// body and teardown. Never shared with other units.
    pub aggregator: ExceptionAggregator,
    pub cancellation: Arc<CancellationHandle>,
    pub scheduler: Arc<ParallelizationScheduler>,
    /// Fixtures visible to this unit. Assembly, collection and class runners
    /// own this scope: they initialize and dispose it.
    pub fixtures: Arc<FixtureMappingManager>,
}

impl<U: ExecutionUnit> RunnerContext<U> {
    pub fn explicit(&self) -> ExplicitOption {
        self.config.explicit
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Context for a child unit sharing this unit's fixture scope
    pub fn child<C: ExecutionUnit>(&self, unit: Arc<C>, cases: Vec<Arc<TestCaseUnit>>) -> RunnerContext<C> {
        RunnerContext {
            unit,
            cases,
            config: self.config.clone(),
            message_bus: self.message_bus.clone(),
            aggregator: self.aggregator.child(),
            cancellation: self.cancellation.clone(),
            scheduler: self.scheduler.clone(),
            fixtures: self.fixtures.clone(),
        }
    }

    /// Context for a child unit that opens its own fixture scope
    pub fn scoped_child<C: ExecutionUnit>(
        &self,
        unit: Arc<C>,
        cases: Vec<Arc<TestCaseUnit>>,
        scope: FixtureScope,
    ) -> RunnerContext<C> {
        let fixtures = Arc::new(FixtureMappingManager::child_of(
            self.fixtures.clone(),
            scope,
            unit.unit_name(),
        ));
        RunnerContext {
            fixtures,
            ..self.child(unit, cases)
        }
    }

    pub async fn publish(&self, event: ExecutionEvent) -> bool {
        self.message_bus.publish(event).await
    }

    pub async fn diagnostic(&self, message: impl Into<String>) {
        if self.config.diagnostic_messages {
            self.publish(ExecutionEvent::DiagnosticMessage {
                message: message.into(),
            })
            .await;
        }
    }

    pub async fn internal_diagnostic(&self, message: impl Into<String>) {
        if self.config.internal_diagnostic_messages {
            self.publish(ExecutionEvent::InternalDiagnosticMessage {
                message: message.into(),
            })
            .await;
        }
    }

    /// Create the scope's declared fixtures. On failure the setup failure is
    /// recorded, published and its message returned.
    pub(crate) async fn open_scope(&self, definitions: &[FixtureDefinition]) -> Option<String> {
        let err = self.fixtures.initialize(definitions).await.err()?;
        let failure = CapturedFailure::error(err.into());
        let info = failure.info();
        self.aggregator.record(failure);

        warn!(
            "Setup of {} '{}' failed: {}",
            self.fixtures.scope(),
            self.unit.unit_name(),
            info
        );
        let message = info.message.clone();
        self.publish(ExecutionEvent::SetupFailure {
            scope: self.fixtures.scope(),
            unit: self.unit.unit_name().to_string(),
            failure: info,
        })
        .await;
        Some(message)
    }

    /// Dispose the scope's fixtures, publishing each cleanup failure
    pub(crate) async fn close_scope(&self) {
        let before = self.aggregator.cleanup_failures().len();
        self.fixtures.dispose_scope(&self.aggregator).await;

        for failure in self.aggregator.cleanup_failures().iter().skip(before) {
            self.publish(ExecutionEvent::CleanupFailure {
                scope: self.fixtures.scope(),
                unit: self.unit.unit_name().to_string(),
                failure: failure.info(),
            })
            .await;
        }
    }

    /// Setup and cleanup failures recorded against this unit
    pub(crate) fn scope_errors(&self) -> usize {
        self.aggregator.count() + self.aggregator.cleanup_failures().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Fixture;
    use crate::messages::{DeliveryMode, EventLog};
    use crate::models::TestCollection;
    use futures::future::BoxFuture;

    struct Leaky;

    impl Fixture for Leaky {
        fn dispose(&self) -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async { Err(anyhow::anyhow!("handle leaked")) })
        }
    }

    struct Unreachable;

    impl Fixture for Unreachable {}

    fn collection_context(log: &EventLog) -> RunnerContext<TestCollection> {
        let cancellation = Arc::new(CancellationHandle::new());
        let bus = MessageBus::new(DeliveryMode::Synchronous, cancellation.clone())
            .with_sink(Arc::new(log.clone()));
        let config = ResolvedConfiguration::default();

        RunnerContext {
            unit: Arc::new(TestCollection::new("storage")),
            cases: Vec::new(),
            scheduler: Arc::new(ParallelizationScheduler::from_config(&config)),
            config: Arc::new(config),
            message_bus: Arc::new(bus),
            aggregator: ExceptionAggregator::new(),
            cancellation,
            fixtures: Arc::new(FixtureMappingManager::new(FixtureScope::Collection, "storage")),
        }
    }

    #[tokio::test]
    async fn test_scope_failures_land_on_own_aggregator() {
        let log = EventLog::new();
        let ctx = collection_context(&log);
        let definitions = vec![
            FixtureDefinition::new(|_| async { Ok(Leaky) }),
            FixtureDefinition::new(|_| async { Err::<Unreachable, _>(anyhow::anyhow!("disk full")) }),
        ];

        let failure = ctx.open_scope(&definitions).await;
        assert!(failure.unwrap().contains("disk full"));
        ctx.close_scope().await;

        assert_eq!(ctx.aggregator.count(), 1);
        assert_eq!(ctx.aggregator.cleanup_failures().len(), 1);
        assert_eq!(ctx.scope_errors(), 2);
        assert_eq!(log.count("setup_failure"), 1);
        assert_eq!(log.count("cleanup_failure"), 1);

        let child = ctx.child(ctx.unit.clone(), Vec::new());
        assert_eq!(child.aggregator.count(), 0);
    }

    #[tokio::test]
    async fn test_clean_scope_has_no_errors() {
        let log = EventLog::new();
        let ctx = collection_context(&log);

        assert!(ctx.open_scope(&[FixtureDefinition::new(|_| async { Ok(Unreachable) })]).await.is_none());
        ctx.close_scope().await;

        assert_eq!(ctx.scope_errors(), 0);
        assert!(log.is_empty());
    }
}
