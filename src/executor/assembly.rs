//! Assembly runner
//!
//! Entry point of a run. Opens the assembly fixture scope, runs collections
//! concurrently (bounded by the scheduler), then the collections that opted
//! out of parallelization one at a time.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info};

use super::aggregator::ExceptionAggregator;
use super::cancellation::CancellationHandle;
use super::case::skip_cases;
use super::collection::CollectionRunner;
use super::context::RunnerContext;
use super::scheduler::{ParallelizationScheduler, SlotLevel};
use crate::config::ResolvedConfiguration;
use crate::fixtures::{FixtureMappingManager, FixtureScope};
use crate::messages::{ExecutionEvent, MessageBus};
use crate::models::{group_by, RunSummary, TestAssembly, TestCaseUnit};
use crate::utils::Timer;

/// Runs an ordered set of cases under one configuration.
///
/// The bus is borrowed, not owned: with queued delivery, call
/// [`MessageBus::close`] after `run` to flush every event to subscribers.
pub struct AssemblyRunner {
    assembly: Arc<TestAssembly>,
    config: Arc<ResolvedConfiguration>,
    message_bus: Arc<MessageBus>,
}

impl AssemblyRunner {
    pub fn new(assembly: TestAssembly, config: ResolvedConfiguration, message_bus: Arc<MessageBus>) -> Self {
        Self {
            assembly: Arc::new(assembly),
            config: Arc::new(config),
            message_bus,
        }
    }

    pub fn config(&self) -> &ResolvedConfiguration {
        &self.config
    }

    /// Stop signal for this run; the bus's handle
    pub fn cancellation(&self) -> Arc<CancellationHandle> {
        self.message_bus.cancellation().clone()
    }

    pub async fn run(&self, cases: Vec<TestCaseUnit>) -> RunSummary {
        let name = self.assembly.name.clone();
        let timer = Timer::start(name.clone());

        let ctx = RunnerContext {
            unit: self.assembly.clone(),
            cases: cases.into_iter().map(Arc::new).collect(),
            config: self.config.clone(),
            message_bus: self.message_bus.clone(),
            aggregator: ExceptionAggregator::new(),
            cancellation: self.cancellation(),
            scheduler: Arc::new(ParallelizationScheduler::from_config(&self.config)),
            fixtures: Arc::new(FixtureMappingManager::new(FixtureScope::Assembly, name.clone())),
        };

        info!(
            "Starting '{}': {} case(s), {} algorithm, max parallel threads {}",
            name,
            ctx.cases.len(),
            self.config.parallel_algorithm,
            self.config.max_parallel_threads
        );
        ctx.publish(ExecutionEvent::AssemblyStarting {
            assembly: name.clone(),
            seed: self.config.seed,
            algorithm: self.config.parallel_algorithm,
            max_parallel_threads: self.config.max_parallel_threads,
        })
        .await;
        ctx.diagnostic(format!(
            "{} test case(s); explicit mode {}; {} algorithm; max parallel threads {}",
            ctx.cases.len(),
            self.config.explicit,
            self.config.parallel_algorithm,
            self.config.max_parallel_threads
        ))
        .await;
        ctx.internal_diagnostic(format!(
            "Message delivery: {}; collections in parallel: {}",
            self.message_bus.mode(),
            ctx.scheduler.collections_in_parallel()
        ))
        .await;

        let mut summary = match ctx.open_scope(&self.assembly.fixtures).await {
            Some(failure) => skip_cases(&ctx, &failure).await,
            None => Self::run_collections(&ctx).await,
        };

        ctx.close_scope().await;
        summary.errors += ctx.scope_errors();
        summary.elapsed_ms = timer.elapsed_ms();

        if let Some(reason) = ctx.cancellation.reason() {
            info!("Run '{}' stopped early: {}", name, reason);
        }
        info!("Finished '{}' - {}", name, summary);

        ctx.publish(ExecutionEvent::AssemblyFinished {
            assembly: name,
            status: summary.status(),
            summary: summary.clone(),
        })
        .await;
        summary
    }

    async fn run_collections(ctx: &RunnerContext<TestAssembly>) -> RunSummary {
        let (serial, parallel): (Vec<_>, Vec<_>) = group_by(&ctx.cases, TestCaseUnit::collection)
            .into_iter()
            .partition(|(collection, _)| collection.disable_parallelization);

        let mut summary = RunSummary::default();

        if ctx.scheduler.collections_in_parallel() {
            // Admit in input order here; spawned tasks reach the semaphore in
            // no particular order.
            let mut handles = Vec::new();
            for (collection, cases) in parallel {
                let child = ctx.scoped_child(collection, cases, FixtureScope::Collection);
                let admission = ctx
                    .scheduler
                    .acquire(SlotLevel::Collection, &ctx.cancellation)
                    .await;
                handles.push(tokio::spawn(CollectionRunner::run_admitted(child, admission)));
            }

            for joined in join_all(handles).await {
                match joined {
                    Ok(collection) => summary.merge(&collection),
                    Err(e) => {
                        error!("Collection task ended abnormally: {}", e);
                        summary.errors += 1;
                    }
                }
            }
        } else {
            for (collection, cases) in parallel {
                let child = ctx.scoped_child(collection, cases, FixtureScope::Collection);
                summary.merge(&CollectionRunner::run(child).await);
            }
        }

        for (collection, cases) in serial {
            ctx.diagnostic(format!(
                "Collection '{}' runs alone: parallelization disabled",
                collection.name
            ))
            .await;
            let child = ctx.scoped_child(collection, cases, FixtureScope::Collection);
            summary.merge(&CollectionRunner::run(child).await);
        }

        summary
    }
}
