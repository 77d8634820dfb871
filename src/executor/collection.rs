//! Collection runner
//!
//! Takes a collection slot (conservative algorithm), opens the collection
//! fixture scope and runs its classes in order. Fixtures are created only
//! once the slot is held, and the slot is released only after the
//! collection-finished event is out.

use tracing::{debug, info};

use super::case::{cancel_cases, skip_cases};
use super::class::ClassRunner;
use super::context::RunnerContext;
use super::scheduler::{Admission, SlotLevel};
use crate::fixtures::FixtureScope;
use crate::messages::ExecutionEvent;
use crate::models::{group_by, RunSummary, TestCaseUnit, TestCollection};
use crate::utils::Timer;

pub struct CollectionRunner;

impl CollectionRunner {
    /// `ctx.fixtures` must be this collection's own scope
    pub async fn run(ctx: RunnerContext<TestCollection>) -> RunSummary {
        let admission = ctx.scheduler.acquire(SlotLevel::Collection, &ctx.cancellation).await;
        Self::run_admitted(ctx, admission).await
    }

    /// Run with an admission the caller already obtained
    pub async fn run_admitted(ctx: RunnerContext<TestCollection>, admission: Admission) -> RunSummary {
        let collection = ctx.unit.clone();

        let slot = match admission {
            Admission::Granted(slot) => slot,
            Admission::Cancelled => {
                debug!("Collection '{}' not admitted: run cancelled", collection.name);
                return cancel_cases(&ctx).await;
            }
        };

        let timer = Timer::start(collection.name.clone());
        info!(
            "Running collection '{}' ({} case(s))",
            collection.name,
            ctx.cases.len()
        );
        ctx.publish(ExecutionEvent::CollectionStarting {
            collection: collection.name.clone(),
        })
        .await;
        ctx.internal_diagnostic(format!(
            "Collection '{}' admitted; {} slot(s) left",
            collection.name,
            ctx.scheduler
                .available_slots()
                .map_or_else(|| "unlimited".to_string(), |n| n.to_string())
        ))
        .await;

        let mut summary = match ctx.open_scope(&collection.fixtures).await {
            Some(failure) => skip_cases(&ctx, &failure).await,
            None => {
                let mut summary = RunSummary::default();
                for (class, cases) in group_by(&ctx.cases, TestCaseUnit::class) {
                    let child = ctx.scoped_child(class, cases, FixtureScope::Class);
                    summary.merge(&ClassRunner::run(child).await);
                }
                summary
            }
        };

        ctx.close_scope().await;
        summary.errors += ctx.scope_errors();
        summary.elapsed_ms = timer.elapsed_ms();

        ctx.publish(ExecutionEvent::CollectionFinished {
            collection: collection.name.clone(),
            status: summary.status(),
            summary: summary.clone(),
        })
        .await;
        drop(slot);

        summary
    }
}
