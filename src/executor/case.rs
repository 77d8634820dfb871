//! Test case runner
//!
//! Runs one case: explicit filtering, cancellation check, slot admission,
//! body and teardown through an aggregator, status remapping and the
//! stop-on-fail trigger.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use super::aggregator::ExceptionAggregator;
use super::cancellation::CancelReason;
use super::context::RunnerContext;
use super::scheduler::{Admission, SlotLevel};
use super::test_context::TestContext;
use crate::config::ExplicitOption;
use crate::fixtures::FixtureLookup;
use crate::messages::ExecutionEvent;
use crate::models::{
    CaseResult, CaseStatus, ExecutionUnit, NotRunReason, RunSummary, SkipTest, TestCaseUnit,
};
use crate::utils::Timer;

pub struct TestCaseRunner;

impl TestCaseRunner {
    pub async fn run(ctx: RunnerContext<TestCaseUnit>) -> RunSummary {
        let case = ctx.unit.clone();
        let mut summary = RunSummary::default();
        summary.record(Self::execute(&ctx, &case).await);
        summary
    }

    async fn execute(ctx: &RunnerContext<TestCaseUnit>, case: &Arc<TestCaseUnit>) -> CaseStatus {
        if let Some(reason) = excluded(ctx.explicit(), case) {
            return report_not_run(ctx, case, reason).await;
        }
        if ctx.is_cancelled() {
            return report_not_run(ctx, case, NotRunReason::Cancelled).await;
        }
        if let Some(reason) = &case.skip_reason {
            ctx.publish(ExecutionEvent::TestCaseStarting { case: case.info() })
                .await;
            return finish(ctx, case, CaseResult::skipped(reason.clone())).await;
        }

        let slot = match ctx.scheduler.acquire(SlotLevel::TestCase, &ctx.cancellation).await {
            Admission::Granted(slot) => slot,
            Admission::Cancelled => return report_not_run(ctx, case, NotRunReason::Cancelled).await,
        };

        ctx.publish(ExecutionEvent::TestCaseStarting { case: case.info() })
            .await;
        debug!("Running {}", case.display_name);

        let test = TestContext::new(
            case.info(),
            ctx.message_bus.clone(),
            FixtureLookup::new(ctx.fixtures.clone()),
            ctx.cancellation.clone(),
        );
        let aggregator = &ctx.aggregator;
        let timer = Timer::start(case.id.clone());

        // The closures are called inside the guarded futures: a body may
        // panic before it hands back its future.
        let work = async {
            aggregator
                .run_async(async { (case.body)(test.clone()).await })
                .await;
            if let Some(teardown) = &case.teardown {
                aggregator
                    .run_cleanup_async(async { teardown(test.clone()).await })
                    .await;
            }
        };
        match ctx.config.long_running_threshold() {
            Some(threshold) => report_long_running(ctx, case, threshold, work).await,
            None => work.await,
        }

        let elapsed_ms = timer.elapsed_ms();
        drop(slot);

        let result = build_result(aggregator, &test, elapsed_ms);
        finish(ctx, case, result).await
    }
}

/// Drive `work`, publishing a diagnostic each time another `threshold`
/// passes while it is still running
async fn report_long_running<U: ExecutionUnit>(
    ctx: &RunnerContext<U>,
    case: &TestCaseUnit,
    threshold: Duration,
    work: impl Future<Output = ()>,
) {
    tokio::pin!(work);
    let started = Instant::now();
    let mut ticks = time::interval_at(started + threshold, threshold);

    loop {
        tokio::select! {
            biased;
            _ = &mut work => return,
            _ = ticks.tick() => {
                let elapsed = started.elapsed().as_secs();
                warn!("{} still running after {}s", case.display_name, elapsed);
                ctx.publish(ExecutionEvent::DiagnosticMessage {
                    message: format!("[Long running test] '{}', elapsed: {}s", case.display_name, elapsed),
                })
                .await;
            }
        }
    }
}

/// Why `case` is filtered out under `mode`, if it is
pub(crate) fn excluded(mode: ExplicitOption, case: &TestCaseUnit) -> Option<NotRunReason> {
    if mode.admits(case.explicit) {
        None
    } else if case.explicit {
        Some(NotRunReason::ExplicitOnly)
    } else {
        Some(NotRunReason::NotExplicit)
    }
}

fn build_result(aggregator: &ExceptionAggregator, test: &TestContext, elapsed_ms: u64) -> CaseResult {
    let failures = aggregator.failures();
    let cleanup_failures: Vec<_> = aggregator.cleanup_failures().iter().map(|f| f.info()).collect();

    let skipped = match failures.as_slice() {
        [only] => only.inner().downcast_ref::<SkipTest>().map(|s| s.0.clone()),
        _ => None,
    };

    let (reported_status, skip_reason, failure) = match (skipped, failures.first()) {
        (Some(reason), _) => (CaseStatus::Skipped, Some(reason), None),
        (None, Some(first)) => (CaseStatus::Failed, None, Some(first.info())),
        (None, None) => (CaseStatus::Passed, None, None),
    };

    let status = if cleanup_failures.is_empty() {
        reported_status
    } else {
        CaseStatus::Failed
    };

    CaseResult {
        status,
        reported_status,
        elapsed_ms,
        output: test.output(),
        warnings: test.warnings(),
        skip_reason,
        failure,
        cleanup_failures,
    }
}

/// Remap, publish the finished event and apply stop-on-fail
pub(crate) async fn finish<U: ExecutionUnit>(
    ctx: &RunnerContext<U>,
    case: &TestCaseUnit,
    result: CaseResult,
) -> CaseStatus {
    let result = result.remap(ctx.config.fail_skips, ctx.config.fail_tests_with_warnings);
    let status = result.status;

    if status == CaseStatus::Failed {
        warn!("{} failed", case.display_name);
    }
    ctx.publish(ExecutionEvent::TestCaseFinished {
        case: case.info(),
        result,
    })
    .await;

    if status == CaseStatus::Failed && ctx.config.stop_on_fail {
        ctx.cancellation.cancel(CancelReason::StopOnFail);
    }
    status
}

pub(crate) async fn report_not_run<U: ExecutionUnit>(
    ctx: &RunnerContext<U>,
    case: &TestCaseUnit,
    reason: NotRunReason,
) -> CaseStatus {
    debug!("{} not run: {}", case.display_name, reason);
    ctx.publish(ExecutionEvent::TestCaseNotRun {
        case: case.info(),
        reason,
    })
    .await;
    CaseStatus::NotRun
}

/// Report every case of a unit whose setup failed as skipped
pub(crate) async fn skip_cases<U: ExecutionUnit>(ctx: &RunnerContext<U>, setup_failure: &str) -> RunSummary {
    let reason = format!("Fixture setup failed: {setup_failure}");
    let mut summary = RunSummary::default();

    for case in &ctx.cases {
        let status = match excluded(ctx.explicit(), case) {
            Some(not_run) => report_not_run(ctx, case, not_run).await,
            None => {
                ctx.publish(ExecutionEvent::TestCaseStarting { case: case.info() })
                    .await;
                finish(ctx, case, CaseResult::skipped(reason.clone())).await
            }
        };
        summary.record(status);
    }
    summary
}

/// Report every case of a unit that was never admitted
pub(crate) async fn cancel_cases<U: ExecutionUnit>(ctx: &RunnerContext<U>) -> RunSummary {
    let mut summary = RunSummary::default();
    for case in &ctx.cases {
        let reason = excluded(ctx.explicit(), case).unwrap_or(NotRunReason::Cancelled);
        summary.record(report_not_run(ctx, case, reason).await);
    }
    summary
}
