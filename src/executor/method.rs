//! Method runner

use super::case::TestCaseRunner;
use super::context::RunnerContext;
use crate::messages::ExecutionEvent;
use crate::models::{RunSummary, TestMethod};
use crate::utils::Timer;

/// Runs the cases of one method, one after another
pub struct MethodRunner;

impl MethodRunner {
    pub async fn run(ctx: RunnerContext<TestMethod>) -> RunSummary {
        let method = ctx.unit.clone();
        let timer = Timer::start(format!("{}.{}", method.class.name, method.name));

        ctx.publish(ExecutionEvent::MethodStarting {
            class: method.class.name.clone(),
            method: method.name.clone(),
        })
        .await;

        let mut summary = RunSummary::default();
        for case in &ctx.cases {
            let child = ctx.child(case.clone(), vec![case.clone()]);
            summary.merge(&TestCaseRunner::run(child).await);
        }
        summary.elapsed_ms = timer.elapsed_ms();

        ctx.publish(ExecutionEvent::MethodFinished {
            class: method.class.name.clone(),
            method: method.name.clone(),
            status: summary.status(),
            summary: summary.clone(),
        })
        .await;
        summary
    }
}
