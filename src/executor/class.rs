//! Class runner
//!
//! Opens the class fixture scope, then runs each method group in order.

use tracing::debug;

use super::case::skip_cases;
use super::context::RunnerContext;
use super::method::MethodRunner;
use crate::messages::ExecutionEvent;
use crate::models::{group_by, RunSummary, TestClass};
use crate::utils::Timer;

pub struct ClassRunner;

impl ClassRunner {
    /// `ctx.fixtures` must be this class's own scope
    pub async fn run(ctx: RunnerContext<TestClass>) -> RunSummary {
        let class = ctx.unit.clone();
        let timer = Timer::start(class.name.clone());

        ctx.publish(ExecutionEvent::ClassStarting {
            collection: class.collection.name.clone(),
            class: class.name.clone(),
        })
        .await;

        let mut summary = match ctx.open_scope(&class.fixtures).await {
            Some(failure) => skip_cases(&ctx, &failure).await,
            None => {
                let mut summary = RunSummary::default();
                for (method, cases) in group_by(&ctx.cases, |case| &case.method) {
                    debug!("Method {}.{}: {} case(s)", class.name, method.name, cases.len());
                    summary.merge(&MethodRunner::run(ctx.child(method, cases)).await);
                }
                summary
            }
        };

        ctx.close_scope().await;
        summary.errors += ctx.scope_errors();
        summary.elapsed_ms = timer.elapsed_ms();

        ctx.publish(ExecutionEvent::ClassFinished {
            collection: class.collection.name.clone(),
            class: class.name.clone(),
            status: summary.status(),
            summary: summary.clone(),
        })
        .await;
        summary
    }
}
