//! test-orchestra - test execution orchestration engine
//!
//! Runs an already-discovered, ordered set of test cases grouped by
//! collection, class and method:
//!
//! - configuration resolved from layered, all-optional sources
//! - bounded parallelism, conservative (per collection) or aggressive (per case)
//! - shared fixtures per assembly, collection and class, disposed in reverse
//! - failure aggregation that never stops sibling work
//! - a structured event stream for reporters
//!
//! ```no_run
//! use std::sync::Arc;
//! use test_orchestra::{
//!     AssemblyRunner, CancellationHandle, EventLog, MessageBus, ResolvedConfiguration,
//!     TestAssembly, TestCaseUnit, TestClass, TestCollection, TestMethod,
//! };
//!
//! # async fn demo() {
//! let collection = Arc::new(TestCollection::new("math"));
//! let class = Arc::new(TestClass::new("Arithmetic", collection));
//! let method = Arc::new(TestMethod::new("adds", class));
//! let case = TestCaseUnit::new("adds-1", method, |_ctx| async {
//!     anyhow::ensure!(1 + 1 == 2, "arithmetic is broken");
//!     Ok(())
//! });
//!
//! let config = ResolvedConfiguration::default();
//! let log = EventLog::new();
//! let bus = Arc::new(
//!     MessageBus::from_config(&config, Arc::new(CancellationHandle::new()))
//!         .with_sink(Arc::new(log.clone())),
//! );
//! let runner = AssemblyRunner::new(TestAssembly::new("demo"), config, bus.clone());
//! let summary = runner.run(vec![case]).await;
//! bus.close().await;
//! assert_eq!(summary.passed, 1);
//! # }
//! ```

pub mod config;
pub mod executor;
pub mod fixtures;
pub mod messages;
pub mod models;
pub mod utils;

pub use config::{resolve, ConfigLayer, ExplicitOption, MaxParallelThreads, ParallelAlgorithm, ResolvedConfiguration};
pub use executor::{
    AssemblyRunner, CancelReason, CancellationHandle, ExceptionAggregator, ParallelizationScheduler,
    TestContext,
};
pub use fixtures::{Fixture, FixtureDefinition, FixtureError, FixtureScope};
pub use messages::{DeliveryMode, EventLog, EventSink, ExecutionEvent, MessageBus};
pub use models::{
    skip, CaseResult, CaseStatus, RunSummary, TestAssembly, TestCaseUnit, TestClass, TestCollection,
    TestMethod,
};
