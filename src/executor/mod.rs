//! Test execution engine
//!
//! The runner hierarchy (assembly, collection, class, method, case) and the
//! services it is built on: failure aggregation, cancellation and slot
//! scheduling.

pub(crate) mod aggregator;
mod assembly;
mod cancellation;
mod case;
mod class;
mod collection;
mod context;
mod method;
mod scheduler;
mod test_context;

pub use aggregator::{AggregateFailure, CapturedFailure, ExceptionAggregator};
pub use assembly::AssemblyRunner;
pub use cancellation::{CancelReason, CancellationHandle};
pub use case::TestCaseRunner;
pub use class::ClassRunner;
pub use collection::CollectionRunner;
pub use context::RunnerContext;
pub use method::MethodRunner;
pub use scheduler::{Admission, ParallelizationScheduler, SlotLevel, SlotPermit};
pub use test_context::TestContext;
