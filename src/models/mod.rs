//! Data models for test orchestration
//!
//! Test units and their grouping identities, plus the result and summary
//! types carried by execution events.

mod test_case;
mod test_result;

pub use test_case::{
    group_by, skip, CaseInfo, ExecutionUnit, SkipTest, TeardownFn, TestAssembly, TestBody,
    TestCaseUnit, TestClass, TestCollection, TestMethod, UnitKind,
};
pub use test_result::{
    CaseResult, CaseStatus, FailureInfo, FailureKind, NotRunReason, RunSummary, UnitStatus,
};
