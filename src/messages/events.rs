//! Execution events
//!
//! Everything the engine reports flows through these types; reporters never
//! see runner internals.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{MaxParallelThreads, ParallelAlgorithm};
use crate::fixtures::FixtureScope;
use crate::models::{CaseInfo, CaseResult, FailureInfo, NotRunReason, RunSummary, UnitStatus};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    AssemblyStarting {
        assembly: String,
        seed: Option<i32>,
        algorithm: ParallelAlgorithm,
        max_parallel_threads: MaxParallelThreads,
    },
    AssemblyFinished {
        assembly: String,
        status: UnitStatus,
        summary: RunSummary,
    },
    CollectionStarting {
        collection: String,
    },
    CollectionFinished {
        collection: String,
        status: UnitStatus,
        summary: RunSummary,
    },
    ClassStarting {
        collection: String,
        class: String,
    },
    ClassFinished {
        collection: String,
        class: String,
        status: UnitStatus,
        summary: RunSummary,
    },
    MethodStarting {
        class: String,
        method: String,
    },
    MethodFinished {
        class: String,
        method: String,
        status: UnitStatus,
        summary: RunSummary,
    },
    TestCaseStarting {
        case: CaseInfo,
    },
    TestCaseOutput {
        case_id: String,
        output: String,
    },
    TestCaseFinished {
        case: CaseInfo,
        result: CaseResult,
    },
    TestCaseNotRun {
        case: CaseInfo,
        reason: NotRunReason,
    },
    /// Fixture creation failed; every case of the unit is skipped
    SetupFailure {
        scope: FixtureScope,
        unit: String,
        failure: FailureInfo,
    },
    /// Fixture disposal failed after the unit's cases completed
    CleanupFailure {
        scope: FixtureScope,
        unit: String,
        failure: FailureInfo,
    },
    DiagnosticMessage {
        message: String,
    },
    InternalDiagnosticMessage {
        message: String,
    },
}

impl ExecutionEvent {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionEvent::AssemblyStarting { .. } => "assembly_starting",
            ExecutionEvent::AssemblyFinished { .. } => "assembly_finished",
            ExecutionEvent::CollectionStarting { .. } => "collection_starting",
            ExecutionEvent::CollectionFinished { .. } => "collection_finished",
            ExecutionEvent::ClassStarting { .. } => "class_starting",
            ExecutionEvent::ClassFinished { .. } => "class_finished",
            ExecutionEvent::MethodStarting { .. } => "method_starting",
            ExecutionEvent::MethodFinished { .. } => "method_finished",
            ExecutionEvent::TestCaseStarting { .. } => "test_case_starting",
            ExecutionEvent::TestCaseOutput { .. } => "test_case_output",
            ExecutionEvent::TestCaseFinished { .. } => "test_case_finished",
            ExecutionEvent::TestCaseNotRun { .. } => "test_case_not_run",
            ExecutionEvent::SetupFailure { .. } => "setup_failure",
            ExecutionEvent::CleanupFailure { .. } => "cleanup_failure",
            ExecutionEvent::DiagnosticMessage { .. } => "diagnostic_message",
            ExecutionEvent::InternalDiagnosticMessage { .. } => "internal_diagnostic_message",
        }
    }

    /// Id of the case the event belongs to, if any
    pub fn case_id(&self) -> Option<&str> {
        match self {
            ExecutionEvent::TestCaseStarting { case }
            | ExecutionEvent::TestCaseFinished { case, .. }
            | ExecutionEvent::TestCaseNotRun { case, .. } => Some(&case.id),
            ExecutionEvent::TestCaseOutput { case_id, .. } => Some(case_id),
            _ => None,
        }
    }
}

/// Event plus the time it was published
#[derive(Clone, Debug, Serialize)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ExecutionEvent,
}

impl EventEnvelope {
    pub fn new(event: ExecutionEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
