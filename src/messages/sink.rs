//! Event subscribers

use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use super::events::{EventEnvelope, ExecutionEvent};
use crate::models::{CaseResult, CaseStatus, NotRunReason};

/// Receives every published event
pub trait EventSink: Send + Sync {
    /// Handle one event; return `false` to ask the run to stop
    fn on_event(&self, envelope: &EventEnvelope) -> bool;
}

/// In-memory recorder, for embedding hosts and tests
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.event.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finished results keyed by case id, in publication order
    pub fn finished(&self) -> Vec<(String, CaseResult)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ExecutionEvent::TestCaseFinished { case, result } => Some((case.id, result)),
                _ => None,
            })
            .collect()
    }

    pub fn not_run(&self) -> Vec<(String, NotRunReason)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ExecutionEvent::TestCaseNotRun { case, reason } => Some((case.id, reason)),
                _ => None,
            })
            .collect()
    }

    /// Published status of a case; `NotRun` when it was never started
    pub fn status_of(&self, case_id: &str) -> Option<CaseStatus> {
        if self.not_run().iter().any(|(id, _)| id == case_id) {
            return Some(CaseStatus::NotRun);
        }
        self.finished()
            .into_iter()
            .find(|(id, _)| id == case_id)
            .map(|(_, result)| result.status)
    }

    /// Events that belong to one case, in publication order
    pub fn for_case(&self, case_id: &str) -> Vec<ExecutionEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.case_id() == Some(case_id))
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }
}

impl EventSink for EventLog {
    fn on_event(&self, envelope: &EventEnvelope) -> bool {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope.clone());
        true
    }
}

/// Mirrors progress into `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, envelope: &EventEnvelope) -> bool {
        match &envelope.event {
            ExecutionEvent::TestCaseFinished { case, result } => match result.status {
                CaseStatus::Failed => warn!("  {} {}", result, case.display_name),
                _ => info!("  {} {}", result, case.display_name),
            },
            ExecutionEvent::TestCaseNotRun { case, reason } => {
                info!("  - {} (not run: {})", case.display_name, reason)
            }
            ExecutionEvent::CollectionFinished {
                collection,
                summary,
                ..
            } => info!("Collection '{}' finished - {}", collection, summary),
            ExecutionEvent::AssemblyFinished {
                assembly, summary, ..
            } => info!("Assembly '{}' finished - {}", assembly, summary),
            ExecutionEvent::SetupFailure {
                scope,
                unit,
                failure,
            } => warn!("Setup of {} '{}' failed: {}", scope, unit, failure),
            ExecutionEvent::CleanupFailure {
                scope,
                unit,
                failure,
            } => warn!("Cleanup of {} '{}' failed: {}", scope, unit, failure),
            ExecutionEvent::DiagnosticMessage { message }
            | ExecutionEvent::InternalDiagnosticMessage { message } => debug!("{}", message),
            other => debug!("{}", other.name()),
        }
        true
    }
}

/// Asks the run to stop after the first failed case
#[derive(Clone, Copy, Debug, Default)]
pub struct StopOnFirstFailure;

impl EventSink for StopOnFirstFailure {
    fn on_event(&self, envelope: &EventEnvelope) -> bool {
        !matches!(
            &envelope.event,
            ExecutionEvent::TestCaseFinished { result, .. } if result.status == CaseStatus::Failed
        )
    }
}
