//! Handle given to a running test body

use std::sync::{Arc, Mutex, PoisonError};

use super::cancellation::CancellationHandle;
use crate::fixtures::{Fixture, FixtureError, FixtureLookup};
use crate::messages::{ExecutionEvent, MessageBus};
use crate::models::CaseInfo;

/// What a test body can see of the engine: its identity, its fixtures, an
/// output channel and the run's stop signal. Clones share output and warnings.
#[derive(Clone)]
pub struct TestContext {
    case: Arc<CaseInfo>,
    bus: Arc<MessageBus>,
    fixtures: FixtureLookup,
    cancellation: Arc<CancellationHandle>,
    output: Arc<Mutex<String>>,
    warnings: Arc<Mutex<Vec<String>>>,
}

impl TestContext {
    pub fn new(
        case: CaseInfo,
        bus: Arc<MessageBus>,
        fixtures: FixtureLookup,
        cancellation: Arc<CancellationHandle>,
    ) -> Self {
        Self {
            case: Arc::new(case),
            bus,
            fixtures,
            cancellation,
            output: Arc::new(Mutex::new(String::new())),
            warnings: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn case(&self) -> &CaseInfo {
        &self.case
    }

    /// Shared fixture of type `T` from the class, collection or assembly scope
    pub fn fixture<T: Fixture>(&self) -> Result<Arc<T>, FixtureError> {
        self.fixtures.get::<T>()
    }

    /// Publish a line of live output and keep it for the case result
    pub async fn write_line(&self, line: impl Into<String>) {
        let line = line.into();
        {
            let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
            output.push_str(&line);
            output.push('\n');
        }
        self.bus
            .publish(ExecutionEvent::TestCaseOutput {
                case_id: self.case.id.clone(),
                output: line,
            })
            .await;
    }

    /// Attach a warning; fails the case when warnings are treated as failures
    pub fn warn(&self, message: impl Into<String>) {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.into());
    }

    /// Long-running bodies may poll this to finish early
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn output(&self) -> String {
        self.output.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FixtureMappingManager, FixtureScope};
    use crate::messages::{DeliveryMode, EventLog};
    use std::collections::BTreeMap;

    fn context(log: &EventLog) -> TestContext {
        let cancel = Arc::new(CancellationHandle::new());
        let bus = Arc::new(
            MessageBus::new(DeliveryMode::Synchronous, cancel.clone()).with_sink(Arc::new(log.clone())),
        );
        let fixtures = Arc::new(FixtureMappingManager::new(FixtureScope::Class, "Widgets"));
        let case = CaseInfo {
            id: "w-1".to_string(),
            display_name: "Widgets.spin".to_string(),
            collection: "default".to_string(),
            class: "Widgets".to_string(),
            method: "spin".to_string(),
            traits: BTreeMap::new(),
            explicit: false,
        };
        TestContext::new(case, bus, FixtureLookup::new(fixtures), cancel)
    }

    #[tokio::test]
    async fn test_write_line_publishes_and_buffers() {
        let log = EventLog::new();
        let ctx = context(&log);

        ctx.write_line("first").await;
        ctx.clone().write_line("second").await;

        assert_eq!(ctx.output(), "first\nsecond\n");
        assert_eq!(log.for_case("w-1").len(), 2);
    }

    #[test]
    fn test_warnings_shared_between_clones() {
        let log = EventLog::new();
        let ctx = context(&log);
        ctx.clone().warn("slow");

        assert_eq!(ctx.warnings(), vec!["slow".to_string()]);
    }

    #[test]
    fn test_missing_fixture() {
        struct Cache;
        impl Fixture for Cache {}

        let log = EventLog::new();
        let ctx = context(&log);
        assert!(matches!(
            ctx.fixture::<Cache>(),
            Err(FixtureError::Missing(_, FixtureScope::Class))
        ));
    }
}
