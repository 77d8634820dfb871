//! Shared helpers for end-to-end runs

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use test_orchestra::executor::CancellationHandle;
use test_orchestra::messages::{DeliveryMode, EventEnvelope, EventLog, EventSink, ExecutionEvent, MessageBus};
use test_orchestra::{
    resolve, AssemblyRunner, ConfigLayer, ResolvedConfiguration, RunSummary, TestAssembly, TestCaseUnit,
    TestClass, TestCollection, TestMethod,
};

pub fn config(configure: impl FnOnce(&mut ConfigLayer)) -> ResolvedConfiguration {
    let mut layer = ConfigLayer::default();
    configure(&mut layer);
    resolve(&[layer])
}

pub struct Run {
    pub summary: RunSummary,
    pub log: EventLog,
    pub cancellation: Arc<CancellationHandle>,
}

/// Run with synchronous delivery, so the log is complete on return
pub async fn run(config: ResolvedConfiguration, cases: Vec<TestCaseUnit>) -> Run {
    run_with(config, TestAssembly::new("tests"), cases, Vec::new()).await
}

pub async fn run_with(
    config: ResolvedConfiguration,
    assembly: TestAssembly,
    cases: Vec<TestCaseUnit>,
    sinks: Vec<Arc<dyn EventSink>>,
) -> Run {
    let log = EventLog::new();
    let cancellation = Arc::new(CancellationHandle::new());
    let bus = MessageBus::new(DeliveryMode::Synchronous, cancellation.clone()).with_sink(Arc::new(log.clone()));
    for sink in sinks {
        bus.subscribe(sink);
    }

    let runner = AssemblyRunner::new(assembly, config, Arc::new(bus));
    let summary = runner.run(cases).await;
    Run {
        summary,
        log,
        cancellation,
    }
}

pub fn method(collection: &Arc<TestCollection>, class: &str, method: &str) -> Arc<TestMethod> {
    let class = Arc::new(TestClass::new(class, collection.clone()));
    Arc::new(TestMethod::new(method, class))
}

pub fn passing(id: &str, method: &Arc<TestMethod>) -> TestCaseUnit {
    TestCaseUnit::new(id, method.clone(), |_| async { Ok(()) })
}

pub fn failing(id: &str, method: &Arc<TestMethod>, message: &'static str) -> TestCaseUnit {
    TestCaseUnit::new(id, method.clone(), move |_| async move { Err(anyhow::anyhow!(message)) })
}

/// Case that sleeps while counted as active in `gauge`
pub fn busy(id: &str, method: &Arc<TestMethod>, gauge: &Gauge, millis: u64) -> TestCaseUnit {
    let gauge = gauge.clone();
    TestCaseUnit::new(id, method.clone(), move |_| {
        let gauge = gauge.clone();
        async move {
            gauge.enter();
            tokio::time::sleep(Duration::from_millis(millis)).await;
            gauge.exit();
            Ok(())
        }
    })
}

/// Tracks how many things are active at once and the peak
#[derive(Clone, Default)]
pub struct Gauge {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Gauge {
    pub fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Counts collections between their starting and finished events
#[derive(Clone, Default)]
pub struct OpenCollections(pub Gauge);

impl EventSink for OpenCollections {
    fn on_event(&self, envelope: &EventEnvelope) -> bool {
        match envelope.event {
            ExecutionEvent::CollectionStarting { .. } => self.0.enter(),
            ExecutionEvent::CollectionFinished { .. } => self.0.exit(),
            _ => {}
        }
        true
    }
}

/// Shared ordered journal for fixture and event interleaving checks
#[derive(Clone, Default)]
pub struct Journal(pub Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> usize {
        self.entries()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} not in journal"))
    }
}

impl EventSink for Journal {
    fn on_event(&self, envelope: &EventEnvelope) -> bool {
        self.push(envelope.event.name());
        true
    }
}
