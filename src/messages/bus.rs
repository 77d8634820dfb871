//! Message bus
//!
//! Fans published events out to every subscriber. Delivery is either queued
//! through a bounded channel drained by a background task, or synchronous,
//! where `publish` returns only after every subscriber saw the event.

use futures::future::BoxFuture;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::events::{EventEnvelope, ExecutionEvent};
use super::sink::EventSink;
use crate::config::ResolvedConfiguration;
use crate::executor::aggregator::panic_message;
use crate::executor::{CancelReason, CancellationHandle};

/// Events buffered before publishers start waiting
pub const QUEUE_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    #[default]
    Queued,
    Synchronous,
}

impl DeliveryMode {
    pub fn from_config(config: &ResolvedConfiguration) -> Self {
        if config.synchronous_message_reporting {
            DeliveryMode::Synchronous
        } else {
            DeliveryMode::Queued
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Queued => write!(f, "queued"),
            DeliveryMode::Synchronous => write!(f, "synchronous"),
        }
    }
}

/// Subscribers plus the handle they may signal
struct SinkSet {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    cancellation: Arc<CancellationHandle>,
}

impl SinkSet {
    fn dispatch(&self, envelope: &EventEnvelope) {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        let mut keep_going = true;
        for sink in sinks.iter() {
            // A panicking subscriber is logged and skipped for this event
            match panic::catch_unwind(AssertUnwindSafe(|| sink.on_event(envelope))) {
                Ok(proceed) => keep_going &= proceed,
                Err(payload) => error!(
                    "Subscriber panicked on {}: {}",
                    envelope.event.name(),
                    panic_message(payload.as_ref())
                ),
            }
        }
        if !keep_going {
            self.cancellation.cancel(CancelReason::Subscriber);
        }
    }
}

trait Delivery: Send + Sync {
    fn deliver(&self, envelope: EventEnvelope) -> BoxFuture<'_, ()>;
    fn close(&self) -> BoxFuture<'_, ()>;
}

struct SynchronousDelivery {
    sinks: Arc<SinkSet>,
    gate: Mutex<()>,
}

impl Delivery for SynchronousDelivery {
    fn deliver(&self, envelope: EventEnvelope) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _serialized = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            self.sinks.dispatch(&envelope);
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

struct QueuedDelivery {
    sender: Mutex<Option<mpsc::Sender<EventEnvelope>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl QueuedDelivery {
    fn spawn(sinks: Arc<SinkSet>, handle: &tokio::runtime::Handle) -> Self {
        let (sender, mut receiver) = mpsc::channel::<EventEnvelope>(QUEUE_CAPACITY);
        let worker = handle.spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                sinks.dispatch(&envelope);
            }
            debug!("Message queue drained");
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }
}

impl Delivery for QueuedDelivery {
    fn deliver(&self, envelope: EventEnvelope) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let sender = self
                .sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            match sender {
                Some(sender) => {
                    if sender.send(envelope).await.is_err() {
                        warn!("Message worker stopped; event dropped");
                    }
                }
                None => debug!("Bus closed; dropping {}", envelope.event.name()),
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(worker) = self.worker.lock().await.take() {
                if let Err(e) = worker.await {
                    warn!("Message worker ended abnormally: {}", e);
                }
            }
        })
    }
}

/// Shared event bus for one run
pub struct MessageBus {
    mode: DeliveryMode,
    sinks: Arc<SinkSet>,
    delivery: Box<dyn Delivery>,
    cancellation: Arc<CancellationHandle>,
}

impl MessageBus {
    /// Queued delivery needs a tokio runtime; without one the bus falls back
    /// to synchronous delivery.
    pub fn new(mode: DeliveryMode, cancellation: Arc<CancellationHandle>) -> Self {
        let sinks = Arc::new(SinkSet {
            sinks: RwLock::new(Vec::new()),
            cancellation: cancellation.clone(),
        });

        let runtime = tokio::runtime::Handle::try_current();
        let (mode, delivery): (DeliveryMode, Box<dyn Delivery>) = match (mode, runtime) {
            (DeliveryMode::Queued, Ok(handle)) => (
                DeliveryMode::Queued,
                Box::new(QueuedDelivery::spawn(sinks.clone(), &handle)),
            ),
            (requested, _) => {
                if requested == DeliveryMode::Queued {
                    warn!("No tokio runtime; message bus falls back to synchronous delivery");
                }
                (
                    DeliveryMode::Synchronous,
                    Box::new(SynchronousDelivery {
                        sinks: sinks.clone(),
                        gate: Mutex::new(()),
                    }),
                )
            }
        };

        debug!("Message bus using {} delivery", mode);
        Self {
            mode,
            sinks,
            delivery,
            cancellation,
        }
    }

    pub fn from_config(config: &ResolvedConfiguration, cancellation: Arc<CancellationHandle>) -> Self {
        Self::new(DeliveryMode::from_config(config), cancellation)
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn cancellation(&self) -> &Arc<CancellationHandle> {
        &self.cancellation
    }

    /// Register a subscriber; it sees events published from now on
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.sinks
            .sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    pub fn with_sink(self, sink: Arc<dyn EventSink>) -> Self {
        self.subscribe(sink);
        self
    }

    /// Publish one event. Returns whether the run should keep going.
    pub async fn publish(&self, event: ExecutionEvent) -> bool {
        self.delivery.deliver(EventEnvelope::new(event)).await;
        !self.cancellation.is_cancelled()
    }

    /// Deliver everything still queued and stop the worker
    pub async fn close(&self) {
        self.delivery.close().await;
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("mode", &self.mode)
            .field(
                "subscribers",
                &self.sinks.sinks.read().unwrap_or_else(PoisonError::into_inner).len(),
            )
            .finish()
    }
}
