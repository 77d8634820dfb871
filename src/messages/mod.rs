//! Execution messages
//!
//! Structured events, the bus that carries them, and stock subscribers.

mod bus;
mod events;
mod sink;

pub use bus::{DeliveryMode, MessageBus, QUEUE_CAPACITY};
pub use events::{EventEnvelope, ExecutionEvent};
pub use sink::{EventLog, EventSink, StopOnFirstFailure, TracingSink};
