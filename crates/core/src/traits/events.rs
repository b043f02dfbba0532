use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::events::EventEnvelope;

/// Trait for emitting structured events.
///
/// Emission is synchronous: sinks are called from the tick loop and must not block.
pub trait EventSink: Send + Sync {
    /// Emit an event.
    fn emit(&self, event: EventEnvelope);
}

/// No-op implementation for testing/default.
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: EventEnvelope) {}
}

/// Fans events out to any number of async subscribers.
///
/// Lagging subscribers lose the oldest events; the tick loop never waits.
pub struct BroadcastEventSink {
    tx: broadcast::Sender<EventEnvelope>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: EventEnvelope) {
        // No receivers is not an error.
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory. Used by tests.
#[derive(Default, Clone)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, event_type: &crate::events::EventType) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| &e.event_type == event_type)
            .count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: EventEnvelope) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Convenience for sharing a sink behind an `Arc`.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}
