//! Transition event sinks

use std::sync::Mutex;
use tributary_core::domain::event::TransitionEvent;

/// Receives every run state transition after it has been persisted
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TransitionEvent);
}

/// Writes transitions as structured `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &TransitionEvent) {
        let stage = event.stage.map(|s| s.as_str()).unwrap_or("-");
        match &event.error {
            Some(err) => tracing::info!(
                target: "tributary::transition",
                run_id = %event.run_id,
                pipeline = %event.pipeline_name,
                stage,
                from = %event.from,
                to = %event.to,
                at = %event.at,
                error_class = %err.class,
                error_code = %err.code,
                error = %err.message,
                "run transition"
            ),
            None => tracing::info!(
                target: "tributary::transition",
                run_id = %event.run_id,
                pipeline = %event.pipeline_name,
                stage,
                from = %event.from,
                to = %event.to,
                at = %event.at,
                "run transition"
            ),
        }
    }
}

/// Keeps every event in memory, for assertions
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TransitionEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &TransitionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
