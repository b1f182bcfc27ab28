//! TracingEventSink - DomainEvent を tracing に流す EventSink

use tracing::{info, warn};

use crate::domain::DomainEvent;
use crate::ports::EventSink;

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &DomainEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        if event.is_failure() {
            warn!(key = event.key(), payload = %payload);
        } else {
            info!(key = event.key(), payload = %payload);
        }
    }
}
