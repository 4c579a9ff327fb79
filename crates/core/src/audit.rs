//! Audit collaborator interface.
//!
//! The engine emits one structured [`AuditEvent`] per diff, merge, detection
//! and resolution. It never reads events back; persisting them is the job of
//! whatever [`AuditSink`] the caller injects.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Kind of audited action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    DiffCalculated,
    MergePerformed,
    ConflictDetected,
    ConflictResolved,
    ConflictReopened,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DiffCalculated => write!(f, "DIFF_CALCULATED"),
            Self::MergePerformed => write!(f, "MERGE_PERFORMED"),
            Self::ConflictDetected => write!(f, "CONFLICT_DETECTED"),
            Self::ConflictResolved => write!(f, "CONFLICT_RESOLVED"),
            Self::ConflictReopened => write!(f, "CONFLICT_REOPENED"),
        }
    }
}

/// A structured audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub payload: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl AuditEvent {
    /// Start an event of the given type, timestamped now.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            payload: BTreeMap::new(),
            timestamp: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Add a payload field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Add a payload field only when a value is present.
    pub fn with_opt(self, key: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Look up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Receiver of audit events. Implementations must not block for long: they
/// are called synchronously on the diff/merge path.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Writes every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let payload = serde_json::to_string(&event.payload).unwrap_or_default();
        info!(
            target: "docmerge::audit",
            event_type = %event.event_type,
            duration_ms = event.duration_ms,
            timestamp = %event.timestamp.to_rfc3339(),
            payload = %payload,
            "audit event"
        );
    }
}

/// Buffers events in memory, for callers that forward them in batches and
/// for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events of one type, in emission order.
    pub fn events_of(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        // A poisoned buffer still accepts events.
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(event);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn emit(&self, _event: AuditEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = AuditEvent::new(AuditEventType::MergePerformed)
            .with("strategy", "recursive")
            .with("conflict_count", 2)
            .with_opt("source_version", None::<String>)
            .with_opt("target_version", Some("v2"))
            .with_duration(Duration::from_millis(42));

        assert_eq!(event.get("strategy"), Some(&Value::from("recursive")));
        assert_eq!(event.get("conflict_count"), Some(&Value::from(2)));
        assert!(event.get("source_version").is_none());
        assert_eq!(event.get("target_version"), Some(&Value::from("v2")));
        assert_eq!(event.duration_ms, 42);
    }

    #[test]
    fn test_memory_sink_records_and_filters() {
        let sink = MemoryAuditSink::new();
        sink.emit(AuditEvent::new(AuditEventType::DiffCalculated));
        sink.emit(AuditEvent::new(AuditEventType::ConflictResolved));
        sink.emit(AuditEvent::new(AuditEventType::DiffCalculated));

        assert_eq!(sink.events().len(), 3);
        assert_eq!(sink.events_of(AuditEventType::DiffCalculated).len(), 2);
        assert_eq!(sink.drain().len(), 3);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_type_serializes_screaming_case() {
        let event = AuditEvent::new(AuditEventType::ConflictDetected);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"CONFLICT_DETECTED\""));
        assert_eq!(
            AuditEventType::ConflictDetected.to_string(),
            "CONFLICT_DETECTED"
        );
    }

    #[test]
    fn test_tracing_and_null_sinks_accept_events() {
        TracingAuditSink.emit(AuditEvent::new(AuditEventType::MergePerformed).with("k", "v"));
        NullAuditSink.emit(AuditEvent::new(AuditEventType::MergePerformed));
    }
}
