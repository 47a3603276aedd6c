//! Structured event stream for external log aggregation
//!
//! The JSON shape of [`LogEvent`] is a compatibility contract: field names,
//! level and category spellings must not change.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Lifecycle,
    Crawl,
    Extraction,
    Network,
    Db,
    CircuitBreaker,
    Validation,
    Security,
    Performance,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lifecycle => "lifecycle",
            Self::Crawl => "crawl",
            Self::Extraction => "extraction",
            Self::Network => "network",
            Self::Db => "db",
            Self::CircuitBreaker => "circuit_breaker",
            Self::Validation => "validation",
            Self::Security => "security",
            Self::Performance => "performance",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One significant state change or error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub category: EventCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
    /// Optional structured fields such as `url`, `portal` or counts
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
}

impl LogEvent {
    pub fn new(level: EventLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            category,
            message: message.into(),
            run_id: None,
            context: Map::new(),
        }
    }

    /// Adds a context field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn with_run(mut self, run_id: Option<i64>) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Destination for [`LogEvent`]s
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LogEvent);
}

/// Re-emits events as `tracing` records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &LogEvent) {
        let category = event.category.as_str();
        let context = Value::Object(event.context.clone());
        match event.level {
            EventLevel::Debug => {
                tracing::debug!(category, run_id = ?event.run_id, %context, "{}", event.message)
            }
            EventLevel::Info => {
                tracing::info!(category, run_id = ?event.run_id, %context, "{}", event.message)
            }
            EventLevel::Warn => {
                tracing::warn!(category, run_id = ?event.run_id, %context, "{}", event.message)
            }
            EventLevel::Error => {
                tracing::error!(category, run_id = ?event.run_id, %context, "{}", event.message)
            }
            EventLevel::Critical => {
                tracing::error!(critical = true, category, run_id = ?event.run_id, %context, "{}", event.message)
            }
        }
    }
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LogEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, category: EventCategory) -> usize {
        self.events.lock().iter().filter(|e| e.category == category).count()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.message.clone()).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &LogEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Sends events to a sink, stamping the current run id
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn EventSink>,
    run_id: Option<i64>,
}

impl Emitter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink, run_id: None }
    }

    /// A copy of this emitter bound to `run_id`
    pub fn for_run(&self, run_id: i64) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            run_id: Some(run_id),
        }
    }

    pub fn run_id(&self) -> Option<i64> {
        self.run_id
    }

    pub fn emit(&self, event: LogEvent) {
        let event = if event.run_id.is_none() {
            event.with_run(self.run_id)
        } else {
            event
        };
        self.sink.emit(&event);
    }

    pub fn info(&self, category: EventCategory, message: impl Into<String>) {
        self.emit(LogEvent::new(EventLevel::Info, category, message));
    }

    pub fn warn(&self, category: EventCategory, message: impl Into<String>) {
        self.emit(LogEvent::new(EventLevel::Warn, category, message));
    }

    pub fn error(&self, category: EventCategory, message: impl Into<String>) {
        self.emit(LogEvent::new(EventLevel::Error, category, message));
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}
