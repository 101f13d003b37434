//! Span export seam.
//!
//! Sampling, batching and wire export live behind [`SpanRecorder`]; this
//! crate only hands over spans whose last owning reference was released.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use super::span::{SpanContext, SpanReference, TagValue};

/// One timestamped set of log fields attached to a span.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: SystemTime,
    pub fields: Vec<(String, String)>,
}

/// A span whose last owning reference has been released.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinishedSpan {
    pub context: SpanContext,
    pub operation_name: String,
    pub references: Vec<SpanReference>,
    pub tags: HashMap<String, TagValue>,
    pub logs: Vec<LogRecord>,
    pub start_time: SystemTime,
    pub duration: Duration,
}

impl FinishedSpan {
    /// Look up a tag by key.
    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(key)
    }

    /// Whether any log record carries `event = <name>`.
    pub fn has_log_event(&self, event: &str) -> bool {
        self.logs
            .iter()
            .any(|record| record.fields.iter().any(|(k, v)| k == "event" && v == event))
    }
}

/// Receives released spans.
pub trait SpanRecorder: Send + Sync {
    fn record(&self, span: FinishedSpan);
}

/// Discards every span.
pub struct NullRecorder;

impl SpanRecorder for NullRecorder {
    fn record(&self, _span: FinishedSpan) {}
}

/// Retains finished spans in memory for inspection.
#[derive(Default)]
pub struct MemoryRecorder {
    finished: Mutex<Vec<FinishedSpan>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn finished(&self) -> Vec<FinishedSpan> {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SpanRecorder for MemoryRecorder {
    fn record(&self, span: FinishedSpan) {
        tracing::debug!(
            trace_id = %span.context.trace_id,
            span_id = %span.context.span_id,
            operation = %span.operation_name,
            "span finished"
        );
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(span);
    }
}
