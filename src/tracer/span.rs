//! Span handles, continuations, and correlation data.
//!
//! Ownership is the reference count: every [`Span`] and every
//! [`Continuation`] holds one owning reference to the shared span state.
//! The span is reported to the recorder exactly once, when the last owning
//! reference is released. "Active" is tracked separately, as a non-owning
//! thread-local slot, so activation never extends a span's lifetime.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::recorder::{FinishedSpan, LogRecord, SpanRecorder};
use super::scope;

/// Identifier shared by every span of one trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(Uuid);

impl TraceId {
    /// Generate a fresh trace id.
    pub fn random() -> Self {
        TraceId(Uuid::new_v4())
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a single span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(Uuid);

impl SpanId {
    /// Generate a fresh span id.
    pub fn random() -> Self {
        SpanId(Uuid::new_v4())
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Correlation data of a span, sufficient to reference it causally without
/// holding the span itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

/// Kind of causal link between spans.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// The referenced span encloses this one.
    ChildOf,
    /// The referenced span logically precedes this one without enclosing it.
    FollowsFrom,
}

/// A causal reference carried by a span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanReference {
    pub kind: ReferenceKind,
    pub context: SpanContext,
}

/// Value of a span tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TagValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Str(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Str(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Float(value)
    }
}

#[derive(Default)]
pub(crate) struct SpanData {
    pub(crate) operation_name: String,
    pub(crate) references: Vec<SpanReference>,
    pub(crate) tags: HashMap<String, TagValue>,
    pub(crate) logs: Vec<LogRecord>,
}

/// State shared by all handles on one span. Dropping the last handle
/// reports the span.
pub(crate) struct SpanShared {
    context: SpanContext,
    start_time: SystemTime,
    started_at: Instant,
    recorder: Arc<dyn SpanRecorder>,
    data: Mutex<SpanData>,
}

impl Drop for SpanShared {
    fn drop(&mut self) {
        let data = mem::take(self.data.get_mut().unwrap_or_else(PoisonError::into_inner));
        self.recorder.record(FinishedSpan {
            context: self.context,
            operation_name: data.operation_name,
            references: data.references,
            tags: data.tags,
            logs: data.logs,
            start_time: self.start_time,
            duration: self.started_at.elapsed(),
        });
    }
}

/// Owning handle on a live span.
pub struct Span {
    pub(crate) shared: Arc<SpanShared>,
}

impl Span {
    pub(crate) fn new(
        context: SpanContext,
        operation_name: String,
        references: Vec<SpanReference>,
        tags: HashMap<String, TagValue>,
        recorder: Arc<dyn SpanRecorder>,
    ) -> Self {
        Span {
            shared: Arc::new(SpanShared {
                context,
                start_time: SystemTime::now(),
                started_at: Instant::now(),
                recorder,
                data: Mutex::new(SpanData {
                    operation_name,
                    references,
                    tags,
                    logs: Vec::new(),
                }),
            }),
        }
    }

    /// Correlation data of this span.
    pub fn context(&self) -> SpanContext {
        self.shared.context
    }

    /// Operation name the span was started with.
    pub fn operation_name(&self) -> String {
        self.lock_data().operation_name.clone()
    }

    /// Capture a reactivatable reference to this span. The capture keeps
    /// the span alive until it is activated and released.
    pub fn capture(&self) -> Continuation {
        Continuation {
            shared: self.shared.clone(),
        }
    }

    /// Demote the span from the current thread's active slot and release
    /// this handle's reference.
    pub fn deactivate(self) {
        scope::pop(&self.shared);
    }

    /// Attach or overwrite a tag.
    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.lock_data().tags.insert(key.into(), value.into());
    }

    /// Append a timestamped log record.
    pub fn log<K, V>(&self, fields: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let record = LogRecord {
            timestamp: SystemTime::now(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        };
        self.lock_data().logs.push(record);
    }

    fn lock_data(&self) -> std::sync::MutexGuard<'_, SpanData> {
        self.shared.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("context", &self.shared.context)
            .finish_non_exhaustive()
    }
}

/// Transferable, reactivatable capture of a span. Safe to hand to another
/// thread; holding one keeps the span alive without it being active
/// anywhere.
pub struct Continuation {
    pub(crate) shared: Arc<SpanShared>,
}

impl Continuation {
    /// Correlation data of the captured span.
    pub fn context(&self) -> SpanContext {
        self.shared.context
    }

    /// Make the span active on the calling thread, consuming this capture.
    /// `activate().deactivate()` is the pure release path.
    pub fn activate(self) -> Span {
        scope::push(&self.shared);
        Span {
            shared: self.shared,
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("context", &self.shared.context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::tracer::{MemoryRecorder, ReferenceKind, Tracer};

    fn recording_tracer() -> (Arc<MemoryRecorder>, Tracer) {
        let recorder = Arc::new(MemoryRecorder::new());
        let tracer = Tracer::new(recorder.clone());
        (recorder, tracer)
    }

    #[test]
    fn test_report_fires_on_last_release() {
        let (recorder, tracer) = recording_tracer();
        let span = tracer.build_span("work").start();
        let cont = span.capture();

        drop(span);
        assert!(
            recorder.finished().is_empty(),
            "Capture should keep the span unreported"
        );

        cont.activate().deactivate();
        let finished = recorder.finished();
        assert_eq!(finished.len(), 1, "Last release should report once");
        assert_eq!(finished[0].operation_name, "work");
    }

    #[test]
    fn test_multiple_captures_release_in_any_order() {
        let (recorder, tracer) = recording_tracer();
        let span = tracer.build_span("work").start();
        let first = span.capture();
        let second = span.capture();
        span.deactivate();

        second.activate().deactivate();
        assert!(recorder.finished().is_empty());
        first.activate().deactivate();
        assert_eq!(recorder.finished().len(), 1);
    }

    #[test]
    fn test_active_slot_follows_activation() {
        let (_recorder, tracer) = recording_tracer();
        assert!(tracer.active_span().is_none());

        let span = tracer.build_span("work").start_active();
        let context = span.context();
        let seen = tracer.active_span().expect("span should be active");
        assert_eq!(seen.context(), context);

        drop(seen);
        span.deactivate();
        assert!(tracer.active_span().is_none());
    }

    #[test]
    fn test_follows_from_inherits_trace_id() {
        let (recorder, tracer) = recording_tracer();
        let parent = tracer.build_span("parent").start();
        let parent_ctx = parent.context();

        let child = tracer.build_span("child").follows_from(&parent_ctx).start();
        assert_eq!(child.context().trace_id, parent_ctx.trace_id);
        assert_ne!(child.context().span_id, parent_ctx.span_id);

        drop(child);
        let finished = recorder.finished();
        assert_eq!(finished[0].references.len(), 1);
        assert_eq!(finished[0].references[0].kind, ReferenceKind::FollowsFrom);
        assert_eq!(finished[0].references[0].context, parent_ctx);
    }

    #[test]
    fn test_tags_and_logs_survive_into_report() {
        let (recorder, tracer) = recording_tracer();
        let span = tracer.build_span("work").start();
        span.set_tag("component", "test");
        span.set_tag("error", false);
        span.log([("event", "checkpoint")]);
        drop(span);

        let finished = recorder.finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(
            finished[0].tag("component"),
            Some(&crate::tracer::TagValue::Str("test".into()))
        );
        assert!(finished[0].has_log_event("checkpoint"));
    }
}
