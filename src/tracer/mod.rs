//! Tracer abstraction consumed by the continuation protocol.
//!
//! # Responsibilities
//! - Create spans, optionally with causal references
//! - Track the active span per thread
//! - Hand released spans to a pluggable recorder
//!
//! # Design Decisions
//! - Ownership is the reference count: `Span` and `Continuation` are owning
//!   handles, and the recorder sees the span when the last one goes away
//! - The active slot is thread-local and non-owning
//! - Export and sampling stay external, behind the `SpanRecorder` trait

pub mod recorder;
mod scope;
pub mod span;

pub use recorder::{FinishedSpan, LogRecord, MemoryRecorder, NullRecorder, SpanRecorder};
pub use span::{
    Continuation, ReferenceKind, Span, SpanContext, SpanId, SpanReference, TagValue, TraceId,
};

use std::collections::HashMap;
use std::sync::Arc;

/// Entry point for creating spans and querying the active one.
#[derive(Clone)]
pub struct Tracer {
    recorder: Arc<dyn SpanRecorder>,
}

impl Tracer {
    pub fn new(recorder: Arc<dyn SpanRecorder>) -> Self {
        Tracer { recorder }
    }

    /// Tracer that drops everything it records.
    pub fn noop() -> Self {
        Tracer::new(Arc::new(NullRecorder))
    }

    /// The span currently active on this thread, if any. The returned
    /// handle is an owning reference and releases itself on drop.
    pub fn active_span(&self) -> Option<Span> {
        scope::current().map(|shared| Span { shared })
    }

    /// Start describing a new span.
    pub fn build_span(&self, operation_name: impl Into<String>) -> SpanBuilder {
        SpanBuilder {
            recorder: self.recorder.clone(),
            operation_name: operation_name.into(),
            references: Vec::new(),
            tags: HashMap::new(),
        }
    }
}

/// Builder for a new span.
pub struct SpanBuilder {
    recorder: Arc<dyn SpanRecorder>,
    operation_name: String,
    references: Vec<SpanReference>,
    tags: HashMap<String, TagValue>,
}

impl SpanBuilder {
    /// Add a follows-from reference to the given context.
    pub fn follows_from(mut self, context: &SpanContext) -> Self {
        self.references.push(SpanReference {
            kind: ReferenceKind::FollowsFrom,
            context: *context,
        });
        self
    }

    /// Add a child-of reference to the given context.
    pub fn child_of(mut self, context: &SpanContext) -> Self {
        self.references.push(SpanReference {
            kind: ReferenceKind::ChildOf,
            context: *context,
        });
        self
    }

    /// Attach a tag before the span starts.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Start the span without activating it. The trace id is inherited
    /// from the first reference, if any.
    pub fn start(self) -> Span {
        let trace_id = self
            .references
            .first()
            .map(|reference| reference.context.trace_id)
            .unwrap_or_else(TraceId::random);
        let context = SpanContext {
            trace_id,
            span_id: SpanId::random(),
        };
        Span::new(
            context,
            self.operation_name,
            self.references,
            self.tags,
            self.recorder,
        )
    }

    /// Start the span and make it active on the current thread.
    pub fn start_active(self) -> Span {
        let span = self.start();
        scope::push(&span.shared);
        span
    }
}
