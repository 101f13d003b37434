//! Span decorator chain.
//!
//! # Responsibilities
//! - Let observers annotate the resolved span at phase entry and exit
//! - Preserve registration order
//! - Isolate decorator failures from the span lifecycle
//!
//! # Design Decisions
//! - Decorators only annotate: they never activate, deactivate or release
//!   the span handed to them
//! - A panicking decorator is logged and skipped; later decorators and the
//!   lifecycle steps still run

use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::attributes::{AttributeStore, HandlerId};
use crate::tracer::Span;

/// Observer invoked with the resolved span at both phase boundaries.
pub trait SpanDecorator: Send + Sync {
    /// Name used when reporting a misbehaving decorator.
    fn name(&self) -> &str {
        "span_decorator"
    }

    /// Called once the span is resolved on phase entry.
    fn on_entry(&self, _attrs: &dyn AttributeStore, _handler: &HandlerId, _span: &Span) {}

    /// Called on phase exit with the handler's error signal, if any.
    fn on_exit(
        &self,
        _attrs: &dyn AttributeStore,
        _handler: &HandlerId,
        _error: Option<&dyn Error>,
        _span: &Span,
    ) {
    }
}

/// Ordered decorators with an isolated failure domain.
pub(crate) struct DecoratorChain {
    decorators: Vec<Arc<dyn SpanDecorator>>,
}

impl DecoratorChain {
    pub(crate) fn new(decorators: Vec<Arc<dyn SpanDecorator>>) -> Self {
        DecoratorChain { decorators }
    }

    pub(crate) fn entry(&self, attrs: &dyn AttributeStore, handler: &HandlerId, span: &Span) {
        for decorator in &self.decorators {
            let call = catch_unwind(AssertUnwindSafe(|| decorator.on_entry(attrs, handler, span)));
            if call.is_err() {
                tracing::warn!(
                    decorator = decorator.name(),
                    handler = %handler,
                    "span decorator panicked during phase entry"
                );
            }
        }
    }

    pub(crate) fn exit(
        &self,
        attrs: &dyn AttributeStore,
        handler: &HandlerId,
        error: Option<&dyn Error>,
        span: &Span,
    ) {
        for decorator in &self.decorators {
            let call = catch_unwind(AssertUnwindSafe(|| {
                decorator.on_exit(attrs, handler, error, span)
            }));
            if call.is_err() {
                tracing::warn!(
                    decorator = decorator.name(),
                    handler = %handler,
                    "span decorator panicked during phase exit"
                );
            }
        }
    }
}

/// Standard decorator: tags the span with the handler identity and logs
/// the phase transitions, plus the handler error on exit.
pub struct HandlerTags;

impl SpanDecorator for HandlerTags {
    fn name(&self) -> &str {
        "handler_tags"
    }

    fn on_entry(&self, _attrs: &dyn AttributeStore, handler: &HandlerId, span: &Span) {
        span.set_tag("handler", handler.as_str());
        span.log([("event", "phase_entry"), ("handler", handler.as_str())]);
    }

    fn on_exit(
        &self,
        _attrs: &dyn AttributeStore,
        handler: &HandlerId,
        error: Option<&dyn Error>,
        span: &Span,
    ) {
        if let Some(error) = error {
            span.set_tag("error", true);
            span.log([
                ("event".to_string(), "error".to_string()),
                ("message".to_string(), error.to_string()),
            ]);
        }
        span.log([("event", "phase_exit"), ("handler", handler.as_str())]);
    }
}
