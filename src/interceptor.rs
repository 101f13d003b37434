//! Span continuation protocol.
//!
//! # Responsibilities
//! - Resolve the request's span on phase entry: the active slot, then the
//!   pending handoff continuation, then the upstream filter's root context
//! - Stash continuations so the span survives phase and thread boundaries
//! - Release every reference on phase exit so the span reports exactly
//!   once, at the outermost exit
//!
//! # Design Decisions
//! - Phase entry is idempotent per handler identity
//! - The shared pending slot is either consumed by the first nested entry
//!   or released at exit, never left dangling
//! - Decorator failures are isolated and never block the lifecycle
//! - A malformed value under a protocol key is logged and treated as absent

use std::error::Error;
use std::sync::Arc;

use crate::attributes::{AttributeStore, AttributeStoreExt, HandlerId, StoreKey};
use crate::decorator::{DecoratorChain, HandlerTags, SpanDecorator};
use crate::tracer::{Continuation, SpanContext, Tracer};

/// Propagates one logical span across the callback phases of a request.
pub struct TracingInterceptor {
    tracer: Tracer,
    decorators: DecoratorChain,
}

impl TracingInterceptor {
    /// Interceptor with the standard handler-tagging decorator.
    pub fn new(tracer: Tracer) -> Self {
        Self::with_decorators(tracer, vec![Arc::new(HandlerTags)])
    }

    /// Interceptor with an explicit decorator set, run in the given order.
    pub fn with_decorators(tracer: Tracer, decorators: Vec<Arc<dyn SpanDecorator>>) -> Self {
        TracingInterceptor {
            tracer,
            decorators: DecoratorChain::new(decorators),
        }
    }

    /// Phase entry. Returns whether dispatch should proceed; always `true`
    /// in the current design, `false` is reserved for future skip policies.
    pub fn on_phase_entry(&self, attrs: &mut dyn AttributeStore, handler: &HandlerId) -> bool {
        // A repeated entry for the same handler is a no-op.
        if attrs.contains(&StoreKey::HandlerContinuation(handler)) {
            return true;
        }

        let mut local_span = false;
        let span = match self.tracer.active_span() {
            Some(span) => span,
            None => {
                if let Some(pending) = self.take_continuation(attrs, &StoreKey::PendingContinuation)
                {
                    // Consume the handoff left by the enclosing phase.
                    pending.activate()
                } else if let Some(context) = attrs
                    .peek::<SpanContext>(&StoreKey::ServerSpanContext)
                    .copied()
                {
                    tracing::debug!(
                        handler = %handler,
                        trace_id = %context.trace_id,
                        "starting span from upstream root context"
                    );
                    local_span = true;
                    self.tracer
                        .build_span(handler.as_str())
                        .follows_from(&context)
                        .start_active()
                } else {
                    tracing::debug!(handler = %handler, "no span resolvable, proceeding untraced");
                    return true;
                }
            }
        };

        // The continuation the matching phase exit will consume.
        attrs.put(&StoreKey::HandlerContinuation(handler), span.capture());

        self.decorators.entry(&*attrs, handler, &span);

        // Handoff slot for a nested phase entry, should one occur before
        // this phase exits.
        attrs.put(&StoreKey::PendingContinuation, span.capture());

        // A locally started span must not stay active: no enclosing phase
        // will demote it. Its life continues through the stored captures.
        if local_span {
            span.deactivate();
        }

        true
    }

    /// Phase exit. Releases the pending handoff if no nested entry consumed
    /// it, then reactivates this handler's stored continuation, runs exit
    /// decorators, and releases it. The last release reports the span.
    pub fn on_phase_exit(
        &self,
        attrs: &mut dyn AttributeStore,
        handler: &HandlerId,
        error: Option<&dyn Error>,
    ) {
        // An unconsumed handoff would keep the span unreported forever.
        // Activate-then-deactivate releases the reference without touching
        // the handler-owned capture.
        if let Some(pending) = self.take_continuation(attrs, &StoreKey::PendingContinuation) {
            pending.activate().deactivate();
        }

        let Some(stored) = self.take_continuation(attrs, &StoreKey::HandlerContinuation(handler))
        else {
            // The matching entry resolved nothing, or this exit already ran.
            return;
        };

        let span = stored.activate();
        self.decorators.exit(&*attrs, handler, error, &span);
        span.deactivate();
    }

    fn take_continuation(
        &self,
        attrs: &mut dyn AttributeStore,
        key: &StoreKey<'_>,
    ) -> Option<Continuation> {
        match attrs.try_take::<Continuation>(key) {
            Ok(found) => found,
            Err(error) => {
                tracing::warn!(error = %error, "ignoring malformed continuation attribute");
                None
            }
        }
    }
}
