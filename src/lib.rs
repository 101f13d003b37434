//! Request-phase span propagation.
//!
//! Carries one logical trace span across the framework-invoked callback
//! phases of an inbound request (before phase, after phase, and nested
//! sub-handler invocations in between), using reactivatable continuations
//! stashed in the per-request attribute store. The span is resolved once
//! per handler identity, handed across phase and thread boundaries, and
//! reported exactly once when its last owning reference is released.

pub mod attributes;
pub mod decorator;
pub mod dispatch;
pub mod interceptor;
pub mod tracer;

pub use attributes::{AttributeStore, AttributeStoreExt, HandlerId, RequestAttributes, StoreKey};
pub use decorator::{HandlerTags, SpanDecorator};
pub use dispatch::{HandlerError, PhaseDispatch};
pub use interceptor::TracingInterceptor;
pub use tracer::{Continuation, MemoryRecorder, Span, SpanContext, Tracer};
