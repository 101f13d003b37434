//! Dispatch adapter for callback-based hosts.
//!
//! Thin glue translating a host framework's before/after callbacks into
//! protocol calls. `run` wraps a whole phase and guarantees the exit call
//! on every path out of the handler, including panics.

use std::error::Error;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::attributes::{AttributeStore, HandlerId};
use crate::interceptor::TracingInterceptor;

/// Error produced by a handler; passed to exit decorators as data, never
/// as control flow.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Translates host callbacks into continuation-protocol calls.
#[derive(Clone)]
pub struct PhaseDispatch {
    interceptor: Arc<TracingInterceptor>,
}

impl PhaseDispatch {
    pub fn new(interceptor: Arc<TracingInterceptor>) -> Self {
        PhaseDispatch { interceptor }
    }

    /// Host "before" callback.
    pub fn before(&self, attrs: &mut dyn AttributeStore, handler: &HandlerId) -> bool {
        self.interceptor.on_phase_entry(attrs, handler)
    }

    /// Host "after" callback.
    pub fn after(
        &self,
        attrs: &mut dyn AttributeStore,
        handler: &HandlerId,
        error: Option<&dyn Error>,
    ) {
        self.interceptor.on_phase_exit(attrs, handler, error);
    }

    /// Run one whole phase: entry, handler, exit.
    pub fn run<T>(
        &self,
        attrs: &mut dyn AttributeStore,
        handler: &HandlerId,
        f: impl FnOnce(&mut dyn AttributeStore) -> Result<T, HandlerError>,
    ) -> Result<T, HandlerError> {
        if !self.interceptor.on_phase_entry(attrs, handler) {
            // Reserved skip policy: no entry bookkeeping happened, so no
            // exit bookkeeping is owed.
            return f(attrs);
        }
        match catch_unwind(AssertUnwindSafe(|| f(&mut *attrs))) {
            Ok(result) => {
                let error = result.as_ref().err().map(|e| &**e as &dyn Error);
                self.interceptor.on_phase_exit(attrs, handler, error);
                result
            }
            Err(panic) => {
                self.interceptor.on_phase_exit(attrs, handler, None);
                resume_unwind(panic)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::attributes::{AttributeStoreExt, RequestAttributes, StoreKey};
    use crate::tracer::{MemoryRecorder, SpanContext, SpanId, TagValue, TraceId, Tracer};

    fn dispatch_with_recorder() -> (Arc<MemoryRecorder>, PhaseDispatch) {
        let recorder = Arc::new(MemoryRecorder::new());
        let interceptor = Arc::new(TracingInterceptor::new(Tracer::new(recorder.clone())));
        (recorder, PhaseDispatch::new(interceptor))
    }

    fn attrs_with_root_context() -> RequestAttributes {
        let mut attrs = RequestAttributes::new();
        attrs.put(
            &StoreKey::ServerSpanContext,
            SpanContext {
                trace_id: TraceId::random(),
                span_id: SpanId::random(),
            },
        );
        attrs
    }

    #[test]
    fn test_run_finishes_span_on_success() {
        let (recorder, dispatch) = dispatch_with_recorder();
        let mut attrs = attrs_with_root_context();

        let result = dispatch.run(&mut attrs, &HandlerId::from("ok"), |_attrs| Ok(42));

        assert_eq!(result.unwrap(), 42);
        let finished = recorder.finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].tag("error"), None);
    }

    #[test]
    fn test_run_passes_handler_error_to_decorators() {
        let (recorder, dispatch) = dispatch_with_recorder();
        let mut attrs = attrs_with_root_context();

        let result: Result<(), HandlerError> =
            dispatch.run(&mut attrs, &HandlerId::from("failing"), |_attrs| {
                Err("backend unavailable".into())
            });

        assert!(result.is_err());
        let finished = recorder.finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].tag("error"), Some(&TagValue::Bool(true)));
        assert!(finished[0].has_log_event("error"));
    }

    #[test]
    fn test_run_finishes_span_on_panic() {
        let (recorder, dispatch) = dispatch_with_recorder();
        let mut attrs = attrs_with_root_context();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _: Result<(), HandlerError> =
                dispatch.run(&mut attrs, &HandlerId::from("panicking"), |_attrs| {
                    panic!("handler blew up")
                });
        }));

        assert!(outcome.is_err(), "Panic should propagate after cleanup");
        assert_eq!(
            recorder.finished().len(),
            1,
            "Span should still be finished when the handler panics"
        );
    }
}
