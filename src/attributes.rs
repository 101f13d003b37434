//! Per-request attribute store adapter.
//!
//! # Responsibilities
//! - Abstract the host framework's per-request key/value store
//! - Namespace and type the keys the protocol relies on
//! - Typed access over the untyped store surface
//!
//! # Design Decisions
//! - Object-safe trait over string keys and `Box<dyn Any + Send>` values,
//!   so any host store can adapt
//! - `StoreKey` is a typed composite key rendered to a namespaced string,
//!   replacing ad-hoc string concatenation
//! - A type-mismatched value is surfaced as an error and left in place

use std::any::{type_name, Any};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Namespace prefix for every key this crate writes.
pub const KEY_PREFIX: &str = "trace_interceptor";

/// Stable identifier of one handler invocation target. Repeated phase
/// entries for the same identity are detected through it; nested entries
/// for different identities proceed normally.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(Cow<'static, str>);

impl HandlerId {
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        HandlerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for HandlerId {
    fn from(id: &'static str) -> Self {
        HandlerId(Cow::Borrowed(id))
    }
}

impl From<String> for HandlerId {
    fn from(id: String) -> Self {
        HandlerId(Cow::Owned(id))
    }
}

/// Well-known keys in the per-request store.
#[derive(Debug)]
pub enum StoreKey<'a> {
    /// Shared handoff slot holding the continuation for the next phase.
    PendingContinuation,
    /// Continuation owned by one handler's entry/exit pair.
    HandlerContinuation(&'a HandlerId),
    /// Root span context established by the upstream request-tracing
    /// filter. Read-only here.
    ServerSpanContext,
}

impl StoreKey<'_> {
    /// String form under which the value lives in the host store.
    pub fn render(&self) -> Cow<'static, str> {
        match self {
            StoreKey::PendingContinuation => {
                Cow::Borrowed("trace_interceptor.pending_continuation")
            }
            StoreKey::HandlerContinuation(handler) => {
                Cow::Owned(format!("{KEY_PREFIX}.continuation.{handler}"))
            }
            StoreKey::ServerSpanContext => {
                Cow::Borrowed("trace_interceptor.server_span_context")
            }
        }
    }
}

/// A well-known key held a value of the wrong type.
#[derive(Debug, thiserror::Error)]
#[error("attribute {key:?} holds a value of unexpected type (wanted {expected})")]
pub struct AttributeTypeError {
    pub key: String,
    pub expected: &'static str,
}

/// Host-owned per-request key/value store. Lifetime of the entries is one
/// inbound request; the host guarantees single-phase access, so no
/// internal locking is required.
pub trait AttributeStore {
    fn get_raw(&self, key: &str) -> Option<&(dyn Any + Send)>;
    fn set_raw(&mut self, key: &str, value: Box<dyn Any + Send>);
    fn take_raw(&mut self, key: &str) -> Option<Box<dyn Any + Send>>;
}

/// Typed convenience layer over [`AttributeStore`].
pub trait AttributeStoreExt: AttributeStore {
    fn contains(&self, key: &StoreKey<'_>) -> bool {
        self.get_raw(&key.render()).is_some()
    }

    fn peek<T: Any>(&self, key: &StoreKey<'_>) -> Option<&T> {
        self.get_raw(&key.render())
            .and_then(|value| value.downcast_ref::<T>())
    }

    fn put<T: Any + Send>(&mut self, key: &StoreKey<'_>, value: T) {
        self.set_raw(&key.render(), Box::new(value));
    }

    /// Remove and downcast. A mismatched value is put back untouched and
    /// reported as an error.
    fn try_take<T: Any>(&mut self, key: &StoreKey<'_>) -> Result<Option<T>, AttributeTypeError> {
        let rendered = key.render();
        match self.take_raw(&rendered) {
            None => Ok(None),
            Some(value) => match value.downcast::<T>() {
                Ok(value) => Ok(Some(*value)),
                Err(value) => {
                    self.set_raw(&rendered, value);
                    Err(AttributeTypeError {
                        key: rendered.into_owned(),
                        expected: type_name::<T>(),
                    })
                }
            },
        }
    }
}

impl<S: AttributeStore + ?Sized> AttributeStoreExt for S {}

/// HashMap-backed store; the reference implementation for hosts that do
/// not bring their own.
#[derive(Default)]
pub struct RequestAttributes {
    entries: HashMap<String, Box<dyn Any + Send>>,
}

impl RequestAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AttributeStore for RequestAttributes {
    fn get_raw(&self, key: &str) -> Option<&(dyn Any + Send)> {
        self.entries.get(key).map(|boxed| boxed.as_ref())
    }

    fn set_raw(&mut self, key: &str, value: Box<dyn Any + Send>) {
        self.entries.insert(key.to_string(), value);
    }

    fn take_raw(&mut self, key: &str) -> Option<Box<dyn Any + Send>> {
        self.entries.remove(key)
    }
}
