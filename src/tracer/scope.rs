//! Thread-local active-span slot.
//!
//! The stack holds non-owning references: activation marks a span current
//! on this thread but can never extend its lifetime. Dead entries are
//! pruned on lookup.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use super::span::SpanShared;

thread_local! {
    static ACTIVE: RefCell<Vec<Weak<SpanShared>>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn push(shared: &Arc<SpanShared>) {
    ACTIVE.with(|stack| stack.borrow_mut().push(Arc::downgrade(shared)));
}

/// Remove the topmost entry for this span, if present.
pub(crate) fn pop(shared: &Arc<SpanShared>) {
    ACTIVE.with(|stack| {
        let mut stack = stack.borrow_mut();
        if let Some(index) = stack
            .iter()
            .rposition(|entry| entry.as_ptr() == Arc::as_ptr(shared))
        {
            stack.remove(index);
        }
    });
}

/// Topmost live entry; dead entries above it are discarded.
pub(crate) fn current() -> Option<Arc<SpanShared>> {
    ACTIVE.with(|stack| {
        let mut stack = stack.borrow_mut();
        while let Some(top) = stack.last() {
            if let Some(live) = top.upgrade() {
                return Some(live);
            }
            stack.pop();
        }
        None
    })
}
