//! The async hand-off marker.
//!
//! [`AsyncSession`](crate::AsyncSession) runs every database call on a
//! blocking worker with the marker entered. Instances of an async session
//! consult it before lazy-loading: outside the marker they fail with
//! [`Error::MissingHandoff`](sqlmodel_core::Error::MissingHandoff) instead of
//! blocking the caller's thread.

use std::cell::Cell;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Keeps the marker entered on this thread until dropped.
#[must_use = "the hand-off ends when the guard is dropped"]
pub struct HandoffGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

/// Enter the hand-off on the current thread. Nested entries are allowed.
pub fn enter() -> HandoffGuard {
    DEPTH.with(|d| d.set(d.get() + 1));
    HandoffGuard {
        _not_send: std::marker::PhantomData,
    }
}

impl Drop for HandoffGuard {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// True if the current thread is inside the hand-off.
#[must_use]
pub fn is_active() -> bool {
    DEPTH.with(|d| d.get() > 0)
}
