//! RAII guard for frame-scoped handle release

use std::ops::{Deref, DerefMut};

use super::Scope;

/// Owns one frame of a [`Scope`] for as long as it lives.
///
/// The guard remembers how deep the scope was before its frame was pushed.
/// Dropping it unwinds back to that depth on every exit path: falling off
/// the end of the block, an early `return`, `?` propagation, or unwinding.
/// Frames pushed through the guard and left open are closed with it; if the
/// guard's own frame was already popped, dropping it releases nothing.
///
/// # Example
///
/// ```
/// use custody::{Scope, SharedHandle};
///
/// let owner = SharedHandle::allocate(String::from("Ash"));
/// let mut scope = Scope::new();
///
/// {
///     let mut guard = scope.scope_guard();
///     guard.hold("friend", owner.share());
///     assert_eq!(owner.strong_count(), 2);
/// }
/// // guard dropped, frame popped, the extra owner is released
/// assert_eq!(owner.strong_count(), 1);
/// assert!(scope.is_empty());
/// ```
pub struct ScopeGuard<'a> {
    scope: &'a mut Scope,
    base_depth: usize,
}

impl Scope {
    /// Enter a frame owned by the returned guard.
    pub fn scope_guard(&mut self) -> ScopeGuard<'_> {
        let base_depth = self.depth();
        self.push_frame();
        ScopeGuard {
            scope: self,
            base_depth,
        }
    }
}

impl ScopeGuard<'_> {
    /// Depth the scope returns to when this guard is dropped.
    pub fn base_depth(&self) -> usize {
        self.base_depth
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.scope.unwind_to(self.base_depth);
    }
}

impl Deref for ScopeGuard<'_> {
    type Target = Scope;

    fn deref(&self) -> &Scope {
        self.scope
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Scope {
        self.scope
    }
}
