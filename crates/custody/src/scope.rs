//! Frame-based scoped ownership

mod guard;

pub use guard::ScopeGuard;

use std::any::Any;

use crate::exclusive::ExclusiveHandle;
use crate::shared::{SharedHandle, WeakHandle};

/// A handle that can be held by a [`Scope`].
///
/// Implemented for the three handle types.
pub trait Handle: Any {
    /// Whether the handle still refers to a live value.
    fn is_live(&self) -> bool;

    #[doc(hidden)]
    fn as_any(&self) -> &dyn Any;

    #[doc(hidden)]
    fn as_any_mut(&mut self) -> &mut dyn Any;

    #[doc(hidden)]
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: 'static> Handle for ExclusiveHandle<T> {
    fn is_live(&self) -> bool {
        !self.is_null()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl<T: 'static> Handle for SharedHandle<T> {
    fn is_live(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl<T: 'static> Handle for WeakHandle<T> {
    fn is_live(&self) -> bool {
        !self.is_expired()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A named handle held by a scope.
struct Binding {
    name: String,
    handle: Box<dyn Handle>,
}

/// Handles grouped into nested frames, released when their frame ends.
///
/// Uses a flat binding list with frame boundaries. Popping a frame releases
/// the handles acquired in it in reverse acquisition order, the same order
/// in which locals of a block are dropped.
///
/// # Example
///
/// ```
/// use custody::{Scope, SharedHandle};
///
/// let owner = SharedHandle::allocate("Moris");
/// let mut scope = Scope::new();
///
/// scope.push_frame();
/// scope.hold("temp", owner.share());
/// assert_eq!(owner.strong_count(), 2);
///
/// scope.pop_frame();
/// assert_eq!(owner.strong_count(), 1);
/// ```
pub struct Scope {
    /// All bindings in a flat array (most recent at end)
    bindings: Vec<Binding>,

    /// Frame boundaries (indices into bindings)
    frames: Vec<usize>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    /// Create a scope with only the outermost frame.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            frames: vec![0],
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Frame Management
    // ═══════════════════════════════════════════════════════════════════

    /// Enter a new frame.
    pub fn push_frame(&mut self) {
        self.frames.push(self.bindings.len());
    }

    /// Leave the current frame, releasing the handles it holds.
    ///
    /// Does nothing at the outermost frame.
    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            if let Some(boundary) = self.frames.pop() {
                let released = self.release_to(boundary);
                tracing::debug!(depth = self.depth(), released, "scope frame popped");
            }
        }
    }

    /// Pop frames until only `depth` remain, newest first.
    ///
    /// Frames already popped below `depth` are left alone.
    pub(crate) fn unwind_to(&mut self, depth: usize) {
        while self.depth() > depth.max(1) {
            self.pop_frame();
        }
    }

    /// Number of frames, including the outermost.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether only the outermost frame is active.
    pub fn is_outermost(&self) -> bool {
        self.depth() == 1
    }

    fn frame_start(&self) -> usize {
        self.frames.last().copied().unwrap_or(0)
    }

    /// Drop bindings from the end down to `boundary`, newest first.
    fn release_to(&mut self, boundary: usize) -> usize {
        let mut released = 0;
        while self.bindings.len() > boundary {
            if let Some(binding) = self.bindings.pop() {
                drop(binding);
                released += 1;
            }
        }
        released
    }

    // ═══════════════════════════════════════════════════════════════════
    // Holding Handles
    // ═══════════════════════════════════════════════════════════════════

    /// Hold `handle` in the current frame under `name`.
    ///
    /// A later binding with the same name shadows earlier ones.
    pub fn hold<H: Handle>(&mut self, name: impl Into<String>, handle: H) {
        self.bindings.push(Binding {
            name: name.into(),
            handle: Box::new(handle),
        });
    }

    fn position<H: Handle>(&self, name: &str) -> Option<usize> {
        self.bindings
            .iter()
            .rposition(|b| b.name == name && b.handle.as_any().is::<H>())
    }

    /// Look up the most recent handle of type `H` bound to `name`.
    pub fn get<H: Handle>(&self, name: &str) -> Option<&H> {
        let idx = self.position::<H>(name)?;
        self.bindings[idx].handle.as_any().downcast_ref()
    }

    /// Mutable lookup, e.g. to transfer out of a held exclusive handle.
    pub fn get_mut<H: Handle>(&mut self, name: &str) -> Option<&mut H> {
        let idx = self.position::<H>(name)?;
        self.bindings[idx].handle.as_any_mut().downcast_mut()
    }

    /// Remove the most recent handle of type `H` bound to `name` and give
    /// it back to the caller without releasing it.
    pub fn take<H: Handle>(&mut self, name: &str) -> Option<H> {
        let idx = self.position::<H>(name)?;
        let binding = self.bindings.remove(idx);
        for boundary in self.frames.iter_mut() {
            if *boundary > idx {
                *boundary -= 1;
            }
        }
        binding.handle.into_any().downcast::<H>().ok().map(|boxed| *boxed)
    }

    /// Check if any handle is bound to `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.iter().any(|b| b.name == name)
    }

    /// Names bound in the current frame, oldest first.
    pub fn names_in_current_frame(&self) -> Vec<&str> {
        self.bindings[self.frame_start()..]
            .iter()
            .map(|b| b.name.as_str())
            .collect()
    }

    /// Number of held handles still referring to a live value.
    pub fn live_count(&self) -> usize {
        self.bindings.iter().filter(|b| b.handle.is_live()).count()
    }

    /// Number of held handles.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no handles are held.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Release every held handle, newest first, and return to the
    /// outermost frame.
    pub fn clear(&mut self) {
        self.release_to(0);
        self.frames = vec![0];
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.release_to(0);
    }
}
