//! Reference-counted shared ownership and non-owning observers
//!
//! A [`SharedHandle`] co-owns a value with every other handle produced by
//! [`share`](SharedHandle::share) from the same allocation. The value is
//! finalized the moment the last of them is released.
//!
//! A [`WeakHandle`] observes the same allocation without keeping the value
//! alive. It cannot be dereferenced; the only way to reach the value is
//! [`resolve`](WeakHandle::resolve), which hands out a temporary
//! `SharedHandle` while the value is still alive and `None` afterwards.
//! Storing a `WeakHandle` on one side of a back-reference is how ownership
//! cycles are broken.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{self, NonNull};

use crate::control::{self, ControlBlock};
use crate::error::{CustodyError, Result};
use crate::tracker::{AllocationId, Lifecycle, Tag};

/// Shared owner of a heap-allocated value.
///
/// # Example
///
/// ```
/// use custody::SharedHandle;
///
/// let first = SharedHandle::allocate(String::from("Person"));
/// assert_eq!(first.strong_count(), 1);
///
/// let second = first.share();
/// assert_eq!(first.strong_count(), 2);
/// assert!(SharedHandle::ptr_eq(&first, &second));
///
/// second.release();
/// assert_eq!(first.strong_count(), 1);
/// ```
pub struct SharedHandle<T> {
    ptr: NonNull<ControlBlock<T>>,
    _owns: PhantomData<ControlBlock<T>>,
}

impl<T> SharedHandle<T> {
    /// Allocate `value` on the heap with a strong count of 1.
    pub fn allocate(value: T) -> Self {
        Self::from_block(ControlBlock::allocate(value, None))
    }

    pub(crate) fn tracked(value: T, tag: Tag) -> Self {
        tag.advance(Lifecycle::Shared);
        Self::from_block(ControlBlock::allocate(value, Some(tag)))
    }

    /// Wrap a block whose strong reference the caller hands over.
    fn from_block(ptr: NonNull<ControlBlock<T>>) -> Self {
        Self {
            ptr,
            _owns: PhantomData,
        }
    }

    fn block(&self) -> &ControlBlock<T> {
        // SAFETY: a live strong handle keeps the block allocated and its
        // value initialized.
        unsafe { self.ptr.as_ref() }
    }

    fn trace(&self, op: &'static str) {
        if let Some(tag) = self.block().tag() {
            tag.trace(op);
        }
    }

    /// Create another co-owner of the same value, incrementing the strong
    /// count.
    pub fn share(&self) -> Self {
        self.block().inc_strong();
        self.trace("share");
        Self::from_block(self.ptr)
    }

    /// Create an observer that does not keep the value alive.
    ///
    /// The strong count is unchanged.
    pub fn observe(&self) -> WeakHandle<T> {
        self.block().inc_weak();
        self.trace("observe");
        WeakHandle {
            ptr: Some(self.ptr),
            _marker: PhantomData,
        }
    }

    /// Give up this handle's share of ownership.
    ///
    /// Equivalent to dropping the handle. Finalizes the value if this was
    /// the last strong handle; observers expire at that moment.
    pub fn release(self) {
        drop(self);
    }

    /// Number of live strong handles, including this one.
    pub fn strong_count(&self) -> usize {
        self.block().strong()
    }

    /// Number of live weak handles observing this value.
    pub fn weak_count(&self) -> usize {
        self.block().weak()
    }

    /// Whether two handles share the same allocation.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    /// Address of the managed value.
    pub fn as_ptr(&self) -> *const T {
        self.block().value() as *const T
    }

    /// Ledger id, if the value was allocated through a [`Tracker`](crate::Tracker).
    pub fn id(&self) -> Option<AllocationId> {
        self.block().tag().map(Tag::id)
    }

    /// Mutable access, granted only to a sole owner with no observers.
    ///
    /// # Errors
    ///
    /// `SharedOwners` if other strong or weak handles exist.
    pub fn get_mut(&mut self) -> Result<&mut T> {
        let (strong, weak) = (self.strong_count(), self.weak_count());
        if strong != 1 || weak != 0 {
            return Err(CustodyError::SharedOwners { strong, weak });
        }
        // SAFETY: sole strong handle, no observers that could resolve, and
        // `&mut self` prevents sharing while the borrow lives.
        Ok(unsafe { control::value_mut(self.ptr) })
    }

    /// Take the value back out if this is the only strong handle.
    ///
    /// Observers expire. Returns the handle unchanged if other strong
    /// handles exist.
    pub fn try_unwrap(this: Self) -> std::result::Result<T, Self> {
        if this.strong_count() != 1 {
            return Err(this);
        }
        this.trace("unwrap");
        let ptr = this.ptr;
        std::mem::forget(this);
        // SAFETY: we owned the single strong reference and forgot the handle
        // so its Drop will not release it again.
        Ok(unsafe { control::take_value(ptr) })
    }
}

impl<T> Clone for SharedHandle<T> {
    fn clone(&self) -> Self {
        self.share()
    }
}

impl<T> Deref for SharedHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.block().value()
    }
}

impl<T> AsRef<T> for SharedHandle<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T> Drop for SharedHandle<T> {
    fn drop(&mut self) {
        self.trace("release");
        // SAFETY: this handle owns exactly one strong reference.
        unsafe { control::release_strong(self.ptr) }
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHandle")
            .field("value", &**self)
            .field("strong", &self.strong_count())
            .field("weak", &self.weak_count())
            .finish()
    }
}

impl<T: fmt::Display> fmt::Display for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<T> fmt::Pointer for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.as_ptr(), f)
    }
}

/// Non-owning observer of a shared value.
///
/// # Example
///
/// ```
/// use custody::SharedHandle;
///
/// let owner = SharedHandle::allocate(42);
/// let observer = owner.observe();
/// assert_eq!(owner.strong_count(), 1);
///
/// if let Some(temp) = observer.resolve() {
///     assert_eq!(*temp, 42);
///     assert_eq!(owner.strong_count(), 2);
/// }
///
/// owner.release();
/// assert!(observer.is_expired());
/// assert!(observer.resolve().is_none());
/// ```
pub struct WeakHandle<T> {
    ptr: Option<NonNull<ControlBlock<T>>>,
    _marker: PhantomData<ControlBlock<T>>,
}

impl<T> WeakHandle<T> {
    /// An observer of nothing. Never resolves.
    pub fn new() -> Self {
        Self {
            ptr: None,
            _marker: PhantomData,
        }
    }

    fn block(&self) -> Option<&ControlBlock<T>> {
        // SAFETY: a weak reference keeps the block allocated, though not
        // necessarily its value.
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    fn trace(&self, op: &'static str) {
        if let Some(tag) = self.block().and_then(ControlBlock::tag) {
            tag.trace(op);
        }
    }

    /// Obtain a temporary strong handle if the value is still alive.
    ///
    /// Returns `None` once the last strong handle has been released, or for
    /// an empty observer. This is the only way to reach the value.
    pub fn resolve(&self) -> Option<SharedHandle<T>> {
        let ptr = self.ptr?;
        let block = self.block()?;
        if block.strong() == 0 {
            self.trace("resolve-miss");
            return None;
        }
        block.inc_strong();
        self.trace("resolve");
        Some(SharedHandle::from_block(ptr))
    }

    /// Like [`resolve`](Self::resolve), reporting expiry as an error.
    ///
    /// # Errors
    ///
    /// `UseAfterExpiry` if the value has been finalized or the observer is
    /// empty.
    pub fn try_resolve(&self) -> Result<SharedHandle<T>> {
        self.resolve().ok_or(CustodyError::UseAfterExpiry {
            type_name: std::any::type_name::<T>(),
        })
    }

    /// Stop observing. Leaves this handle empty; calling it again is a no-op.
    pub fn release(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            // SAFETY: we owned one weak reference and just cleared it.
            unsafe { control::release_weak(ptr) }
        }
    }

    /// Whether the observed value is gone (or was never there).
    pub fn is_expired(&self) -> bool {
        self.strong_count() == 0
    }

    /// Number of live strong handles to the observed value.
    pub fn strong_count(&self) -> usize {
        self.block().map_or(0, ControlBlock::strong)
    }

    /// Number of live weak handles, including this one.
    pub fn weak_count(&self) -> usize {
        self.block().map_or(0, ControlBlock::weak)
    }

    /// Whether two observers watch the same allocation.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    /// Ledger id of the observed value, if it was tracked.
    pub fn id(&self) -> Option<AllocationId> {
        self.block().and_then(ControlBlock::tag).map(Tag::id)
    }

    fn live_ptr(&self) -> *const T {
        match self.block() {
            Some(block) if block.strong() > 0 => block.value() as *const T,
            _ => ptr::null(),
        }
    }
}

impl<T> Default for WeakHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        if let Some(block) = self.block() {
            block.inc_weak();
        }
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for WeakHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("expired", &self.is_expired())
            .field("strong", &self.strong_count())
            .finish()
    }
}

impl<T> fmt::Pointer for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.live_ptr(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Probe(Rc<Cell<usize>>);

    impl Drop for Probe {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_allocate_counts() {
        let handle = SharedHandle::allocate(1);
        assert_eq!(handle.strong_count(), 1);
        assert_eq!(handle.weak_count(), 0);
        assert_eq!(handle.id(), None);
    }

    #[test]
    fn test_share_and_clone_increment() {
        let a = SharedHandle::allocate("x");
        let b = a.share();
        let c = b.clone();
        assert_eq!(a.strong_count(), 3);
        drop(c);
        assert_eq!(a.strong_count(), 2);
        drop(b);
        assert_eq!(a.strong_count(), 1);
    }

    #[test]
    fn test_observe_keeps_strong_count() {
        let a = SharedHandle::allocate(5);
        let w = a.observe();
        let w2 = w.clone();
        assert_eq!(a.strong_count(), 1);
        assert_eq!(a.weak_count(), 2);
        assert_eq!(w.weak_count(), 2);
        drop(w2);
        assert_eq!(a.weak_count(), 1);
    }

    #[test]
    fn test_finalize_on_last_release() {
        let drops = Rc::new(Cell::new(0));
        let a = SharedHandle::allocate(Probe(drops.clone()));
        let b = a.share();
        a.release();
        assert_eq!(drops.get(), 0);
        b.release();
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_weak_expires() {
        let drops = Rc::new(Cell::new(0));
        let a = SharedHandle::allocate(Probe(drops.clone()));
        let w = a.observe();
        assert!(!w.is_expired());
        drop(a);
        assert_eq!(drops.get(), 1);
        assert!(w.is_expired());
        assert!(w.resolve().is_none());
        assert_eq!(w.strong_count(), 0);
        assert_eq!(w.weak_count(), 1);
    }

    #[test]
    fn test_empty_weak() {
        let mut w: WeakHandle<i32> = WeakHandle::new();
        assert!(w.is_expired());
        assert!(w.resolve().is_none());
        assert_eq!(
            w.try_resolve().unwrap_err(),
            CustodyError::UseAfterExpiry { type_name: "i32" }
        );
        w.release();
        w.release();
        assert_eq!(format!("{:p}", w), format!("{:p}", ptr::null::<i32>()));
    }

    #[test]
    fn test_weak_release_is_idempotent() {
        let a = SharedHandle::allocate(1);
        let mut w = a.observe();
        w.release();
        w.release();
        assert_eq!(a.weak_count(), 0);
        assert!(w.resolve().is_none());
        assert_eq!(*a, 1);
    }

    #[test]
    fn test_get_mut_requires_sole_owner() {
        let mut a = SharedHandle::allocate(vec![1]);
        a.get_mut().unwrap().push(2);
        assert_eq!(*a, vec![1, 2]);

        let b = a.share();
        assert_eq!(
            a.get_mut().unwrap_err(),
            CustodyError::SharedOwners { strong: 2, weak: 0 }
        );
        drop(b);

        let w = a.observe();
        assert_eq!(
            a.get_mut().unwrap_err(),
            CustodyError::SharedOwners { strong: 1, weak: 1 }
        );
        drop(w);
        assert!(a.get_mut().is_ok());
    }

    #[test]
    fn test_try_unwrap() {
        let a = SharedHandle::allocate(String::from("moved"));
        let b = a.share();
        let a = SharedHandle::try_unwrap(a).unwrap_err();
        drop(b);

        let w = a.observe();
        assert_eq!(SharedHandle::try_unwrap(a).unwrap(), "moved");
        assert!(w.is_expired());
    }

    #[test]
    fn test_value_dropping_its_own_observer() {
        use std::cell::RefCell;

        struct Node {
            me: RefCell<WeakHandle<Node>>,
            drops: Rc<Cell<usize>>,
        }

        impl Drop for Node {
            fn drop(&mut self) {
                // Strong count is already zero while finalizing
                assert!(self.me.borrow().resolve().is_none());
                self.drops.set(self.drops.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let node = SharedHandle::allocate(Node {
            me: RefCell::new(WeakHandle::new()),
            drops: drops.clone(),
        });
        *node.me.borrow_mut() = node.observe();
        assert_eq!(node.weak_count(), 1);

        drop(node);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_weak_count_seen_by_finalizer() {
        use std::cell::RefCell;

        struct Watcher {
            me: RefCell<WeakHandle<Watcher>>,
            seen: Rc<Cell<usize>>,
        }

        impl Drop for Watcher {
            fn drop(&mut self) {
                self.seen.set(self.me.borrow().weak_count());
            }
        }

        let seen = Rc::new(Cell::new(usize::MAX));
        let watcher = SharedHandle::allocate(Watcher {
            me: RefCell::new(WeakHandle::new()),
            seen: seen.clone(),
        });
        *watcher.me.borrow_mut() = watcher.observe();
        let outside = watcher.observe();
        assert_eq!(watcher.weak_count(), 2);

        drop(watcher);
        assert_eq!(seen.get(), 2);
        assert_eq!(outside.weak_count(), 1);
    }

    #[test]
    fn test_tracked_finalizer_panic_is_still_recorded() {
        use crate::tracker::Exit;
        use crate::Tracker;
        use std::panic::{self, AssertUnwindSafe};

        struct Boom(Rc<Cell<usize>>);

        impl Drop for Boom {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
                panic!("finalizer failed");
            }
        }

        let tracker = Tracker::new();
        let drops = Rc::new(Cell::new(0));
        let owner = tracker.shared(Boom(drops.clone()));
        let observer = owner.observe();
        let id = owner.id().unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(move || owner.release()));
        assert!(result.is_err());
        assert_eq!(drops.get(), 1);
        assert!(tracker.leaks().is_empty());
        assert_eq!(tracker.record(id).unwrap().exit, Some(Exit::Finalized));
        assert!(observer.is_expired());
        assert_eq!(observer.weak_count(), 1);
    }

    #[test]
    fn test_pointer_formatting() {
        let a = SharedHandle::allocate(3u8);
        let w = a.observe();
        assert_eq!(format!("{:p}", a), format!("{:p}", a.as_ptr()));
        assert_eq!(format!("{:p}", w), format!("{:p}", a.as_ptr()));
        drop(a);
        assert_eq!(format!("{:p}", w), format!("{:p}", ptr::null::<u8>()));
    }

    #[test]
    fn test_debug_does_not_touch_expired_value() {
        let a = SharedHandle::allocate(9);
        let w = a.observe();
        assert_eq!(
            format!("{:?}", a),
            "SharedHandle { value: 9, strong: 1, weak: 1 }"
        );
        drop(a);
        assert_eq!(format!("{:?}", w), "WeakHandle { expired: true, strong: 0 }");
    }
}
