//! Heap control block shared by strong and weak handles

use std::cell::{Cell, UnsafeCell};
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use crate::tracker::{Exit, Tag};

/// Reference counts and storage for one shared value.
///
/// `weak` counts every [`WeakHandle`](crate::WeakHandle) plus one implicit
/// reference held collectively by the strong handles, so the block outlives
/// the value until the last observer lets go.
pub(crate) struct ControlBlock<T> {
    strong: Cell<usize>,
    weak: Cell<usize>,
    implicit_weak: Cell<bool>,
    tag: Option<Tag>,
    value: UnsafeCell<ManuallyDrop<T>>,
}

impl<T> ControlBlock<T> {
    /// Allocate a block holding `value` with strong count 1.
    pub(crate) fn allocate(value: T, tag: Option<Tag>) -> NonNull<Self> {
        let block = Box::new(ControlBlock {
            strong: Cell::new(1),
            weak: Cell::new(1),
            implicit_weak: Cell::new(true),
            tag,
            value: UnsafeCell::new(ManuallyDrop::new(value)),
        });
        NonNull::from(Box::leak(block))
    }

    pub(crate) fn strong(&self) -> usize {
        self.strong.get()
    }

    /// Live weak handles, excluding the implicit reference.
    ///
    /// The implicit reference is held until finalization completes, so the
    /// count is also correct when read from inside the value's destructor.
    pub(crate) fn weak(&self) -> usize {
        self.weak.get() - usize::from(self.implicit_weak.get())
    }

    pub(crate) fn inc_strong(&self) {
        self.strong.set(checked_inc(self.strong.get()));
    }

    pub(crate) fn inc_weak(&self) {
        self.weak.set(checked_inc(self.weak.get()));
    }

    pub(crate) fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    /// The managed value. Only valid while `strong > 0`.
    pub(crate) fn value(&self) -> &T {
        // SAFETY: mutable access is only handed out to a sole owner with no
        // observers, which excludes any other `&self` caller.
        unsafe { &*self.value.get() }
    }
}

fn checked_inc(count: usize) -> usize {
    // Overflow means handles were leaked with mem::forget in a loop;
    // continuing would let the count wrap and free a live value.
    count.checked_add(1).unwrap_or_else(|| std::process::abort())
}

/// Drop one strong reference, finalizing the value when it was the last.
///
/// # Safety
///
/// `ptr` must come from [`ControlBlock::allocate`] and the caller must own
/// one strong reference, which is consumed.
pub(crate) unsafe fn release_strong<T>(ptr: NonNull<ControlBlock<T>>) {
    let remaining = {
        let block = ptr.as_ref();
        let n = block.strong.get() - 1;
        block.strong.set(n);
        n
    };
    if remaining > 0 {
        return;
    }

    // Strong is already zero, so anything the value's destructor does to
    // this block (resolving or dropping observers) sees it as expired.
    let _finish = Finalizing(ptr);
    ManuallyDrop::drop(&mut *ptr.as_ref().value.get());
}

/// Completes finalization of a block whose value has been dropped, even
/// when the value's destructor unwinds: the ledger is told about the exit
/// and the implicit weak reference is given up.
struct Finalizing<T>(NonNull<ControlBlock<T>>);

impl<T> Drop for Finalizing<T> {
    fn drop(&mut self) {
        // SAFETY: built by `release_strong`, which owned the implicit weak
        // reference now being released.
        unsafe {
            if let Some(tag) = self.0.as_ref().tag() {
                tag.retire(Exit::Finalized);
            }
            drop_implicit_weak(self.0);
        }
    }
}

/// Move the value out of a block whose only strong reference the caller
/// owns, leaving it expired.
///
/// # Safety
///
/// Same as [`release_strong`], and the strong count must be exactly 1.
pub(crate) unsafe fn take_value<T>(ptr: NonNull<ControlBlock<T>>) -> T {
    ptr.as_ref().strong.set(0);
    let value = ManuallyDrop::take(&mut *ptr.as_ref().value.get());
    if let Some(tag) = ptr.as_ref().tag() {
        tag.retire(Exit::Unwrapped);
    }
    drop_implicit_weak(ptr);
    value
}

/// Mutable access to the value.
///
/// # Safety
///
/// The caller must hold the only strong reference and there must be no
/// weak handles, so no other reference to the value can be produced.
pub(crate) unsafe fn value_mut<'a, T>(ptr: NonNull<ControlBlock<T>>) -> &'a mut T {
    &mut *ptr.as_ref().value.get()
}

/// Give up the implicit weak reference held by the strong owners.
///
/// # Safety
///
/// The strong count must have reached zero and the value must be gone.
unsafe fn drop_implicit_weak<T>(ptr: NonNull<ControlBlock<T>>) {
    ptr.as_ref().implicit_weak.set(false);
    release_weak(ptr);
}

/// Drop one weak reference, freeing the block when it was the last.
///
/// # Safety
///
/// `ptr` must come from [`ControlBlock::allocate`] and the caller must own
/// one weak reference (explicit or the implicit one), which is consumed.
pub(crate) unsafe fn release_weak<T>(ptr: NonNull<ControlBlock<T>>) {
    let remaining = {
        let block = ptr.as_ref();
        let n = block.weak.get() - 1;
        block.weak.set(n);
        n
    };
    if remaining == 0 {
        // The value is ManuallyDrop and was already dropped or taken;
        // this frees the block and its tag.
        drop(Box::from_raw(ptr.as_ptr()));
    }
}
