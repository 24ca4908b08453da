//! Sole ownership with explicit transfer

use std::fmt;
use std::ptr;

use crate::error::{CustodyError, Result};
use crate::tracker::{AllocationId, Exit, HandleKind, Tag};

/// Sole owner of a heap-allocated value.
///
/// At most one `ExclusiveHandle` refers to a value. Ownership moves with
/// [`transfer`](Self::transfer), which leaves the source null; the handle
/// cannot be cloned, so a second owner can never be created by copying:
///
/// ```compile_fail
/// use custody::ExclusiveHandle;
///
/// let first = ExclusiveHandle::allocate(25);
/// let second: ExclusiveHandle<i32> = first.clone();
/// ```
///
/// Moving the handle out by value ends the source binding entirely:
///
/// ```compile_fail
/// use custody::ExclusiveHandle;
///
/// let first = ExclusiveHandle::allocate(25);
/// let second = first;
/// assert!(first.is_null());
/// ```
///
/// The value is finalized when the owning handle is released, reset, or
/// goes out of scope. Releasing a null handle does nothing.
///
/// # Example
///
/// ```
/// use custody::ExclusiveHandle;
///
/// let mut first = ExclusiveHandle::allocate(25);
/// let second = first.transfer();
///
/// assert!(first.is_null());
/// assert_eq!(second.get(), Some(&25));
/// assert_eq!(first.get(), None);
/// ```
pub struct ExclusiveHandle<T> {
    slot: Option<Box<T>>,
    tag: Option<Tag>,
}

impl<T> ExclusiveHandle<T> {
    /// Allocate `value` on the heap under sole ownership.
    pub fn allocate(value: T) -> Self {
        Self {
            slot: Some(Box::new(value)),
            tag: None,
        }
    }

    pub(crate) fn tracked(value: T, tag: Tag) -> Self {
        Self {
            slot: Some(Box::new(value)),
            tag: Some(tag),
        }
    }

    /// A handle that owns nothing.
    pub fn null() -> Self {
        Self {
            slot: None,
            tag: None,
        }
    }

    /// Whether this handle owns nothing.
    pub fn is_null(&self) -> bool {
        self.slot.is_none()
    }

    fn trace(&self, op: &'static str) {
        if let Some(tag) = &self.tag {
            tag.trace(op);
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Ownership Transfer
    // ═══════════════════════════════════════════════════════════════════

    /// Move ownership into a new handle, leaving this one null.
    ///
    /// The value itself is not moved or copied. Transferring from a null
    /// handle yields another null handle.
    pub fn transfer(&mut self) -> Self {
        let moved = Self {
            slot: self.slot.take(),
            tag: self.tag.take(),
        };
        moved.trace("transfer");
        moved
    }

    /// Like [`transfer`](Self::transfer), reporting a null source as an error.
    ///
    /// # Errors
    ///
    /// `DoubleTransfer` if this handle no longer owns a value.
    pub fn try_transfer(&mut self) -> Result<Self> {
        if self.is_null() {
            return Err(double_transfer::<T>());
        }
        Ok(self.transfer())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Access
    // ═══════════════════════════════════════════════════════════════════

    /// The owned value, or `None` if null.
    pub fn get(&self) -> Option<&T> {
        self.slot.as_deref()
    }

    /// Mutable access to the owned value, or `None` if null.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.slot.as_deref_mut()
    }

    /// The owned value.
    ///
    /// # Errors
    ///
    /// `DoubleTransfer` if ownership has already moved away.
    pub fn try_get(&self) -> Result<&T> {
        self.get().ok_or_else(double_transfer::<T>)
    }

    /// Mutable access to the owned value.
    ///
    /// # Errors
    ///
    /// `DoubleTransfer` if ownership has already moved away.
    pub fn try_get_mut(&mut self) -> Result<&mut T> {
        self.slot.as_deref_mut().ok_or_else(double_transfer::<T>)
    }

    /// Address of the owned value, null if the handle is null.
    pub fn as_ptr(&self) -> *const T {
        self.get().map_or(ptr::null(), |value| value as *const T)
    }

    /// Ledger id, if the value was allocated through a [`Tracker`](crate::Tracker).
    pub fn id(&self) -> Option<AllocationId> {
        self.tag.as_ref().map(Tag::id)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Release
    // ═══════════════════════════════════════════════════════════════════

    /// Finalize the owned value now and null the handle.
    ///
    /// Calling this again, or dropping the handle afterwards, does nothing.
    pub fn release(&mut self) {
        self.trace("release");
        let Some(value) = self.slot.take() else {
            return;
        };
        let tag = self.tag.take();
        let _retire = tag.as_ref().map(|tag| tag.retire_on_drop(Exit::Finalized));
        drop(value);
    }

    /// Finalize the current value (if any) and take ownership of `value`.
    ///
    /// A tracked handle registers the new value with the same tracker.
    pub fn reset(&mut self, value: T) {
        let ledger = self.tag.as_ref().map(|tag| tag.ledger().clone());
        self.release();
        self.slot = Some(Box::new(value));
        self.tag = ledger.map(|ledger| {
            ledger.register(HandleKind::Exclusive, std::any::type_name::<T>())
        });
    }

    /// Move the value out of the handle without finalizing it.
    pub fn into_inner(mut self) -> Option<T> {
        let value = self.slot.take()?;
        self.trace("unwrap");
        if let Some(tag) = self.tag.take() {
            tag.retire(Exit::Unwrapped);
        }
        Some(*value)
    }
}

fn double_transfer<T>() -> CustodyError {
    CustodyError::DoubleTransfer {
        type_name: std::any::type_name::<T>(),
    }
}

impl<T> Default for ExclusiveHandle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Drop for ExclusiveHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> From<T> for ExclusiveHandle<T> {
    fn from(value: T) -> Self {
        Self::allocate(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for ExclusiveHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("ExclusiveHandle").field(value).finish(),
            None => f.write_str("ExclusiveHandle(null)"),
        }
    }
}

impl<T> fmt::Pointer for ExclusiveHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.as_ptr(), f)
    }
}
