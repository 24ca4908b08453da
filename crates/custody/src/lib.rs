//! # Custody
//!
//! Ownership-tracking handles over heap-allocated values.
//!
//! Custody provides three handle variants with deterministic, exactly-once
//! finalization:
//!
//! - [`ExclusiveHandle`]: the sole owner. Not copyable; ownership moves with
//!   [`transfer`](ExclusiveHandle::transfer), which nulls the source.
//! - [`SharedHandle`]: a reference-counted co-owner. The value is finalized
//!   when the last strong handle is released.
//! - [`WeakHandle`]: a non-owning observer that [`resolve`](WeakHandle::resolve)s
//!   to a temporary `SharedHandle` only while the value is alive.
//!
//! ## Architecture
//!
//! - **Handles**: exclusive, shared and weak ownership over a value
//! - **Tracker**: allocates handles and keeps a ledger of each value's
//!   lifecycle (`Allocated -> Shared -> Destroyed`)
//! - **Scope**: frames of held handles released together, newest first
//!
//! ## Breaking cycles
//!
//! Two values holding `SharedHandle`s to each other keep each other's strong
//! count above zero forever. Holding a `WeakHandle` on one side breaks the
//! cycle:
//!
//! ```
//! use std::cell::RefCell;
//! use custody::{SharedHandle, Tracker, WeakHandle};
//!
//! struct Student {
//!     name: &'static str,
//!     friend: RefCell<WeakHandle<Student>>,
//! }
//!
//! let tracker = Tracker::new();
//! {
//!     let moris = tracker.shared(Student { name: "Moris", friend: RefCell::default() });
//!     let ash = tracker.shared(Student { name: "Ash", friend: RefCell::default() });
//!     *ash.friend.borrow_mut() = moris.observe();
//!     *moris.friend.borrow_mut() = ash.observe();
//!
//!     let friend = ash.friend.borrow().resolve().unwrap();
//!     assert_eq!(friend.name, "Moris");
//!     assert_eq!(moris.strong_count(), 2);
//! }
//! assert!(tracker.leaks().is_empty());
//! assert_eq!(tracker.finalized_count(), 2);
//! ```
//!
//! Handles are single-threaded: they are neither `Send` nor `Sync`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
mod control;
pub mod error;
pub mod exclusive;
pub mod scope;
pub mod shared;
pub mod tracker;

// Re-export main types
pub use config::TrackerConfig;
pub use error::{CustodyError, Result};
pub use exclusive::ExclusiveHandle;
pub use scope::{Handle, Scope, ScopeGuard};
pub use shared::{SharedHandle, WeakHandle};
pub use tracker::{AllocationId, AllocationRecord, Exit, HandleKind, Lifecycle, Tracker};

/// Custody version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }
}
