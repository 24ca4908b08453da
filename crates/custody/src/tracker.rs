//! The ownership tracker and its allocation ledger
//!
//! A [`Tracker`] hands out handles whose managed values are recorded in a
//! shared ledger. Every record follows the monotonic lifecycle
//! `Allocated -> Shared -> Destroyed` (exclusive values skip `Shared`), and
//! the ledger counts how many times each value was finalized so that
//! exactly-once finalization can be checked from the outside.

use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::config::TrackerConfig;
use crate::exclusive::ExclusiveHandle;
use crate::shared::SharedHandle;

/// Identifier of a tracked allocation, unique within one tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationId(u64);

impl AllocationId {
    /// The raw sequence number.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which handle family owns a tracked value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Owned by a single [`ExclusiveHandle`]
    Exclusive,

    /// Co-owned by [`SharedHandle`]s
    Shared,
}

/// Lifecycle state of a managed value.
///
/// States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    /// Constructed, owned by its first handle
    Allocated,

    /// Under strong reference counting
    Shared,

    /// No longer managed
    Destroyed,
}

/// How a managed value left custody.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Dropped by its last owner
    Finalized,

    /// Moved out by `into_inner` / `try_unwrap` without being dropped
    Unwrapped,
}

/// Ledger entry for one managed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Allocation identifier
    pub id: AllocationId,

    /// Owning handle family
    pub kind: HandleKind,

    /// Type of the managed value
    pub type_name: &'static str,

    /// Current lifecycle state
    pub lifecycle: Lifecycle,

    /// How the value left custody, once destroyed
    pub exit: Option<Exit>,

    /// Number of times the value was finalized (1 once destroyed, never more)
    pub finalizations: usize,
}

impl AllocationRecord {
    /// Whether the value is still managed.
    pub fn is_live(&self) -> bool {
        self.lifecycle != Lifecycle::Destroyed
    }
}

#[derive(Debug)]
struct LedgerState {
    config: TrackerConfig,
    records: IndexMap<AllocationId, AllocationRecord>,
    next_id: u64,
    allocated: usize,
    finalized: usize,
    unwrapped: usize,
    double_exits: usize,
}

impl LedgerState {
    fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            records: IndexMap::new(),
            next_id: 1,
            allocated: 0,
            finalized: 0,
            unwrapped: 0,
            double_exits: 0,
        }
    }

    fn register(&mut self, kind: HandleKind, type_name: &'static str) -> AllocationId {
        let id = AllocationId(self.next_id);
        self.next_id += 1;
        self.allocated += 1;
        self.records.insert(
            id,
            AllocationRecord {
                id,
                kind,
                type_name,
                lifecycle: Lifecycle::Allocated,
                exit: None,
                finalizations: 0,
            },
        );
        id
    }

    fn advance(&mut self, id: AllocationId, next: Lifecycle) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        if next > record.lifecycle {
            record.lifecycle = next;
        } else if next < record.lifecycle {
            tracing::warn!(
                tracker = self.config.label_str(),
                %id,
                from = ?record.lifecycle,
                to = ?next,
                "ignoring backward lifecycle transition"
            );
        }
    }

    fn retire(&mut self, id: AllocationId, exit: Exit) {
        // Records only leave the map after retiring, so a missing id has
        // already exited once.
        let first_exit = match self.records.get_mut(&id) {
            Some(record) if record.is_live() => {
                record.lifecycle = Lifecycle::Destroyed;
                record.exit = Some(exit);
                if exit == Exit::Finalized {
                    record.finalizations += 1;
                }
                true
            }
            Some(record) => {
                if exit == Exit::Finalized {
                    record.finalizations += 1;
                }
                false
            }
            None => false,
        };

        if !first_exit {
            self.double_exits += 1;
            tracing::error!(
                tracker = self.config.label_str(),
                %id,
                ?exit,
                "managed value left custody more than once"
            );
            return;
        }

        match exit {
            Exit::Finalized => self.finalized += 1,
            Exit::Unwrapped => self.unwrapped += 1,
        }
        if !self.config.retain_destroyed {
            self.records.shift_remove(&id);
        }
    }

    fn live_count(&self) -> usize {
        self.allocated - self.finalized - self.unwrapped
    }
}

/// Shared handle to a tracker's ledger.
#[derive(Debug, Clone)]
pub(crate) struct Ledger(Rc<RefCell<LedgerState>>);

impl Ledger {
    fn new(config: TrackerConfig) -> Self {
        Self(Rc::new(RefCell::new(LedgerState::new(config))))
    }

    pub(crate) fn register(&self, kind: HandleKind, type_name: &'static str) -> Tag {
        let id = self.0.borrow_mut().register(kind, type_name);
        let tag = Tag {
            id,
            type_name,
            ledger: self.clone(),
        };
        tag.trace("allocate");
        tag
    }
}

/// Ledger entry attached to a tracked handle.
///
/// Moves with the value it describes; untracked handles carry none.
#[derive(Debug)]
pub(crate) struct Tag {
    id: AllocationId,
    type_name: &'static str,
    ledger: Ledger,
}

impl Tag {
    pub(crate) fn id(&self) -> AllocationId {
        self.id
    }

    pub(crate) fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Emit a trace event for `op` if the tracker has tracing enabled.
    pub(crate) fn trace(&self, op: &'static str) {
        // A value's drop may run while the ledger is borrowed elsewhere.
        let Ok(state) = self.ledger.0.try_borrow() else {
            return;
        };
        if state.config.trace {
            tracing::trace!(
                tracker = state.config.label_str(),
                id = %self.id,
                type_name = self.type_name,
                op,
                "handle operation"
            );
        }
    }

    pub(crate) fn advance(&self, next: Lifecycle) {
        self.ledger.0.borrow_mut().advance(self.id, next);
    }

    /// Record that the value left custody. Must be called after the value
    /// was dropped or moved out, never while it is still reachable.
    pub(crate) fn retire(&self, exit: Exit) {
        self.trace(match exit {
            Exit::Finalized => "finalize",
            Exit::Unwrapped => "unwrap",
        });
        self.ledger.0.borrow_mut().retire(self.id, exit);
    }

    /// Retire with `exit` when the returned guard drops, so a destructor
    /// that unwinds still leaves the ledger accurate.
    pub(crate) fn retire_on_drop(&self, exit: Exit) -> RetireOnDrop<'_> {
        RetireOnDrop { tag: self, exit }
    }
}

pub(crate) struct RetireOnDrop<'a> {
    tag: &'a Tag,
    exit: Exit,
}

impl Drop for RetireOnDrop<'_> {
    fn drop(&mut self) {
        self.tag.retire(self.exit);
    }
}

/// The Ownership Tracker.
///
/// Allocates handles whose values are recorded in a ledger, so that
/// lifecycles, leaks and finalization counts can be inspected.
///
/// # Example
///
/// ```
/// use custody::{Lifecycle, Tracker};
///
/// let tracker = Tracker::new();
/// let a = tracker.shared(String::from("Moris"));
/// let id = a.id().unwrap();
///
/// let b = a.share();
/// assert_eq!(a.strong_count(), 2);
/// assert_eq!(tracker.record(id).unwrap().lifecycle, Lifecycle::Shared);
///
/// drop(a);
/// drop(b);
/// assert_eq!(tracker.record(id).unwrap().lifecycle, Lifecycle::Destroyed);
/// assert_eq!(tracker.finalized_count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Tracker {
    ledger: Ledger,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    /// Create a tracker with default configuration.
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    /// Create a tracker with the given configuration.
    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            ledger: Ledger::new(config),
        }
    }

    /// The tracker's configuration.
    pub fn config(&self) -> TrackerConfig {
        self.ledger.0.borrow().config.clone()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Allocation
    // ═══════════════════════════════════════════════════════════════════

    /// Allocate a tracked value under exclusive ownership.
    pub fn exclusive<T>(&self, value: T) -> ExclusiveHandle<T> {
        let tag = self
            .ledger
            .register(HandleKind::Exclusive, std::any::type_name::<T>());
        ExclusiveHandle::tracked(value, tag)
    }

    /// Allocate a tracked value under shared ownership (strong count 1).
    pub fn shared<T>(&self, value: T) -> SharedHandle<T> {
        let tag = self
            .ledger
            .register(HandleKind::Shared, std::any::type_name::<T>());
        SharedHandle::tracked(value, tag)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Inspection
    // ═══════════════════════════════════════════════════════════════════

    /// Number of values allocated through this tracker.
    pub fn allocated_count(&self) -> usize {
        self.ledger.0.borrow().allocated
    }

    /// Number of values still managed.
    pub fn live_count(&self) -> usize {
        self.ledger.0.borrow().live_count()
    }

    /// Number of values finalized by their last owner.
    pub fn finalized_count(&self) -> usize {
        self.ledger.0.borrow().finalized
    }

    /// Number of values moved out of custody without being finalized.
    pub fn unwrapped_count(&self) -> usize {
        self.ledger.0.borrow().unwrapped
    }

    /// Number of exits reported for values that had already exited.
    ///
    /// Always zero unless handle bookkeeping is broken.
    pub fn double_exit_count(&self) -> usize {
        self.ledger.0.borrow().double_exits
    }

    /// Look up the record for an allocation.
    ///
    /// Returns `None` for unknown ids, and for destroyed values when the
    /// tracker does not retain destroyed records.
    pub fn record(&self, id: AllocationId) -> Option<AllocationRecord> {
        self.ledger.0.borrow().records.get(&id).cloned()
    }

    /// All retained records in allocation order.
    pub fn records(&self) -> Vec<AllocationRecord> {
        self.ledger.0.borrow().records.values().cloned().collect()
    }

    /// Records of values that are still managed.
    ///
    /// After every owning handle has gone out of scope, anything listed here
    /// is kept alive by an ownership cycle.
    pub fn leaks(&self) -> Vec<AllocationRecord> {
        self.ledger
            .0
            .borrow()
            .records
            .values()
            .filter(|r| r.is_live())
            .cloned()
            .collect()
    }
}
