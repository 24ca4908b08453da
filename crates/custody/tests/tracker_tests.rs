//! Tracker ledger tests

use custody::*;
use pretty_assertions::assert_eq;

// ═══════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_tracker_default_config() {
    let tracker = Tracker::default();
    assert_eq!(tracker.config(), TrackerConfig::default());
    assert_eq!(tracker.allocated_count(), 0);
    assert!(tracker.records().is_empty());
}

#[test]
fn test_traced_tracker_behaves_the_same() {
    let tracker = Tracker::with_config(TrackerConfig::new().with_trace(true).with_label("trace"));
    let owner = tracker.shared(1);
    let observer = owner.observe();
    let temp = observer.resolve().unwrap();
    drop(temp);
    drop(owner);
    assert!(observer.resolve().is_none());

    let mut exclusive = tracker.exclusive(2);
    let moved = exclusive.transfer();
    drop(moved);

    assert_eq!(tracker.finalized_count(), 2);
    assert_eq!(tracker.config().label.as_deref(), Some("trace"));
}

#[test]
fn test_clones_share_one_ledger() {
    let tracker = Tracker::new();
    let view = tracker.clone();
    let handle = tracker.exclusive("shared ledger");
    assert_eq!(view.live_count(), 1);
    drop(handle);
    assert_eq!(view.finalized_count(), 1);
}

// ═══════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_records_in_allocation_order() {
    let tracker = Tracker::new();
    let _a = tracker.exclusive(1u8);
    let _b = tracker.shared(String::from("b"));
    let _c = tracker.exclusive(3.0f64);

    let kinds: Vec<_> = tracker.records().iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![HandleKind::Exclusive, HandleKind::Shared, HandleKind::Exclusive]
    );

    let types: Vec<_> = tracker.records().iter().map(|r| r.type_name).collect();
    assert_eq!(types[0], "u8");
    assert!(types[1].ends_with("String"));
    assert_eq!(types[2], "f64");
}

#[test]
fn test_ledger_outlives_tracker() {
    let handle = {
        let tracker = Tracker::new();
        tracker.shared(5)
    };
    // The handle keeps the ledger alive; finalizing still records cleanly
    assert!(handle.id().is_some());
    drop(handle);
}

#[test]
fn test_unknown_id() {
    let tracker = Tracker::new();
    let other = Tracker::new();
    let handle = other.exclusive(0);
    let id = handle.id().unwrap();
    assert_eq!(id.get(), 1);
    assert!(tracker.record(id).is_none());
}

// ═══════════════════════════════════════════════════════════════════════
// Scopes
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_scope_frames_finalize_tracked_values() {
    let tracker = Tracker::new();
    let mut scope = Scope::new();

    scope.hold("outer", tracker.exclusive(1));
    {
        let mut guard = scope.scope_guard();
        guard.hold("inner", tracker.shared(2));
        guard.hold("inner-alias", tracker.shared(3));
        assert_eq!(tracker.live_count(), 3);
    }

    assert_eq!(tracker.live_count(), 1);
    let destroyed: Vec<_> = tracker
        .records()
        .into_iter()
        .filter(|r| r.lifecycle == Lifecycle::Destroyed)
        .map(|r| r.id.get())
        .collect();
    assert_eq!(destroyed, vec![2, 3]);

    let outer: ExclusiveHandle<i32> = scope.take("outer").unwrap();
    drop(scope);
    assert_eq!(tracker.live_count(), 1);
    drop(outer);
    assert_eq!(tracker.live_count(), 0);
}
