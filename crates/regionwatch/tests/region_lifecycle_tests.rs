//! Lifecycle tests for regions: creation, bootstrap, enter/exit, delete,
//! protocol violations and diagnostics.

use regionwatch::prelude::*;
use regionwatch::{LedgerSnapshot, LockSite, render_table};
use regionwatch_test_helpers::prelude::*;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const APP: ModuleId = ModuleId::new(1, "app");
const PORT: ModuleId = ModuleId::new(7, "port");

#[test]
fn test_mutex_scenario() {
    init_test_logging();
    let fixture = RegistryFixture::new();
    let region = Region::builder("scenario", APP)
        .max_lock(LockLimit::Disabled)
        .create_unlocked(&fixture.registry);

    region.enter();
    assert_eq!(region.peek(), LockState::Locked);
    assert_eq!(region.holder(), Some(ThreadToken::current()));
    region.exit();
    assert_eq!(region.peek(), LockState::Unlocked);
    assert_eq!(region.holder(), None);
    assert_eq!(fixture.halt.count(), 0);
}

#[test]
fn test_first_exit_leaves_primitive_unlocked() {
    let fixture = RegistryFixture::new();
    for kind in [RegionKind::Mutex, RegionKind::RecursiveMutex, RegionKind::Semaphore] {
        let region = fixture.registry.create("boot", APP, kind, false);
        assert_eq!(region.state(), RegionState::Unexited);
        assert_eq!(region.peek(), LockState::Locked);

        region.exit();
        assert_eq!(region.peek(), LockState::Unlocked, "{kind:?}");
        assert_eq!(region.generation(), 0);
        assert_eq!(region.state(), RegionState::Unlocked);
    }
}

#[test]
fn test_gate_releases_waiters_one_at_a_time() {
    let fixture = RegistryFixture::new();
    let region = fixture.registry.create("gated", APP, RegionKind::Mutex, false);
    let entered = Arc::new(AtomicUsize::new(0));

    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let region = region.clone();
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                region.enter();
                entered.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(150));
                region.exit();
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(entered.load(Ordering::SeqCst), 0, "gate must hold waiters");

    region.exit();
    thread::sleep(Duration::from_millis(60));
    assert_eq!(entered.load(Ordering::SeqCst), 1);
    assert_eq!(region.generation(), 1);

    for waiter in waiters {
        must_join(waiter);
    }
    assert_eq!(entered.load(Ordering::SeqCst), 2);
    assert_eq!(region.generation(), 2);
    assert_eq!(region.peek(), LockState::Unlocked);
}

#[test]
fn test_recursive_enter_exit_symmetry() {
    let fixture = RegistryFixture::new();
    let region = fixture
        .registry
        .create_unlocked("recursive", APP, RegionKind::RecursiveMutex, false);

    for depth in 1..=5 {
        region.enter();
        assert_eq!(region.peek(), LockState::Locked, "depth {depth}");
    }
    for _ in 0..4 {
        region.exit();
        assert_eq!(region.peek(), LockState::Locked);
        assert!(region.holder().is_some());
    }
    region.exit();
    assert_eq!(region.peek(), LockState::Unlocked);
    assert_eq!(region.generation(), 1);
}

#[test]
fn test_double_lock_is_fatal() {
    let fixture = RegistryFixture::new();
    let region = fixture
        .registry
        .create_unlocked("double", APP, RegionKind::Mutex, false);
    region.enter();

    let result = catch_unwind(AssertUnwindSafe(|| region.enter()));
    assert!(result.is_err());
    assert!(matches!(
        fixture.halt.violations().as_slice(),
        [Violation::DoubleLock { .. }]
    ));
    let event = must_some(fixture.halt.last(), "halt recorded");
    assert_eq!(event.report.regions.len(), 1);
    assert_eq!(event.report.regions[0].state, RegionState::Locked);
    assert!(event.location.is_some());
}

#[test]
fn test_unlock_of_unlocked_region_is_fatal() {
    let fixture = RegistryFixture::new();
    for kind in [RegionKind::Mutex, RegionKind::RecursiveMutex, RegionKind::Semaphore] {
        let region = fixture.registry.create_unlocked("free", APP, kind, false);
        let result = catch_unwind(AssertUnwindSafe(|| region.exit()));
        assert!(result.is_err(), "{kind:?}");
    }
    assert_eq!(fixture.halt.count(), 3);
    assert!(
        fixture
            .halt
            .violations()
            .iter()
            .all(|v| matches!(v, Violation::UnlockNotLocked { .. }))
    );
}

#[test]
fn test_wrong_unlocker_is_fatal() {
    let fixture = RegistryFixture::new();
    for kind in [RegionKind::Mutex, RegionKind::RecursiveMutex] {
        let region = fixture.registry.create_unlocked("owned", APP, kind, false);
        region.enter();

        let other = region.clone();
        let result = thread::spawn(move || other.exit()).join();
        assert!(result.is_err(), "{kind:?}");
        assert!(matches!(
            fixture.halt.last().map(|e| e.violation),
            Some(Violation::WrongUnlocker { owner, .. }) if owner == ThreadToken::current()
        ));

        // The owner can still release it.
        region.exit();
        assert_eq!(region.peek(), LockState::Unlocked);
    }
}

#[test]
fn test_semaphore_released_by_other_thread() {
    let fixture = RegistryFixture::new();
    let region = fixture
        .registry
        .create_unlocked("signal", APP, RegionKind::Semaphore, false);
    region.enter();

    let other = region.clone();
    must_join(thread::spawn(move || other.exit()));
    assert_eq!(region.peek(), LockState::Unlocked);
    assert_eq!(fixture.halt.count(), 0);
}

#[test]
fn test_assert_locked() {
    let fixture = RegistryFixture::new();
    let region = fixture
        .registry
        .create_unlocked("asserted", APP, RegionKind::Mutex, false);
    {
        let _guard = region.lock();
        region.assert_locked();
    }
    let result = catch_unwind(AssertUnwindSafe(|| region.assert_locked()));
    assert!(result.is_err());
    assert!(matches!(
        fixture.halt.violations().as_slice(),
        [Violation::NotLocked { .. }]
    ));
}

#[test]
fn test_delete_lifecycle() -> TestResult {
    let fixture = RegistryFixture::new();
    let opened = fixture.registry.create("opened", PORT, RegionKind::Mutex, false);
    let used = fixture
        .registry
        .create_unlocked("used", PORT, RegionKind::Mutex, false);
    assert_eq!(fixture.registry.len(), 2);

    opened.exit();
    fixture.registry.delete(&opened)?;
    used.enter();
    used.exit();
    fixture.registry.delete(&used)?;
    assert!(fixture.registry.is_empty());

    assert!(matches!(
        fixture.registry.delete(&used),
        Err(RegionError::NotRegistered { .. })
    ));
    let result = catch_unwind(AssertUnwindSafe(|| used.peek()));
    assert!(result.is_err());
    assert!(matches!(
        fixture.halt.violations().as_slice(),
        [Violation::UninitializedRegionUse { .. }]
    ));
    Ok(())
}

#[test]
fn test_delete_while_held_by_other_thread_is_fatal() {
    let fixture = RegistryFixture::new();
    let region = fixture
        .registry
        .create_unlocked("busy", PORT, RegionKind::Mutex, false);
    region.enter();

    let registry = fixture.registry.clone();
    let other = region.clone();
    let result = thread::spawn(move || registry.delete(&other)).join();
    assert!(result.is_err());
    assert!(matches!(
        fixture.halt.violations().as_slice(),
        [Violation::DeleteWhileHeld { .. }]
    ));
    assert_eq!(fixture.registry.len(), 1);
    region.exit();
}

#[test]
fn test_delete_of_unexited_region_with_waiter_is_fatal() -> TestResult {
    let fixture = RegistryFixture::new();
    let boot = fixture.registry.create("boot", PORT, RegionKind::Mutex, false);

    let entered = Arc::new(AtomicUsize::new(0));
    let waiter = {
        let boot = boot.clone();
        let entered = Arc::clone(&entered);
        thread::spawn(move || {
            boot.enter();
            entered.fetch_add(1, Ordering::SeqCst);
            boot.exit();
        })
    };
    while boot
        .snapshot(true)
        .attempts
        .is_none_or(|ledger| ledger.pending() == 0)
    {
        thread::sleep(Duration::from_millis(1));
    }

    let result = catch_unwind(AssertUnwindSafe(|| fixture.registry.delete(&boot)));
    assert!(matches!(result, Err(_)));
    assert!(matches!(
        fixture.halt.violations().as_slice(),
        [Violation::DeleteWhileHeld { region, .. }] if region == "boot"
    ));
    assert_eq!(fixture.registry.len(), 1);

    // The creator can still open the gate and the waiter gets through.
    boot.exit();
    must_join(waiter);
    assert_eq!(entered.load(Ordering::SeqCst), 1);
    assert_eq!(boot.generation(), 1);
    fixture.registry.delete(&boot)?;
    Ok(())
}

#[test]
fn test_leaf_violation_reported_once() {
    let fixture = RegistryFixture::new();
    let leaf = fixture
        .registry
        .create_unlocked("leaf", APP, RegionKind::Mutex, true);
    let others: Vec<_> = (0..4)
        .map(|i| {
            fixture
                .registry
                .create_unlocked(&format!("other{i}"), APP, RegionKind::Mutex, false)
        })
        .collect();

    leaf.enter();
    for other in &others {
        other.enter();
        other.exit();
    }
    leaf.exit();

    assert_eq!(fixture.registry.leaf_violations(), 1);
    assert!(fixture.registry.leaf_checks_disabled());
    assert_eq!(fixture.sink.count_matching("while leaf region 'leaf' is held"), 1);
    assert!(matches!(
        fixture.registry.last_leaf_violation(),
        Some(Violation::Leaf { ref region, .. }) if region == "other0"
    ));

    // Enforcement stays off.
    leaf.enter();
    others[0].enter();
    others[0].exit();
    leaf.exit();
    assert_eq!(fixture.registry.leaf_violations(), 1);
    assert_eq!(fixture.halt.count(), 0);
}

#[test]
fn test_leaf_alone_is_fine() {
    let fixture = RegistryFixture::new();
    let leaf = fixture
        .registry
        .create_unlocked("leaf", APP, RegionKind::RecursiveMutex, true);
    let outer = fixture
        .registry
        .create_unlocked("outer", APP, RegionKind::Mutex, false);

    // Taking a leaf inside another region is allowed.
    outer.enter();
    leaf.enter();
    leaf.enter();
    leaf.exit();
    leaf.exit();
    outer.exit();

    assert_eq!(fixture.registry.leaf_violations(), 0);
    assert!(!fixture.registry.leaf_checks_disabled());
}

#[test]
fn test_lock_sites_recorded() {
    let fixture = RegistryFixture::new();
    let region = fixture
        .registry
        .create_unlocked("sites", APP, RegionKind::Mutex, false);

    region.enter_at(SourceLocation::new("src/port/api.rs", 10));
    fixture.clock.advance(Duration::from_millis(40));
    let snapshot = region.snapshot(false);
    assert_eq!(snapshot.lock_age, Some(Duration::from_millis(40)));
    region.exit_at(regionwatch::here!());

    let snapshot = region.snapshot(false);
    assert_eq!(
        snapshot.last_lock.location,
        Some(SourceLocation::new("src/port/api.rs", 10))
    );
    assert_eq!(
        snapshot.last_unlock.location.map(|l| l.file_name()),
        Some("region_lifecycle_tests.rs")
    );
    assert_eq!(snapshot.hold.max_hold, Duration::from_millis(40));
    assert!(snapshot.lock_age.is_none());
}

#[test]
fn test_dump_and_hold_stats() {
    let fixture = RegistryFixture::new();
    let a = fixture.registry.create_unlocked("port.a", PORT, RegionKind::Mutex, true);
    fixture
        .registry
        .create("port.b", PORT, RegionKind::Semaphore, false);
    fixture
        .registry
        .create_unlocked("app.a", APP, RegionKind::RecursiveMutex, false);
    a.enter();

    fixture.registry.dump(SnapshotFilter::all());
    let lines = fixture.sink.lines();
    assert_eq!(lines.len(), 5);
    assert!(lines[0].starts_with("Module"));
    assert!(lines[2].starts_with("app "));
    assert!(lines[3].contains(" S N Unexited "));
    assert!(lines[4].contains(" M Y Locked "));

    fixture.sink.clear();
    fixture
        .registry
        .dump(SnapshotFilter::all().module(APP).detailed());
    assert!(fixture.sink.contains("lock_attempt_cnt=0x0"));
    assert!(fixture.sink.contains("[lock_attempt_cnt % 16]"));

    let stats = fixture.registry.render_hold_stats(Some(PORT));
    assert_eq!(stats.len(), 4);
    a.exit();
}

#[test]
fn test_render_table_from_snapshots() {
    let fixture = RegistryFixture::new();
    let region = fixture
        .registry
        .create_unlocked("table", APP, RegionKind::Mutex, false);
    region.enter();
    let snapshots = fixture.registry.snapshot(SnapshotFilter::all().detailed());
    let ledger: &LedgerSnapshot = must_some(snapshots[0].attempts.as_ref(), "detailed");
    assert_eq!(ledger.attempts, 1);
    assert_eq!(ledger.completed, 1);
    assert_eq!(ledger.pending(), 0);

    let lines = render_table(&snapshots, false, false);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(" Locked "));
    assert_ne!(snapshots[0].last_lock, LockSite::default());
    region.exit();
}

#[test]
fn test_blocking_report_json() -> TestResult {
    let fixture = RegistryFixture::new();
    let region = fixture
        .registry
        .create_unlocked("json", APP, RegionKind::Mutex, false);
    region.enter();

    let report = fixture.registry.blocking_report("manual dump");
    let json = report.to_json()?;
    assert!(json.contains("\"name\": \"json\""));
    assert!(json.contains("\"state\": \"Locked\""));
    assert!(json.contains("\"reason\": \"manual dump\""));
    region.exit();
    Ok(())
}

#[test]
fn test_set_max_lock() {
    let fixture = RegistryFixture::new();
    let region = fixture
        .registry
        .create_unlocked("limit", APP, RegionKind::Mutex, false);
    assert_eq!(region.max_lock(), LockLimit::DEFAULT);
    region.set_max_lock(LockLimit::Disabled);
    assert_eq!(region.max_lock(), LockLimit::Disabled);
    assert_eq!(region.snapshot(false).limit, LockLimit::Disabled);
}

#[test]
fn test_global_registry_is_shared() -> TestResult {
    let registry = Registry::global();
    let region = registry.create_unlocked("global", PORT, RegionKind::RecursiveMutex, false);
    assert!(std::ptr::eq(registry, Registry::global()));
    assert!(
        Registry::global()
            .regions(Some(PORT))
            .iter()
            .any(|r| r.id() == region.id())
    );

    region.enter();
    region.exit();
    registry.delete(&region)?;
    Ok(())
}
