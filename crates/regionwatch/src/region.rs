//! Instrumented critical regions.
//!
//! A [`Region`] wraps one blocking primitive and keeps the bookkeeping the
//! rest of the crate reads: current holder, lock generation, latest lock and
//! unlock sites, hold statistics and an attempt ledger.
//!
//! # Bootstrap gate
//!
//! A region made with [`RegionBuilder::create`] starts logically locked by
//! its creator. The underlying primitive is created unlocked; only a gate is
//! closed. The first [`Region::exit`] opens the gate and returns without
//! touching the primitive, after which the region behaves like the primitive
//! it wraps. [`RegionBuilder::create_unlocked`] performs that first exit on
//! the spot.
//!
//! # Fatal violations
//!
//! Protocol violations (double lock, unlocking a free region, unlocking
//! someone else's mutex, use after delete) do not return. They build a
//! diagnostic report and hand it to the registry's
//! [`FatalHalt`](crate::FatalHalt).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::clock::Clock;
use crate::diagnostic::{
    DiagnosticReport, DiagnosticSink, HoldStats, LockSite, RegionSnapshot, RegionState,
};
use crate::error::Violation;
use crate::gate::BootstrapGate;
use crate::halt::{FatalEvent, FatalHalt};
use crate::leaf::LeafDiscipline;
use crate::ledger::AttemptLedger;
use crate::location::SourceLocation;
use crate::module::ModuleId;
use crate::primitive::{LockState, Primitive, RegionKind};
use crate::registry::Registry;
use crate::thread::ThreadToken;

/// Longest region name kept; longer names are truncated.
pub const MAX_NAME_LEN: usize = 32;

static NEXT_REGION: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RegionId(u64);

impl RegionId {
    fn next() -> Self {
        Self(NEXT_REGION.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How long a region may stay locked without progress before surveillance
/// declares a deadlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockLimit {
    /// Never checked.
    Disabled,
    /// Checked against this duration.
    After(Duration),
}

impl LockLimit {
    /// Limit given to regions unless configured otherwise.
    pub const DEFAULT: Self = Self::After(Duration::from_secs(60));

    /// The duration, unless disabled.
    #[must_use]
    pub const fn duration(self) -> Option<Duration> {
        match self {
            Self::Disabled => None,
            Self::After(limit) => Some(limit),
        }
    }
}

impl Default for LockLimit {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Collaborators and latches shared by every region of one registry.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) registry_id: u64,
    pub(crate) halt: Arc<dyn FatalHalt>,
    pub(crate) sink: Arc<dyn DiagnosticSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) leaf: LeafDiscipline,
    pub(crate) deadlock_reported: AtomicBool,
}

/// Per-region bookkeeping owned by the surveillance task.
#[derive(Debug)]
pub(crate) struct PollState {
    pub(crate) last_seen_generation: AtomicU64,
    pub(crate) stable_polls: AtomicU64,
}

impl Default for PollState {
    /// No generation seen yet, so the first observation of a held region,
    /// even an unexited one at generation 0, only records its generation.
    fn default() -> Self {
        Self {
            last_seen_generation: AtomicU64::new(u64::MAX),
            stable_polls: AtomicU64::new(0),
        }
    }
}

#[derive(Debug)]
struct LockRecord {
    created_at: Instant,
    lock: LockSite,
    locked_at: Option<Instant>,
    unlock: LockSite,
    hold: HoldStats,
}

#[derive(Debug)]
pub(crate) struct RegionCore {
    id: RegionId,
    name: Arc<str>,
    module: ModuleId,
    kind: RegionKind,
    leaf: bool,
    limit: Mutex<LockLimit>,
    primitive: Primitive,
    gate: BootstrapGate,
    generation: AtomicU64,
    holder: AtomicU64,
    record: Mutex<LockRecord>,
    ledger: AttemptLedger,
    deleted: AtomicBool,
    pub(crate) poll: PollState,
    pub(crate) shared: Arc<Shared>,
}

impl RegionCore {
    fn holder(&self) -> Option<ThreadToken> {
        ThreadToken::from_raw(self.holder.load(Ordering::Acquire))
    }

    fn check_alive(&self, location: Option<SourceLocation>) {
        if self.deleted.load(Ordering::Acquire) {
            self.fatal(
                Violation::UninitializedRegionUse {
                    region: self.name.to_string(),
                },
                location,
            );
        }
    }

    fn snapshot(&self, detailed: bool) -> RegionSnapshot {
        let now = self.shared.clock.now();
        let holder = self.holder();
        let state = if !self.gate.is_open() {
            RegionState::Unexited
        } else if holder.is_some() {
            RegionState::Locked
        } else {
            RegionState::Unlocked
        };
        let record = self.record.lock();
        let lock_age = match state {
            RegionState::Unexited => Some(now.saturating_duration_since(record.created_at)),
            RegionState::Locked => record
                .locked_at
                .map(|locked_at| now.saturating_duration_since(locked_at)),
            RegionState::Unlocked => None,
        };
        let (last_lock, last_unlock, hold) = (record.lock, record.unlock, record.hold);
        drop(record);

        RegionSnapshot {
            id: self.id,
            name: self.name.to_string(),
            module: self.module,
            kind: self.kind,
            leaf: self.leaf,
            state,
            generation: self.generation.load(Ordering::Acquire),
            holder,
            depth: self.primitive.depth(),
            last_lock,
            last_unlock,
            lock_age,
            limit: *self.limit.lock(),
            hold,
            attempts: detailed.then(|| self.ledger.snapshot()),
        }
    }

    /// Report a fatal violation on this region and halt.
    ///
    /// Must be called with none of this region's internal locks held. Nothing
    /// goes through `tracing` here; the halt owns all fatal output.
    pub(crate) fn fatal(&self, violation: Violation, location: Option<SourceLocation>) -> ! {
        let report = DiagnosticReport {
            reason: violation.to_string(),
            taken_at: self.shared.clock.wall(),
            regions: vec![self.snapshot(true)],
        };
        self.shared.halt.halt(FatalEvent {
            violation,
            location,
            report,
        })
    }
}

/// Handle to an instrumented critical region.
///
/// Cloning is cheap and yields another handle to the same region.
#[derive(Clone)]
pub struct Region {
    core: Arc<RegionCore>,
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("module", &self.core.module)
            .field("kind", &self.core.kind)
            .field("leaf", &self.core.leaf)
            .finish_non_exhaustive()
    }
}

impl Region {
    /// Start building a region.
    #[must_use]
    pub fn builder(name: impl AsRef<str>, module: ModuleId) -> RegionBuilder {
        RegionBuilder::new(name, module)
    }

    pub(crate) fn from_core(core: Arc<RegionCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<RegionCore> {
        &self.core
    }

    /// Region identity.
    #[must_use]
    pub fn id(&self) -> RegionId {
        self.core.id
    }

    /// Name, truncated to [`MAX_NAME_LEN`] characters.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Owning module.
    #[must_use]
    pub fn module(&self) -> ModuleId {
        self.core.module
    }

    /// Primitive kind.
    #[must_use]
    pub fn kind(&self) -> RegionKind {
        self.core.kind
    }

    /// Whether this is a leaf region.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.core.leaf
    }

    /// Current surveillance limit.
    #[must_use]
    pub fn max_lock(&self) -> LockLimit {
        *self.core.limit.lock()
    }

    /// Change the surveillance limit.
    pub fn set_max_lock(&self, limit: LockLimit) {
        *self.core.limit.lock() = limit;
    }

    /// Number of outermost acquisitions so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.core.generation.load(Ordering::Acquire)
    }

    /// Thread holding the region. Advisory for semaphores.
    #[must_use]
    pub fn holder(&self) -> Option<ThreadToken> {
        self.core.holder()
    }

    /// Locked, unexited or unlocked, judged from the recorded holder.
    #[must_use]
    pub fn state(&self) -> RegionState {
        if !self.core.gate.is_open() {
            RegionState::Unexited
        } else if self.core.holder().is_some() {
            RegionState::Locked
        } else {
            RegionState::Unlocked
        }
    }

    /// Acquire the region, blocking as long as necessary.
    ///
    /// The caller's file and line are recorded as the lock site.
    #[track_caller]
    pub fn enter(&self) {
        self.enter_at(SourceLocation::caller());
    }

    /// Acquire the region, recording `location` as the lock site.
    pub fn enter_at(&self, location: SourceLocation) {
        let core = &*self.core;
        let me = ThreadToken::current();
        core.check_alive(Some(location));

        let slot = core.ledger.record_attempt(me, location);

        if core.kind == RegionKind::Mutex && core.holder() == Some(me) {
            core.fatal(
                Violation::DoubleLock {
                    region: core.name.to_string(),
                    thread: me,
                },
                Some(location),
            );
        }

        if let Some(violation) = core.shared.leaf.on_enter(core.id, &core.name, core.leaf) {
            error!(region = %core.name, %violation, "Leaf region violation, leaf checks disabled");
            core.shared.sink.emit(&format!("{violation} at {location}"));
        }

        core.gate.wait_open();
        let depth = core.primitive.acquire(me);

        if depth == 1 {
            // Pairs with the deleted-then-holder order in `retire`: either
            // delete sees this holder or this acquisition sees the delete.
            core.holder.store(me.get(), Ordering::SeqCst);
            if core.deleted.load(Ordering::SeqCst) {
                core.fatal(
                    Violation::UninitializedRegionUse {
                        region: core.name.to_string(),
                    },
                    Some(location),
                );
            }
            let now = core.shared.clock.now();
            let wall = core.shared.clock.wall();
            {
                let mut record = core.record.lock();
                record.lock = LockSite {
                    thread: Some(me),
                    location: Some(location),
                    at: Some(wall),
                };
                record.locked_at = Some(now);
            }
            core.generation.fetch_add(1, Ordering::AcqRel);
        }
        core.ledger.mark_complete(slot);
    }

    /// Release the region.
    ///
    /// The caller's file and line are recorded as the unlock site.
    #[track_caller]
    pub fn exit(&self) {
        self.exit_at(SourceLocation::caller());
    }

    /// Release the region, recording `location` as the unlock site.
    pub fn exit_at(&self, location: SourceLocation) {
        let core = &*self.core;
        let me = ThreadToken::current();
        core.check_alive(Some(location));

        if core.gate.open() {
            let now = core.shared.clock.now();
            let mut record = core.record.lock();
            let held = now.saturating_duration_since(record.created_at);
            record.unlock = LockSite {
                thread: Some(me),
                location: Some(location),
                at: None,
            };
            record.hold = HoldStats {
                max_hold: held,
                max_hold_location: Some(location),
                max_hold_thread: Some(me),
                total_hold: held,
            };
            drop(record);
            debug!(region = %core.name, held_ms = held.as_millis(), "Region opened by first exit");
            return;
        }

        if core.primitive.peek(me) != LockState::Locked {
            core.fatal(
                Violation::UnlockNotLocked {
                    region: core.name.to_string(),
                },
                Some(location),
            );
        }

        // The primitive's owner is authoritative; the recorded holder lags
        // behind it right after an acquisition.
        if let Some(owner) = core.primitive.owner().filter(|owner| *owner != me) {
            core.fatal(
                Violation::WrongUnlocker {
                    region: core.name.to_string(),
                    owner,
                    thread: me,
                },
                Some(location),
            );
        }

        let logical = match core.kind {
            RegionKind::RecursiveMutex => core.primitive.depth() == 1,
            RegionKind::Mutex | RegionKind::Semaphore => true,
        };

        if logical {
            core.holder.store(0, Ordering::Release);
            let now = core.shared.clock.now();
            let mut record = core.record.lock();
            record.unlock = LockSite {
                thread: Some(me),
                location: Some(location),
                at: None,
            };
            if let Some(locked_at) = record.locked_at.take() {
                let held = now.saturating_duration_since(locked_at);
                record.hold.total_hold = record.hold.total_hold.saturating_add(held);
                if held > record.hold.max_hold {
                    record.hold.max_hold = held;
                    record.hold.max_hold_location = record.lock.location;
                    record.hold.max_hold_thread = record.lock.thread;
                }
            }
        }

        if core.primitive.release(me).is_none() {
            core.fatal(
                Violation::UnlockNotLocked {
                    region: core.name.to_string(),
                },
                Some(location),
            );
        }

        if logical {
            core.shared.leaf.on_exit(core.id, &core.name, core.leaf);
        }
    }

    /// Probe without blocking or changing state.
    ///
    /// A region whose bootstrap gate is still closed reports
    /// [`LockState::Locked`].
    #[track_caller]
    pub fn peek(&self) -> LockState {
        self.core.check_alive(Some(SourceLocation::caller()));
        if !self.core.gate.is_open() {
            return LockState::Locked;
        }
        self.core.primitive.peek(ThreadToken::current())
    }

    /// Whether [`peek`](Self::peek) reports locked.
    #[track_caller]
    pub fn is_locked(&self) -> bool {
        self.peek() == LockState::Locked
    }

    /// Halt unless the region is locked.
    #[track_caller]
    pub fn assert_locked(&self) {
        let location = SourceLocation::caller();
        if self.peek() != LockState::Locked {
            self.core.fatal(
                Violation::NotLocked {
                    region: self.core.name.to_string(),
                },
                Some(location),
            );
        }
    }

    /// Enter and return a guard that exits on drop.
    #[track_caller]
    pub fn lock(&self) -> RegionGuard<'_> {
        let location = SourceLocation::caller();
        self.enter_at(location);
        RegionGuard {
            region: self,
            location,
            _not_send: PhantomData,
        }
    }

    /// Read-only projection of the region's current state.
    #[must_use]
    pub fn snapshot(&self, detailed: bool) -> RegionSnapshot {
        self.core.snapshot(detailed)
    }

    /// Thread that keeps the region from being free: the creator while the
    /// bootstrap gate is closed, otherwise the holder.
    pub(crate) fn blocking_owner(&self) -> Option<ThreadToken> {
        if !self.core.gate.is_open() {
            return self.core.record.lock().lock.thread;
        }
        ThreadToken::from_raw(self.core.holder.load(Ordering::SeqCst))
    }

    /// Mark the region deleted unless some thread blocks it, in which case
    /// the mark is withdrawn and that thread is returned.
    pub(crate) fn retire(&self) -> Option<ThreadToken> {
        self.core.deleted.store(true, Ordering::SeqCst);
        let owner = self.blocking_owner();
        if owner.is_some() {
            self.core.deleted.store(false, Ordering::SeqCst);
        } else {
            self.core.ledger.clear();
        }
        owner
    }

    pub(crate) fn clear_hold_stats(&self) {
        self.core.record.lock().hold = HoldStats::default();
    }
}

/// Exits its region when dropped.
///
/// Not `Send`: mutex kinds must be released by the thread that entered them.
#[must_use = "the region is exited as soon as the guard is dropped"]
pub struct RegionGuard<'a> {
    region: &'a Region,
    location: SourceLocation,
    _not_send: PhantomData<*const ()>,
}

impl fmt::Debug for RegionGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionGuard")
            .field("region", &self.region.name())
            .field("location", &self.location)
            .finish()
    }
}

impl Drop for RegionGuard<'_> {
    fn drop(&mut self) {
        self.region.exit_at(self.location);
    }
}

/// Builder for regions.
#[derive(Debug, Clone)]
pub struct RegionBuilder {
    name: String,
    module: ModuleId,
    kind: RegionKind,
    leaf: bool,
    limit: LockLimit,
}

impl RegionBuilder {
    /// Start with a plain, non-leaf mutex and the default limit.
    #[must_use]
    pub fn new(name: impl AsRef<str>, module: ModuleId) -> Self {
        Self {
            name: name.as_ref().chars().take(MAX_NAME_LEN).collect(),
            module,
            kind: RegionKind::Mutex,
            leaf: false,
            limit: LockLimit::DEFAULT,
        }
    }

    /// Set the primitive kind.
    #[must_use]
    pub fn kind(mut self, kind: RegionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Mark as a leaf region.
    #[must_use]
    pub fn leaf(mut self, leaf: bool) -> Self {
        self.leaf = leaf;
        self
    }

    /// Set the surveillance limit.
    #[must_use]
    pub fn max_lock(mut self, limit: LockLimit) -> Self {
        self.limit = limit;
        self
    }

    /// Create and register the region with its bootstrap gate closed.
    ///
    /// The region counts as locked by the caller until its first exit.
    #[track_caller]
    pub fn create(self, registry: &Registry) -> Region {
        let location = SourceLocation::caller();
        let shared = registry.shared();
        let now = shared.clock.now();
        let wall = shared.clock.wall();
        let core = Arc::new(RegionCore {
            id: RegionId::next(),
            name: Arc::from(self.name),
            module: self.module,
            kind: self.kind,
            leaf: self.leaf,
            limit: Mutex::new(self.limit),
            primitive: Primitive::new(self.kind),
            gate: BootstrapGate::closed(),
            generation: AtomicU64::new(0),
            holder: AtomicU64::new(0),
            record: Mutex::new(LockRecord {
                created_at: now,
                lock: LockSite {
                    thread: Some(ThreadToken::current()),
                    location: Some(location),
                    at: Some(wall),
                },
                locked_at: None,
                unlock: LockSite::default(),
                hold: HoldStats::default(),
            }),
            ledger: AttemptLedger::new(),
            deleted: AtomicBool::new(false),
            poll: PollState::default(),
            shared,
        });
        let region = Region::from_core(core);
        registry.register(&region);
        region
    }

    /// Create and register the region, then open it with its first exit.
    #[track_caller]
    pub fn create_unlocked(self, registry: &Registry) -> Region {
        let location = SourceLocation::caller();
        let region = self.create(registry);
        region.exit_at(location);
        region
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;
    use chrono::{DateTime, Utc};

    /// Halt that panics so fatal paths can be observed in unit tests.
    #[derive(Debug, Default)]
    pub(crate) struct PanicHalt {
        pub(crate) events: Mutex<Vec<FatalEvent>>,
    }

    impl FatalHalt for PanicHalt {
        fn halt(&self, event: FatalEvent) -> ! {
            let message = event.to_string();
            self.events.lock().push(event);
            std::panic::panic_any(message)
        }
    }

    #[derive(Debug)]
    pub(crate) struct FixedClock {
        pub(crate) start: Instant,
        pub(crate) offset: Mutex<Duration>,
    }

    impl FixedClock {
        pub(crate) fn new() -> Self {
            Self {
                start: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        pub(crate) fn advance(&self, by: Duration) {
            let mut offset = self.offset.lock();
            *offset = offset.saturating_add(by);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> Instant {
            self.start
                .checked_add(*self.offset.lock())
                .unwrap_or(self.start)
        }

        fn wall(&self) -> DateTime<Utc> {
            DateTime::<Utc>::UNIX_EPOCH
        }
    }

    pub(crate) fn test_registry() -> (Registry, Arc<PanicHalt>, Arc<FixedClock>) {
        let halt = Arc::new(PanicHalt::default());
        let clock = Arc::new(FixedClock::new());
        let registry = RegistryBuilder::new()
            .halt(Arc::clone(&halt) as Arc<dyn FatalHalt>)
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .build();
        (registry, halt, clock)
    }

    const MODULE: ModuleId = ModuleId::new(1, "unit");

    #[test]
    fn test_name_truncated() {
        let (registry, _, _) = test_registry();
        let region = Region::builder("x".repeat(40), MODULE).create_unlocked(&registry);
        assert_eq!(region.name().chars().count(), MAX_NAME_LEN);
    }

    #[test]
    fn test_created_locked_until_first_exit() {
        let (registry, _, clock) = test_registry();
        let region = Region::builder("boot", MODULE).create(&registry);
        assert_eq!(region.state(), RegionState::Unexited);
        assert_eq!(region.peek(), LockState::Locked);

        clock.advance(Duration::from_millis(250));
        region.exit();
        assert_eq!(region.state(), RegionState::Unlocked);
        assert_eq!(region.peek(), LockState::Unlocked);
        assert_eq!(region.generation(), 0);

        let snapshot = region.snapshot(false);
        assert_eq!(snapshot.hold.max_hold, Duration::from_millis(250));
        assert_eq!(snapshot.hold.total_hold, Duration::from_millis(250));
    }

    #[test]
    fn test_hold_stats_track_longest_hold() {
        let (registry, _, clock) = test_registry();
        let region = Region::builder("stats", MODULE).create_unlocked(&registry);

        region.enter();
        clock.advance(Duration::from_millis(30));
        region.exit();
        region.enter();
        clock.advance(Duration::from_millis(10));
        region.exit();

        let hold = region.snapshot(false).hold;
        assert_eq!(hold.max_hold, Duration::from_millis(30));
        assert_eq!(hold.total_hold, Duration::from_millis(40));
        assert_eq!(hold.max_hold_thread, Some(ThreadToken::current()));

        region.clear_hold_stats();
        assert_eq!(region.snapshot(false).hold, HoldStats::default());
    }

    #[test]
    fn test_recursive_generation_counts_outermost_only() {
        let (registry, _, _) = test_registry();
        let region = Region::builder("rec", MODULE)
            .kind(RegionKind::RecursiveMutex)
            .create_unlocked(&registry);

        region.enter();
        region.enter();
        assert_eq!(region.generation(), 1);
        assert_eq!(region.snapshot(false).depth, 2);
        region.exit();
        assert_eq!(region.state(), RegionState::Locked);
        region.exit();
        assert_eq!(region.state(), RegionState::Unlocked);
        assert_eq!(region.holder(), None);
    }

    #[test]
    fn test_guard_exits_on_drop() {
        let (registry, _, _) = test_registry();
        let region = Region::builder("guard", MODULE).create_unlocked(&registry);
        {
            let _guard = region.lock();
            assert!(region.is_locked());
            region.assert_locked();
        }
        assert!(!region.is_locked());
        let snapshot = region.snapshot(false);
        assert_eq!(snapshot.last_lock.location, snapshot.last_unlock.location);
    }

    #[test]
    fn test_double_lock_halts() {
        let (registry, halt, _) = test_registry();
        let region = Region::builder("double", MODULE).create_unlocked(&registry);
        region.enter();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| region.enter()));
        assert!(matches!(result, Err(_)));
        let events = halt.events.lock();
        assert!(matches!(events[0].violation, Violation::DoubleLock { .. }));
        assert_eq!(events[0].report.regions.len(), 1);
        assert!(events[0].report.regions[0].attempts.is_some());
    }

    #[test]
    fn test_unlock_of_free_region_halts() {
        let (registry, halt, _) = test_registry();
        let region = Region::builder("free", MODULE).create_unlocked(&registry);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| region.exit()));
        assert!(matches!(result, Err(_)));
        assert!(matches!(
            halt.events.lock()[0].violation,
            Violation::UnlockNotLocked { .. }
        ));
    }

    #[test]
    fn test_wrong_unlocker_named_before_holder_is_recorded() {
        let (registry, halt, _) = test_registry();
        let region = Region::builder("racy", MODULE).create_unlocked(&registry);
        let Some(other) = ThreadToken::from_raw(u64::MAX) else {
            return;
        };
        // Owner has the primitive but has not stamped itself as holder yet.
        region.core.primitive.acquire(other);
        assert_eq!(region.holder(), None);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| region.exit()));
        assert!(matches!(result, Err(_)));
        assert!(matches!(
            halt.events.lock()[0].violation,
            Violation::WrongUnlocker { owner, .. } if owner == other
        ));
        assert_eq!(region.core.primitive.release(other), Some(0));
    }

    #[test]
    fn test_retire_withdraws_when_blocked() {
        let (registry, _, _) = test_registry();
        let unexited = Region::builder("boot", MODULE).create(&registry);
        assert_eq!(unexited.retire(), Some(ThreadToken::current()));
        assert!(!unexited.core.deleted.load(Ordering::SeqCst));

        let region = Region::builder("held", MODULE).create_unlocked(&registry);
        region.enter();
        assert_eq!(region.retire(), Some(ThreadToken::current()));
        assert!(!region.core.deleted.load(Ordering::SeqCst));
        region.exit();

        assert_eq!(region.retire(), None);
        assert!(region.core.deleted.load(Ordering::SeqCst));
        unexited.exit();
    }

    #[test]
    fn test_assert_locked_halts_when_free() {
        let (registry, halt, _) = test_registry();
        let region = Region::builder("assert", MODULE).create_unlocked(&registry);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| region.assert_locked()));
        assert!(matches!(result, Err(_)));
        assert!(matches!(halt.events.lock()[0].violation, Violation::NotLocked { .. }));
    }
}
