//! Table of all live regions, bucketed by module.
//!
//! The table lock is a plain `parking_lot::Mutex`, never an instrumented
//! region. It is held only while the table itself is read or changed;
//! callbacks and snapshot formatting run on a copied list of handles after
//! the lock is released.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::diagnostic::{
    DiagnosticReport, DiagnosticSink, RegionSnapshot, SnapshotFilter, TracingSink,
    render_hold_stats, render_table,
};
use crate::error::{RegionError, RegionResult, Violation};
use crate::halt::{AbortHalt, FatalHalt};
use crate::leaf::LeafDiscipline;
use crate::location::SourceLocation;
use crate::module::ModuleId;
use crate::primitive::RegionKind;
use crate::region::{Region, RegionBuilder, RegionId, Shared};

static NEXT_REGISTRY: AtomicU64 = AtomicU64::new(1);
static GLOBAL: OnceLock<Registry> = OnceLock::new();

#[derive(Debug, Default)]
struct RegistryTable {
    regions: HashMap<RegionId, Region>,
    modules: BTreeMap<ModuleId, VecDeque<RegionId>>,
}

impl RegistryTable {
    fn collect(&self, module: Option<ModuleId>) -> Vec<Region> {
        let lookup = |ids: &VecDeque<RegionId>| {
            ids.iter()
                .filter_map(|id| self.regions.get(id).cloned())
                .collect::<Vec<_>>()
        };
        match module {
            Some(module) => self.modules.get(&module).map(lookup).unwrap_or_default(),
            None => self.modules.values().flat_map(lookup).collect(),
        }
    }
}

#[derive(Debug)]
struct RegistryInner {
    shared: Arc<Shared>,
    table: Mutex<RegistryTable>,
}

/// Registry of regions and the collaborators they report to.
///
/// Cloning yields another handle to the same registry. Most applications
/// use [`Registry::global`]; tests build their own with [`RegistryBuilder`]
/// so that halts, sinks and clocks can be observed.
#[derive(Debug, Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry with the default collaborators.
    #[must_use]
    pub fn new() -> Self {
        RegistryBuilder::new().build()
    }

    /// Start building a registry.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The process-wide registry, created on first use.
    #[must_use]
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::new)
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.inner.shared)
    }

    /// Create a region with its bootstrap gate closed.
    #[track_caller]
    pub fn create(&self, name: &str, module: ModuleId, kind: RegionKind, leaf: bool) -> Region {
        RegionBuilder::new(name, module)
            .kind(kind)
            .leaf(leaf)
            .create(self)
    }

    /// Create a region and open it with its first exit.
    #[track_caller]
    pub fn create_unlocked(
        &self,
        name: &str,
        module: ModuleId,
        kind: RegionKind,
        leaf: bool,
    ) -> Region {
        RegionBuilder::new(name, module)
            .kind(kind)
            .leaf(leaf)
            .create_unlocked(self)
    }

    /// Insert at the head of the region's module bucket.
    #[track_caller]
    pub(crate) fn register(&self, region: &Region) {
        let location = SourceLocation::caller();
        let mut table = self.inner.table.lock();
        if table.regions.contains_key(&region.id()) {
            drop(table);
            region.core().fatal(
                Violation::DoubleRegistration {
                    region: region.name().to_string(),
                },
                Some(location),
            );
        }
        table.regions.insert(region.id(), region.clone());
        table
            .modules
            .entry(region.module())
            .or_default()
            .push_front(region.id());
        drop(table);
        debug!(region = region.name(), module = %region.module(), kind = %region.kind(), "Region registered");
    }

    /// Remove a region from the registry.
    ///
    /// Deleting a region some thread holds halts with
    /// [`Violation::DeleteWhileHeld`]. A region that was never exited counts
    /// as held by its creator. Any later operation on the handle halts with
    /// [`Violation::UninitializedRegionUse`], including an acquisition that
    /// was already past its liveness check when the delete went through.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::ForeignRegion`] for a region of another
    /// registry and [`RegionError::NotRegistered`] if it was already deleted.
    #[track_caller]
    pub fn delete(&self, region: &Region) -> RegionResult<()> {
        let location = SourceLocation::caller();
        if region.core().shared.registry_id != self.inner.shared.registry_id {
            return Err(RegionError::ForeignRegion(region.name().to_string()));
        }

        let mut table = self.inner.table.lock();
        if !table.regions.contains_key(&region.id()) {
            return Err(RegionError::not_registered(region.name(), region.module()));
        }
        if let Some(owner) = region.retire() {
            drop(table);
            region.core().fatal(
                Violation::DeleteWhileHeld {
                    region: region.name().to_string(),
                    owner,
                },
                Some(location),
            );
        }
        table.regions.remove(&region.id());
        let module = region.module();
        let now_empty = table.modules.get_mut(&module).is_some_and(|ids| {
            ids.retain(|id| *id != region.id());
            ids.is_empty()
        });
        if now_empty {
            table.modules.remove(&module);
        }
        drop(table);

        debug!(region = region.name(), module = %module, "Region deleted");
        Ok(())
    }

    /// Call `f` for every region, in module order.
    pub fn for_each(&self, f: impl FnMut(&Region)) {
        self.regions(None).iter().for_each(f);
    }

    /// Call `f` for every region of `module`.
    pub fn for_each_in_module(&self, module: ModuleId, f: impl FnMut(&Region)) {
        self.regions(Some(module)).iter().for_each(f);
    }

    /// Handles to all regions, or those of one module, in listing order.
    #[must_use]
    pub fn regions(&self, module: Option<ModuleId>) -> Vec<Region> {
        self.inner.table.lock().collect(module)
    }

    /// Number of registered regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.table.lock().regions.len()
    }

    /// Whether no region is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots of the regions selected by `filter`.
    #[must_use]
    pub fn snapshot(&self, filter: SnapshotFilter) -> Vec<RegionSnapshot> {
        self.regions(filter.module)
            .iter()
            .map(|region| region.snapshot(filter.detailed))
            .filter(|snapshot| !filter.blocking_only || snapshot.state.is_blocking())
            .collect()
    }

    /// Detailed report of every locked or unexited region.
    #[must_use]
    pub fn blocking_report(&self, reason: impl Into<String>) -> DiagnosticReport {
        DiagnosticReport {
            reason: reason.into(),
            taken_at: self.inner.shared.clock.wall(),
            regions: self.snapshot(SnapshotFilter::all().detailed().blocking_only()),
        }
    }

    /// Region table for `filter`, as text lines.
    #[must_use]
    pub fn render(&self, filter: SnapshotFilter) -> Vec<String> {
        render_table(&self.snapshot(filter), filter.detailed, true)
    }

    /// Write the region table for `filter` to the registry's sink.
    pub fn dump(&self, filter: SnapshotFilter) {
        for line in self.render(filter) {
            self.inner.shared.sink.emit(&line);
        }
    }

    /// Longest and total hold times, as text lines.
    #[must_use]
    pub fn render_hold_stats(&self, module: Option<ModuleId>) -> Vec<String> {
        let filter = SnapshotFilter {
            module,
            ..SnapshotFilter::all()
        };
        render_hold_stats(&self.snapshot(filter))
    }

    /// Reset hold statistics of all regions, or of one module.
    pub fn clear_hold_stats(&self, module: Option<ModuleId>) {
        for region in self.regions(module) {
            region.clear_hold_stats();
        }
    }

    /// Number of leaf violations reported. Never more than one.
    #[must_use]
    pub fn leaf_violations(&self) -> u64 {
        self.inner.shared.leaf.violations()
    }

    /// The leaf violation that disabled leaf checks, if any.
    #[must_use]
    pub fn last_leaf_violation(&self) -> Option<Violation> {
        self.inner.shared.leaf.last_violation()
    }

    /// Whether leaf checks have been disabled by a violation.
    #[must_use]
    pub fn leaf_checks_disabled(&self) -> bool {
        self.inner.shared.leaf.is_disabled()
    }

    /// Whether surveillance has declared a deadlock.
    #[must_use]
    pub fn deadlock_reported(&self) -> bool {
        self.inner.shared.deadlock_reported.load(Ordering::Acquire)
    }
}

/// Builder for [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    halt: Option<Arc<dyn FatalHalt>>,
    sink: Option<Arc<dyn DiagnosticSink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl RegistryBuilder {
    /// Builder with [`AbortHalt`], [`TracingSink`] and [`SystemClock`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fatal halt.
    #[must_use]
    pub fn halt(mut self, halt: Arc<dyn FatalHalt>) -> Self {
        self.halt = Some(halt);
        self
    }

    /// Set the diagnostic sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the registry.
    #[must_use]
    pub fn build(self) -> Registry {
        let shared = Shared {
            registry_id: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
            halt: self.halt.unwrap_or_else(|| Arc::new(AbortHalt)),
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            leaf: LeafDiscipline::new(),
            deadlock_reported: AtomicBool::new(false),
        };
        Registry {
            inner: Arc::new(RegistryInner {
                shared: Arc::new(shared),
                table: Mutex::new(RegistryTable::default()),
            }),
        }
    }
}
