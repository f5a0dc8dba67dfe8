//! Read-only projections of region state and their text rendering.
//!
//! Snapshots are taken without stopping other threads, so a snapshot of a
//! busy region may mix fields from neighbouring lock operations. That is
//! accepted; nothing here feeds back into locking decisions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::ledger::{LEDGER_CAPACITY, LedgerSnapshot};
use crate::location::SourceLocation;
use crate::module::ModuleId;
use crate::primitive::RegionKind;
use crate::region::{LockLimit, RegionId};
use crate::thread::ThreadToken;

const MODULE_COLUMN: usize = 21;
const NAME_COLUMN: usize = 32;
const ATTEMPTS_PER_LINE: usize = 4;

/// Observed state of a region in a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegionState {
    /// Held by some thread.
    Locked,
    /// Never exited since creation; the bootstrap gate is still closed.
    Unexited,
    /// Free.
    Unlocked,
}

impl RegionState {
    /// Whether a deadlock dump lists the region.
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        matches!(self, Self::Locked | Self::Unexited)
    }
}

impl fmt::Display for RegionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Locked => "Locked",
            Self::Unexited => "Unexited",
            Self::Unlocked => "Unlocked",
        };
        f.pad(text)
    }
}

/// Who touched a region last, from where, and when.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockSite {
    /// Thread that performed the operation.
    pub thread: Option<ThreadToken>,
    /// Call site.
    pub location: Option<SourceLocation>,
    /// Wall-clock time, only recorded for locks.
    pub at: Option<DateTime<Utc>>,
}

impl fmt::Display for LockSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&site(self.thread, self.location))
    }
}

/// Longest and cumulative hold times of a region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HoldStats {
    /// Longest single hold observed.
    pub max_hold: Duration,
    /// Lock site of the longest hold.
    pub max_hold_location: Option<SourceLocation>,
    /// Thread of the longest hold.
    pub max_hold_thread: Option<ThreadToken>,
    /// Sum of all holds.
    pub total_hold: Duration,
}

/// Point-in-time view of one region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionSnapshot {
    /// Region identity.
    pub id: RegionId,
    /// Region name.
    pub name: String,
    /// Owning module.
    pub module: ModuleId,
    /// Primitive kind.
    pub kind: RegionKind,
    /// Leaf flag.
    pub leaf: bool,
    /// Locked, unexited or unlocked.
    pub state: RegionState,
    /// Lock generation counter.
    pub generation: u64,
    /// Current holder for mutex kinds, best effort for semaphores.
    pub holder: Option<ThreadToken>,
    /// Recursion depth, recursive mutexes only.
    pub depth: u32,
    /// Latest lock.
    pub last_lock: LockSite,
    /// Latest unlock.
    pub last_unlock: LockSite,
    /// Age of the current hold.
    pub lock_age: Option<Duration>,
    /// Configured surveillance limit.
    pub limit: LockLimit,
    /// Hold statistics.
    pub hold: HoldStats,
    /// Attempt ledger contents, present in detailed snapshots.
    pub attempts: Option<LedgerSnapshot>,
}

/// Selects which regions a snapshot includes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotFilter {
    /// Restrict to one module.
    pub module: Option<ModuleId>,
    /// Include attempt ledgers.
    pub detailed: bool,
    /// Only locked or unexited regions.
    pub blocking_only: bool,
}

impl SnapshotFilter {
    /// Every region, without ledgers.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            module: None,
            detailed: false,
            blocking_only: false,
        }
    }

    /// Restrict to one module.
    #[must_use]
    pub const fn module(mut self, module: ModuleId) -> Self {
        self.module = Some(module);
        self
    }

    /// Include attempt ledgers.
    #[must_use]
    pub const fn detailed(mut self) -> Self {
        self.detailed = true;
        self
    }

    /// Only locked or unexited regions.
    #[must_use]
    pub const fn blocking_only(mut self) -> Self {
        self.blocking_only = true;
        self
    }
}

/// Diagnostics handed to [`FatalHalt`](crate::FatalHalt).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
    /// Why the report was made.
    pub reason: String,
    /// When it was made.
    pub taken_at: DateTime<Utc>,
    /// Regions included, detailed.
    pub regions: Vec<RegionSnapshot>,
}

impl DiagnosticReport {
    /// Render as text lines: the reason, then a detailed table.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.regions.len().saturating_mul(6).saturating_add(4));
        lines.push(format!("{} ({})", self.reason, self.taken_at.format("%Y-%m-%d %H:%M:%S UTC")));
        lines.extend(render_table(&self.regions, true, true));
        lines
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Receiver of pre-formatted diagnostic lines.
pub trait DiagnosticSink: Send + Sync + fmt::Debug {
    /// Emit one line.
    fn emit(&self, line: &str);
}

/// Forwards every line to `tracing::error!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, line: &str) {
        tracing::error!(target: "regionwatch::diagnostic", "{line}");
    }
}

/// Render snapshots in the classic region table layout.
///
/// With `header` set, the column header is printed before the first row,
/// or before every row in detailed mode where ledger lines follow each
/// region.
#[must_use]
pub fn render_table(regions: &[RegionSnapshot], detailed: bool, header: bool) -> Vec<String> {
    let mut lines = Vec::new();
    let mut print_header = header;

    for region in regions {
        if print_header {
            push_table_header(&mut lines);
            print_header = detailed;
        }

        let count = if detailed {
            format!("{:#x}", region.generation)
        } else {
            region.generation.to_string()
        };
        let lock_time = region
            .last_lock
            .at
            .map_or_else(|| "--:--:--".to_string(), |at| at.format("%H:%M:%S").to_string());
        let mut row = format!(
            "{:<MODULE_COLUMN$} {:<NAME_COLUMN$} {} {} {:<8} {count:>10} {lock_time} {}, {}",
            region.module.name(),
            region.name,
            region.kind.code(),
            if region.leaf { 'Y' } else { 'N' },
            region.state,
            region.last_lock,
            region.last_unlock,
        );

        match (&region.attempts, detailed) {
            (Some(ledger), true) => {
                row.push_str(&format!(", lock_attempt_cnt={:#x}", ledger.attempts));
                lines.push(row);
                lines.extend(render_attempts(ledger));
                lines.push(String::new());
            }
            _ => lines.push(row),
        }
    }

    if detailed && !regions.is_empty() {
        lines.push("Lock attempts are logged best effort and may be slightly inconsistent under contention.".to_string());
        lines.push(format!(
            "The last logged lock attempt is stored in entry [lock_attempt_cnt % {LEDGER_CAPACITY}]. \
             Entries marked '*' have not acquired the region yet."
        ));
    }
    lines
}

/// Render the longest and cumulative hold times per region.
#[must_use]
pub fn render_hold_stats(regions: &[RegionSnapshot]) -> Vec<String> {
    let mut lines = Vec::with_capacity(regions.len().saturating_add(2));
    if regions.is_empty() {
        return lines;
    }
    lines.push(format!(
        "{:<MODULE_COLUMN$} {:<NAME_COLUMN$} T Conf MaxLock [s] Max Lock [ms] Tot Lock [ms] Lock Position",
        "Module", "Region Name"
    ));
    lines.push(format!(
        "{} {} - ---------------- ------------- ------------- --------------------",
        "-".repeat(MODULE_COLUMN),
        "-".repeat(NAME_COLUMN)
    ));
    for region in regions {
        let configured = match region.limit {
            LockLimit::Disabled => "disabled".to_string(),
            LockLimit::After(limit) => limit.as_secs().to_string(),
        };
        lines.push(format!(
            "{:<MODULE_COLUMN$} {:<NAME_COLUMN$} {} {configured:>16} {:>13} {:>13} {}",
            region.module.name(),
            region.name,
            region.kind.code(),
            region.hold.max_hold.as_millis(),
            region.hold.total_hold.as_millis(),
            site(region.hold.max_hold_thread, region.hold.max_hold_location),
        ));
    }
    lines
}

fn push_table_header(lines: &mut Vec<String>) {
    lines.push(format!(
        "{:<MODULE_COLUMN$} {:<NAME_COLUMN$} T L State    Lock Cnt   LockTime Latest Lock, Latest Unlock",
        "Module", "Region Name"
    ));
    lines.push(format!(
        "{} {} - - -------- ---------- -------- ------------------------------",
        "-".repeat(MODULE_COLUMN),
        "-".repeat(NAME_COLUMN)
    ));
}

fn render_attempts(ledger: &LedgerSnapshot) -> Vec<String> {
    ledger
        .entries
        .chunks(ATTEMPTS_PER_LINE)
        .enumerate()
        .map(|(chunk, entries)| {
            let mut line = String::from(" ");
            for (offset, entry) in entries.iter().enumerate() {
                let index = chunk.saturating_mul(ATTEMPTS_PER_LINE).saturating_add(offset);
                let mark = if entry.pending { "*" } else { "" };
                line.push_str(&format!(" [{index:x}]={}{mark}", site(entry.thread, entry.location)));
            }
            line
        })
        .collect()
}

/// `thread/file#line`, with 0 standing in for unknown parts.
fn site(thread: Option<ThreadToken>, location: Option<SourceLocation>) -> String {
    let thread = ThreadToken::to_raw(thread);
    match location {
        Some(location) => format!("{thread}/{location}"),
        None => format!("{thread}/#0"),
    }
}
