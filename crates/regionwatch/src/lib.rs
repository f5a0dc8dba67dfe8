//! # regionwatch
//!
//! Instrumented critical regions with a deadlock watchdog.
//!
//! Every lock an application takes is wrapped in a [`Region`]: a mutex,
//! recursive mutex or counting semaphore that records who holds it, from
//! where, for how long, and how often it has been acquired. Locking-protocol
//! violations are detected at the call that commits them, and a background
//! [`Surveillance`] task treats "locked too long without progress" as a
//! fatal condition.
//!
//! ## Failure Model
//!
//! - **Fail fast**: double locks, unlocking a free region, unlocking another
//!   thread's mutex, deleting a held region and use after delete never
//!   return. They build a [`DiagnosticReport`] and call the registry's
//!   [`FatalHalt`], which aborts by default.
//! - **Leaf violations** are reported once and then leaf checking is turned
//!   off for the registry; the offending acquisition proceeds.
//! - **Deadlocks** are reported once, with every locked or never-exited
//!   region listed, then halted. No lock is ever broken.
//!
//! ## Architecture
//!
//! - [`region`] - the instrumented region, its builder and RAII guard
//! - [`registry`] - module-bucketed table of regions and their collaborators
//! - [`surveillance`] - periodic deadlock detection
//! - [`diagnostic`] - snapshots, text tables and sinks
//! - [`ledger`] - per-region ring of recent lock attempts
//! - [`halt`] - the fatal termination path
//! - [`error`] - recoverable errors and the violation taxonomy
//!
//! ## Example
//!
//! ```rust
//! use regionwatch::prelude::*;
//!
//! const VLAN: ModuleId = ModuleId::new(12, "vlan");
//!
//! let registry = Registry::new();
//! let region = Region::builder("vlan.crit", VLAN)
//!     .kind(RegionKind::RecursiveMutex)
//!     .create_unlocked(&registry);
//!
//! {
//!     let _guard = region.lock();
//!     assert!(region.is_locked());
//! }
//! assert_eq!(region.peek(), LockState::Unlocked);
//! assert_eq!(region.generation(), 1);
//! ```

#![deny(
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::panic,
    missing_docs,
    missing_debug_implementations
)]
#![warn(clippy::pedantic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod clock;
pub mod diagnostic;
pub mod error;
mod gate;
pub mod halt;
mod leaf;
pub mod ledger;
pub mod location;
pub mod module;
pub mod primitive;
pub mod region;
pub mod registry;
pub mod surveillance;
pub mod thread;

pub mod prelude;

pub use clock::{Clock, SystemClock};
pub use diagnostic::{
    DiagnosticReport, DiagnosticSink, HoldStats, LockSite, RegionSnapshot, RegionState,
    SnapshotFilter, TracingSink, render_hold_stats, render_table,
};
pub use error::{RegionError, RegionResult, Violation};
pub use halt::{AbortHalt, FatalEvent, FatalHalt};
pub use ledger::{AttemptLedger, AttemptRecord, AttemptSlot, LEDGER_CAPACITY, LedgerSnapshot};
pub use location::SourceLocation;
pub use module::ModuleId;
pub use primitive::{LockState, RegionKind};
pub use region::{LockLimit, MAX_NAME_LEN, Region, RegionBuilder, RegionGuard, RegionId};
pub use registry::{Registry, RegistryBuilder};
pub use surveillance::{
    DeadlockReport, Surveillance, SurveillanceConfig, SurveillanceConfigBuilder,
    SurveillanceHandle, stable_poll_limit,
};
pub use thread::ThreadToken;
