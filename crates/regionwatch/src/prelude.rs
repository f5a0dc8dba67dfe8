//! Prelude for regionwatch.
//!
//! This module re-exports the most commonly used types for convenient importing.
//!
//! # Example
//!
//! ```rust
//! use regionwatch::prelude::*;
//!
//! let registry = Registry::new();
//! let region = registry.create_unlocked("app.crit", ModuleId::new(1, "app"), RegionKind::Mutex, false);
//! region.enter();
//! region.assert_locked();
//! region.exit();
//! ```

pub use crate::diagnostic::{DiagnosticSink, RegionSnapshot, RegionState, SnapshotFilter};
pub use crate::error::{RegionError, RegionResult, Violation};
pub use crate::halt::{FatalEvent, FatalHalt};
pub use crate::location::SourceLocation;
pub use crate::module::ModuleId;
pub use crate::primitive::{LockState, RegionKind};
pub use crate::region::{LockLimit, Region, RegionBuilder, RegionGuard};
pub use crate::registry::{Registry, RegistryBuilder};
pub use crate::surveillance::{Surveillance, SurveillanceConfig, SurveillanceHandle};
pub use crate::thread::ThreadToken;
