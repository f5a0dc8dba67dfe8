//! Error types for region operations.
//!
//! Two families live here:
//!
//! - [`RegionError`] for the few recoverable API errors (bad configuration,
//!   deleting a region the registry does not know).
//! - [`Violation`] for broken locking protocol. All violations except
//!   [`Violation::Leaf`] end in [`FatalHalt`](crate::FatalHalt); they are never
//!   returned to the caller.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::module::ModuleId;
use crate::thread::ThreadToken;

/// Recoverable errors from registry and configuration APIs.
#[derive(Debug, Clone, Error)]
pub enum RegionError {
    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The region is not present in the registry.
    #[error("Region '{name}' is not registered under module {module}")]
    NotRegistered {
        /// Region name.
        name: String,
        /// Module the region claims to belong to.
        module: ModuleId,
    },

    /// The region belongs to a different registry.
    #[error("Region '{0}' belongs to a different registry")]
    ForeignRegion(String),
}

impl RegionError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// Create a not registered error.
    #[must_use]
    pub fn not_registered(name: impl Into<String>, module: ModuleId) -> Self {
        Self::NotRegistered {
            name: name.into(),
            module,
        }
    }
}

/// A specialized `Result` type for region operations.
pub type RegionResult<T> = std::result::Result<T, RegionError>;

/// Locking-protocol violations detected by regions and surveillance.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum Violation {
    /// Operation on a region that was deleted.
    #[error("Region '{region}' used after delete")]
    UninitializedRegionUse {
        /// Region name.
        region: String,
    },

    /// Non-recursive mutex entered twice by the same thread.
    #[error("Region '{region}' already locked by this thread ({thread})")]
    DoubleLock {
        /// Region name.
        region: String,
        /// Offending thread.
        thread: ThreadToken,
    },

    /// Exit on a region that is not locked.
    #[error("Unlock called, but region '{region}' is not locked")]
    UnlockNotLocked {
        /// Region name.
        region: String,
    },

    /// Mutex released by a thread other than its owner.
    #[error("Unlock of '{region}' by thread {thread}, but it is locked by thread {owner}")]
    WrongUnlocker {
        /// Region name.
        region: String,
        /// Recorded owner.
        owner: ThreadToken,
        /// Thread that called exit.
        thread: ThreadToken,
    },

    /// `assert_locked` found the region unlocked.
    #[error("Region '{region}' is not locked")]
    NotLocked {
        /// Region name.
        region: String,
    },

    /// Delete of a region some thread still holds.
    #[error("Region '{region}' deleted while held by thread {owner}")]
    DeleteWhileHeld {
        /// Region name.
        region: String,
        /// Current holder.
        owner: ThreadToken,
    },

    /// A region was registered twice.
    #[error("Region '{region}' is already registered")]
    DoubleRegistration {
        /// Region name.
        region: String,
    },

    /// A region was requested while the thread holds a leaf region.
    #[error("Region '{region}' is attempted taken while leaf region '{leaf}' is held")]
    Leaf {
        /// Region being entered.
        region: String,
        /// Leaf region held by the thread.
        leaf: String,
    },

    /// A region stayed locked without progress past its limit.
    #[error("Region '{region}' ({module}) locked for {held_for:?}, limit {limit:?}")]
    Deadlock {
        /// Region name.
        region: String,
        /// Owning module.
        module: ModuleId,
        /// Age of the current hold when detected.
        held_for: Duration,
        /// Configured limit.
        limit: Duration,
    },
}

impl Violation {
    /// Whether this violation terminates the process.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Leaf { .. })
    }

    /// Name of the region the violation is about.
    #[must_use]
    pub fn region(&self) -> &str {
        match self {
            Self::UninitializedRegionUse { region }
            | Self::DoubleLock { region, .. }
            | Self::UnlockNotLocked { region }
            | Self::WrongUnlocker { region, .. }
            | Self::NotLocked { region }
            | Self::DeleteWhileHeld { region, .. }
            | Self::DoubleRegistration { region }
            | Self::Leaf { region, .. }
            | Self::Deadlock { region, .. } => region,
        }
    }
}
