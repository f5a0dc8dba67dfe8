//! Logical owning subsystems of regions.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifier of the subsystem that owns a region.
///
/// Regions are bucketed by module in the registry and listed in module id
/// order. Identity and ordering use the numeric id only; the name is carried
/// for diagnostics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModuleId {
    id: u32,
    name: &'static str,
}

impl ModuleId {
    /// Create a module identifier.
    #[must_use]
    pub const fn new(id: u32, name: &'static str) -> Self {
        Self { id, name }
    }

    /// Numeric id.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Display name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ModuleId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ModuleId {}

impl Hash for ModuleId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for ModuleId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ModuleId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
