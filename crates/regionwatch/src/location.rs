//! Source locations recorded for lock and unlock sites.

use serde::Serialize;
use std::fmt;
use std::panic::Location;

/// File and line of a lock or unlock call site.
///
/// Captured with `#[track_caller]` by [`Region::enter`](crate::Region::enter)
/// and friends, or built explicitly with [`SourceLocation::new`] or the
/// [`here!`](crate::here) macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceLocation {
    file: &'static str,
    line: u32,
}

impl SourceLocation {
    /// Create a location from a file path and line number.
    #[must_use]
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Location of the caller of the enclosing `#[track_caller]` function.
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        Location::caller().into()
    }

    /// Full file path as recorded.
    #[must_use]
    pub const fn file(&self) -> &'static str {
        self.file
    }

    /// Line number.
    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }

    /// File name without its directory part.
    #[must_use]
    pub fn file_name(&self) -> &'static str {
        self.file
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.file)
    }
}

impl From<&'static Location<'static>> for SourceLocation {
    fn from(location: &'static Location<'static>) -> Self {
        Self::new(location.file(), location.line())
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.file_name(), self.line)
    }
}

/// Build a [`SourceLocation`] for the line this macro is expanded on.
#[macro_export]
macro_rules! here {
    () => {
        $crate::SourceLocation::new(file!(), line!())
    };
}
