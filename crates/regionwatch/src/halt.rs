//! The non-returning termination path for fatal violations.

use serde::Serialize;
use std::fmt;
use std::io::Write;

use crate::diagnostic::DiagnosticReport;
use crate::error::Violation;
use crate::location::SourceLocation;

/// Everything known about a fatal violation at the moment it is detected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FatalEvent {
    /// What went wrong.
    pub violation: Violation,
    /// Call site that triggered it, if it came from a region operation.
    pub location: Option<SourceLocation>,
    /// Detailed snapshot of the relevant regions.
    pub report: DiagnosticReport,
}

impl fmt::Display for FatalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(location) => write!(f, "{} at {location}", self.violation),
            None => write!(f, "{}", self.violation),
        }
    }
}

/// Terminates the process after a fatal violation.
///
/// Implementations must not return. They are called with no region-internal
/// locks held, but the thread may still hold arbitrary application regions,
/// so implementations should avoid taking application locks.
pub trait FatalHalt: Send + Sync + fmt::Debug {
    /// Report `event` and terminate.
    fn halt(&self, event: FatalEvent) -> !;
}

/// Writes the event and its report to stderr, then aborts.
///
/// Output bypasses `tracing` because a subscriber may need locks that the
/// halting thread, or a deadlocked one, already holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortHalt;

impl FatalHalt for AbortHalt {
    fn halt(&self, event: FatalEvent) -> ! {
        let stderr = std::io::stderr();
        // Abort whether or not stderr accepted the report.
        match write_event(&mut stderr.lock(), &event) {
            Ok(()) | Err(_) => std::process::abort(),
        }
    }
}

fn write_event(out: &mut impl Write, event: &FatalEvent) -> std::io::Result<()> {
    writeln!(out, "Fatal: {event}")?;
    for line in event.report.lines() {
        writeln!(out, "{line}")?;
    }
    out.flush()
}
