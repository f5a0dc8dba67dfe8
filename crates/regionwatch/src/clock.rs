//! Time sources used for lock ages and human-readable timestamps.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Instant;

/// Monotonic and wall-clock time for region bookkeeping.
///
/// The monotonic side drives hold-time statistics and lock ages; the wall
/// side is only used for the `LockTime` column of diagnostics.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic now.
    fn now(&self) -> Instant;

    /// Wall-clock now.
    fn wall(&self) -> DateTime<Utc>;
}

/// Clock backed by [`Instant::now`] and [`Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
