//! Mock collaborators for registries under test.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use regionwatch::{Clock, DiagnosticSink, FatalEvent, FatalHalt, Violation};
use std::time::{Duration, Instant};

/// Halt that records the event and then panics instead of aborting.
///
/// The panic unwinds out of the region operation (or the surveillance
/// thread) that detected the violation, so tests observe it with
/// `catch_unwind` or a thread join.
#[derive(Debug, Default)]
pub struct RecordingHalt {
    events: Mutex<Vec<FatalEvent>>,
}

impl RecordingHalt {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of halts so far.
    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    /// All recorded events.
    pub fn events(&self) -> Vec<FatalEvent> {
        self.events.lock().clone()
    }

    /// The most recent event.
    pub fn last(&self) -> Option<FatalEvent> {
        self.events.lock().last().cloned()
    }

    /// Violations of all recorded events, in order.
    pub fn violations(&self) -> Vec<Violation> {
        self.events
            .lock()
            .iter()
            .map(|event| event.violation.clone())
            .collect()
    }
}

impl FatalHalt for RecordingHalt {
    fn halt(&self, event: FatalEvent) -> ! {
        let message = format!("fatal halt: {event}");
        self.events.lock().push(event);
        panic!("{message}");
    }
}

/// Sink that keeps every line.
#[derive(Debug, Default)]
pub struct CapturingSink {
    lines: Mutex<Vec<String>>,
}

impl CapturingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything emitted so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Whether any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }

    /// Number of lines containing `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.lines
            .lock()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }

    /// Forget all lines.
    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl DiagnosticSink for CapturingSink {
    fn emit(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    wall_start: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Clock frozen at the moment of creation.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            wall_start: Utc::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move both clocks forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock();
        *offset += by;
    }

    /// Total time advanced.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn wall(&self) -> DateTime<Utc> {
        let offset = TimeDelta::from_std(self.elapsed()).unwrap_or(TimeDelta::MAX);
        self.wall_start + offset
    }
}
