//! A registry wired to the mock collaborators.

use regionwatch::{Clock, DiagnosticSink, FatalHalt, Registry};
use std::sync::Arc;

use crate::mock::{CapturingSink, ManualClock, RecordingHalt};

/// A fresh registry plus handles to its recording halt, capturing sink and
/// manual clock.
#[derive(Debug, Clone)]
pub struct RegistryFixture {
    /// The registry under test.
    pub registry: Registry,
    /// Receives fatal events.
    pub halt: Arc<RecordingHalt>,
    /// Receives diagnostic lines.
    pub sink: Arc<CapturingSink>,
    /// Drives lock ages and hold times.
    pub clock: Arc<ManualClock>,
}

impl Default for RegistryFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryFixture {
    /// Build a registry around new mocks.
    pub fn new() -> Self {
        let halt = Arc::new(RecordingHalt::new());
        let sink = Arc::new(CapturingSink::new());
        let clock = Arc::new(ManualClock::new());
        let registry = Registry::builder()
            .halt(Arc::clone(&halt) as Arc<dyn FatalHalt>)
            .sink(Arc::clone(&sink) as Arc<dyn DiagnosticSink>)
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .build();
        Self {
            registry,
            halt,
            sink,
            clock,
        }
    }
}
