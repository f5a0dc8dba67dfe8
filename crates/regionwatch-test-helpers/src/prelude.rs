//! Convenience re-exports for common test utilities.
//!
//! ```rust,ignore
//! use regionwatch_test_helpers::prelude::*;
//! ```

pub use crate::fixtures::RegistryFixture;
pub use crate::logging::init_test_logging;
pub use crate::mock::{CapturingSink, ManualClock, RecordingHalt};
pub use crate::must::{must, must_join, must_some, panic_message};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
