//! Shared test utilities for regionwatch.
//!
//! # Modules
//!
//! - [`mod@must`] - Unwrap helpers with good error messages and `#[track_caller]`
//! - [`mock`] - Recording halt, capturing sink and a manual clock
//! - [`fixtures`] - A registry wired to the mocks
//! - [`logging`] - `tracing` subscriber setup for tests
//! - [`prelude`] - Convenience re-exports
//!
//! # Usage
//!
//! ```rust,ignore
//! use regionwatch_test_helpers::prelude::*;
//!
//! let fixture = RegistryFixture::new();
//! let region = fixture.registry.create_unlocked("a", MODULE, RegionKind::Mutex, false);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::unwrap_used, clippy::panic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod fixtures;
pub mod logging;
pub mod mock;
pub mod must;
pub mod prelude;

pub use fixtures::RegistryFixture;
pub use logging::init_test_logging;
pub use mock::{CapturingSink, ManualClock, RecordingHalt};
pub use must::*;
