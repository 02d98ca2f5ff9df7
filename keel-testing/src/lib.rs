//! Testing utilities for keel.
//!
//! This crate provides test doubles for the ports keel consumes.
//!
//! ## Features
//!
//! - **InMemoryStateAdapter** - `StateAdapter` over a `HashMap` with failure injection
//! - **RecordingMessagingAdapter** - records published events, loops back to subscribers
//! - **CapturingLogSink** - in-memory `LogSink` for asserting on log output
//! - **CallRecorder** - method call tracking
//! - **Assertions** - error-kind assertions for `keel_core::Result`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keel_testing::*;
//! use keel_core::{Context, Error, ErrorKind, StateAdapter};
//! use std::sync::Arc;
//!
//! let adapter = Arc::new(InMemoryStateAdapter::new());
//! adapter.fail_times(1, Error::internal("connection reset"));
//!
//! let result = adapter.get(&Context::background(), "user:1").await;
//! assert_error_kind(&result, ErrorKind::Internal);
//! assert_eq!(adapter.calls().method_call_count("get"), 1);
//! ```

mod assertions;
mod log;
mod messaging;
mod mock;
mod state;

pub use assertions::*;
pub use log::{CapturedRecord, CapturingLogSink};
pub use messaging::RecordingMessagingAdapter;
pub use mock::CallRecorder;
pub use state::InMemoryStateAdapter;
