//! Operational plumbing.
//!
//! - `telemetry` - tracing subscriber setup and log level control

pub mod telemetry;

pub use telemetry::*;
