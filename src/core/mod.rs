//! Process configuration.
//!
//! - `config` - configuration parsing, overrides and validation

pub mod config;

pub use config::*;
