//! Fleetseed CLI.
//!
//! - `fleetseed seed` - publish the snapshot as retained messages and drain
//! - `fleetseed plan` - print the ordered publishes without connecting
//! - `fleetseed watch` - stream messages from topic filters

mod args;
pub mod commands;

pub use args::{
    BrokerArgs, Cli, Commands, OutputFormat, PlanArgs, QosLevel, SeedArgs, WatchArgs,
};
