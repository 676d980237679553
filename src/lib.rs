#![deny(unused, dead_code)]
#![deny(clippy::all, clippy::pedantic)]
// Module naming: SessionError, TransportError and friends
#![allow(clippy::module_name_repetitions)]
// Function complexity: event dispatch and the seeding walk read best whole
#![allow(clippy::too_many_lines)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
// Import style
#![allow(clippy::wildcard_imports)]
// Control flow style
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::single_match_else)]
#![allow(clippy::manual_let_else)]
// Passing style: commands take their parsed args by value
#![allow(clippy::needless_pass_by_value)]
// Closure style
#![allow(clippy::redundant_closure_for_method_calls)]
// Transport impls that complete without awaiting
#![allow(clippy::unused_async)]

//! Fleetseed - retained fleet snapshot seeder for MQTT brokers.
//!
//! Publishes every (entity, aspect) pair of the fleet store as a retained
//! message and proves, before disconnecting, that the broker acknowledged
//! each one.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//!
//! ## Session
//! - `session::tracker` - In-flight operation ledger and ack reconciliation
//! - `session::state` - Connect/disconnect lifecycle
//! - `session::drain` - Seeding counters and the one-shot disconnect gate
//! - `session::error` - Session error taxonomy
//!
//! ## Transport
//! - `transport` - Transport boundary and events
//! - `transport::tls` - rustls client configuration
//! - `transport::memory` - Scripted in-process transport
//!
//! ## Domain
//! - `entities` - Entity model, snapshot source, payload encoding
//! - `topics` - Topic naming scheme
//! - `seeding` - Seeding passes and live updates
//!
//! ## Operations
//! - `ops::telemetry` - Logging setup

// Core infrastructure
pub mod core;

// Session and transport
pub mod session;
pub mod transport;

// Domain
pub mod entities;
pub mod seeding;
pub mod topics;

// Operations
pub mod ops;

// CLI
pub mod cli;

pub use self::core::config;
pub use ops::telemetry;
pub use seeding::{LivePublisher, Seeder};
pub use session::Session;
