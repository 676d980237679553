//! CLI argument definitions using clap.

use crate::core::config::{BrokerOverrides, TelemetryConfig};
use crate::ops::telemetry::{verbosity_level, LogFormat};
use crate::transport::Qos;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Fleetseed - retained fleet snapshot seeder for MQTT brokers.
#[derive(Parser)]
#[command(name = "fleetseed")]
#[command(version)]
#[command(about = "Seed retained fleet state onto an MQTT broker")]
pub struct Cli {
    /// Increase diagnostic output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format on stderr
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormat>,

    /// Configuration file (TOML, or JSON by extension); falls back to
    /// $FLEETSEED_CONFIG, then config/fleetseed.toml
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// `-v` wins over the configured level; neither means warn.
    pub fn log_level(&self, telemetry: &TelemetryConfig) -> String {
        match (&telemetry.log_level, self.verbose) {
            (Some(level), 0) => level.clone(),
            (_, verbose) => verbosity_level(verbose).to_string(),
        }
    }

    pub fn log_format(&self, telemetry: &TelemetryConfig) -> LogFormat {
        self.log_format.unwrap_or(telemetry.log_format)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish the whole snapshot as retained messages, then disconnect
    Seed(SeedArgs),

    /// Print the publishes a seeding pass would issue, without connecting
    Plan(PlanArgs),

    /// Subscribe to topic filters and stream messages to stdout
    Watch(WatchArgs),
}

// -----------------------------------------------------------------------------
// Shared broker arguments
// -----------------------------------------------------------------------------

#[derive(Args, Clone, Default)]
pub struct BrokerArgs {
    /// Broker hostname or IP
    #[arg(long)]
    pub host: Option<String>,

    /// Broker port
    #[arg(long)]
    pub port: Option<u16>,

    /// MQTT client identifier prefix
    #[arg(long)]
    pub client_id: Option<String>,

    /// Broker username
    #[arg(long, requires = "password")]
    pub username: Option<String>,

    /// Broker password
    #[arg(long, env = "FLEETSEED_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl BrokerArgs {
    pub fn overrides(&self) -> BrokerOverrides {
        BrokerOverrides {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

// -----------------------------------------------------------------------------
// Seed / plan
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct SeedArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,

    /// JSON snapshot of the entity store
    #[arg(long, value_name = "PATH")]
    pub snapshot: PathBuf,
}

/// Output format for plan and watch.
#[derive(clap::ValueEnum, Clone, Copy, Default, PartialEq, Eq, Debug)]
pub enum OutputFormat {
    /// JSON objects, one per line
    #[default]
    Json,
    /// Topic and payload text only
    Raw,
}

#[derive(Args)]
pub struct PlanArgs {
    /// JSON snapshot of the entity store
    #[arg(long, value_name = "PATH")]
    pub snapshot: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    pub format: OutputFormat,
}

// -----------------------------------------------------------------------------
// Watch
// -----------------------------------------------------------------------------

/// QoS level for MQTT operations.
#[derive(clap::ValueEnum, Clone, Copy, Default, PartialEq, Eq, Debug)]
pub enum QosLevel {
    /// At most once (fire and forget)
    Qos0,
    /// At least once (acknowledged delivery)
    #[default]
    Qos1,
    /// Exactly once (assured delivery)
    Qos2,
}

impl QosLevel {
    pub fn to_qos(self) -> Qos {
        match self {
            QosLevel::Qos0 => Qos::AtMostOnce,
            QosLevel::Qos1 => Qos::AtLeastOnce,
            QosLevel::Qos2 => Qos::ExactlyOnce,
        }
    }
}

#[derive(Args)]
pub struct WatchArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,

    /// Comma-separated list of topic filters to subscribe to
    #[arg(long, value_delimiter = ',', required = true)]
    pub topic: Vec<String>,

    /// QoS level for subscriptions
    #[arg(long, value_enum, default_value = "qos1")]
    pub qos: QosLevel,

    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    pub format: OutputFormat,
}
