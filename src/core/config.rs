use crate::ops::telemetry::LogFormat;
use crate::transport::{ConnectOptions, Credentials, TlsSettings};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_ENV: &str = "FLEETSEED_CONFIG";
const CONFIG_DEFAULT_PATH: &str = "config/fleetseed.toml";
/// rumqttc refuses keepalives below five seconds.
const MIN_KEEPALIVE_SECS: u64 = 5;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keepalive_secs() -> u64 {
    60
}

fn default_client_id() -> String {
    "fleetseed".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_capacity() -> usize {
    1024
}

fn default_disconnect_timeout_secs() -> u64 {
    10
}

fn default_disconnect_poll_ms() -> u64 {
    1000
}

/// Top-level configuration. Every field has a default, so an empty file
/// (or no file at all) is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub seeding: SeedingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Must be unique among concurrently connected processes.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Append `_<pid>` to `client_id`.
    #[serde(default = "default_true")]
    pub append_pid: bool,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Depth of the request channel between client and event loop.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
    #[serde(default)]
    pub tls: Option<BrokerTlsConfig>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keepalive_secs: default_keepalive_secs(),
            client_id: default_client_id(),
            append_pid: true,
            clean_session: true,
            username: None,
            password: None,
            request_capacity: default_request_capacity(),
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerTlsConfig {
    pub ca: PathBuf,
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedingConfig {
    /// Upper bound on waiting for the broker to close after the drain.
    #[serde(default = "default_disconnect_timeout_secs")]
    pub disconnect_timeout_secs: u64,
    #[serde(default = "default_disconnect_poll_ms")]
    pub disconnect_poll_ms: u64,
}

impl Default for SeedingConfig {
    fn default() -> Self {
        Self {
            disconnect_timeout_secs: default_disconnect_timeout_secs(),
            disconnect_poll_ms: default_disconnect_poll_ms(),
        }
    }
}

impl SeedingConfig {
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }

    pub fn disconnect_poll(&self) -> Duration {
        Duration::from_millis(self.disconnect_poll_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    /// Filter directive; the `-v` count wins when given.
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Values given on the command line; each replaces its file value.
#[derive(Debug, Clone, Default)]
pub struct BrokerOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Config {
    /// Load from `FLEETSEED_CONFIG`, else `config/fleetseed.toml` when it
    /// exists, else defaults.
    pub fn load_from_env() -> Result<Self> {
        match env_config_path() {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file (TOML or JSON based on extension).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let data = fs::read_to_string(path_ref)
            .with_context(|| format!("unable to read config {}", path_ref.display()))?;
        if is_json(path_ref) {
            Ok(serde_json::from_str(&data)
                .with_context(|| format!("invalid JSON config {}", path_ref.display()))?)
        } else {
            Ok(toml::from_str(&data)
                .with_context(|| format!("invalid TOML config {}", path_ref.display()))?)
        }
    }

    /// An explicit path wins over the environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::load_from_env(),
        }
    }

    pub fn apply_overrides(&mut self, overrides: &BrokerOverrides) {
        let broker = &mut self.broker;
        if let Some(host) = &overrides.host {
            broker.host = host.clone();
        }
        if let Some(port) = overrides.port {
            broker.port = port;
        }
        if let Some(client_id) = &overrides.client_id {
            broker.client_id = client_id.clone();
        }
        if let Some(username) = &overrides.username {
            broker.username = Some(username.clone());
        }
        if let Some(password) = &overrides.password {
            broker.password = Some(password.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        let broker = &self.broker;
        if broker.host.trim().is_empty() {
            bail!("broker.host must be non-empty");
        }
        if broker.port == 0 {
            bail!("broker.port must be > 0");
        }
        if broker.client_id.trim().is_empty() {
            bail!("broker.client_id must be non-empty");
        }
        if broker.keepalive_secs < MIN_KEEPALIVE_SECS {
            bail!("broker.keepalive_secs must be >= {MIN_KEEPALIVE_SECS}");
        }
        if broker.request_capacity == 0 {
            bail!("broker.request_capacity must be > 0");
        }
        if broker.username.is_some() != broker.password.is_some() {
            bail!("broker.username and broker.password must be set together");
        }
        if let Some(tls) = &broker.tls {
            if tls.cert.is_some() != tls.key.is_some() {
                bail!("broker.tls.cert and broker.tls.key must be set together");
            }
            if !tls.ca.exists() {
                bail!("broker.tls.ca {} missing", tls.ca.display());
            }
        }
        if self.seeding.disconnect_poll_ms == 0 {
            bail!("seeding.disconnect_poll_ms must be > 0");
        }
        Ok(())
    }

    /// The client id actually presented to the broker.
    pub fn client_id(&self) -> String {
        if self.broker.append_pid {
            format!("{}_{}", self.broker.client_id, std::process::id())
        } else {
            self.broker.client_id.clone()
        }
    }

    pub fn connect_options(&self) -> ConnectOptions {
        let broker = &self.broker;
        let credentials = match (&broker.username, &broker.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        ConnectOptions {
            host: broker.host.clone(),
            port: broker.port,
            keepalive: Duration::from_secs(broker.keepalive_secs),
            client_id: self.client_id(),
            clean_session: broker.clean_session,
            credentials,
            tls: broker.tls.as_ref().map(|tls| TlsSettings {
                ca: tls.ca.clone(),
                client_cert: tls.cert.clone(),
                client_key: tls.key.clone(),
            }),
            request_capacity: broker.request_capacity,
        }
    }
}

fn env_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    let fallback = PathBuf::from(CONFIG_DEFAULT_PATH);
    fallback.exists().then_some(fallback)
}

fn is_json(path: &Path) -> bool {
    matches!(path.extension().and_then(|s| s.to_str()), Some("json"))
}
