use anyhow::Result;
use serde::Deserialize;
use std::fmt;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as layer_fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::reload;

pub type LogHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => f.write_str("json"),
            LogFormat::Text => f.write_str("text"),
        }
    }
}

/// Map a `-v` count to a filter directive.
pub fn verbosity_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// `RUST_LOG` wins over `level`; an unparsable directive falls back to warn.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install the global subscriber writing to stderr, with a reloadable level.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<LogHandle> {
    let (filter_layer, handle) = reload::Layer::new(build_filter(level));
    let registry = tracing_subscriber::registry().with(filter_layer);
    let installed = match format {
        LogFormat::Json => registry
            .with(
                layer_fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(layer_fmt::time::UtcTime::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                layer_fmt::layer()
                    .with_target(false)
                    .with_timer(layer_fmt::time::UtcTime::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to init tracing: {e}"))?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_maps_to_levels() {
        assert_eq!(verbosity_level(0), "warn");
        assert_eq!(verbosity_level(1), "info");
        assert_eq!(verbosity_level(2), "debug");
        assert_eq!(verbosity_level(3), "trace");
        assert_eq!(verbosity_level(9), "trace");
    }

    #[test]
    fn test_log_format_from_config() {
        #[derive(Deserialize)]
        struct Doc {
            format: LogFormat,
        }
        let doc: Doc = toml::from_str("format = \"json\"").unwrap();
        assert_eq!(doc.format, LogFormat::Json);
        assert_eq!(LogFormat::default().to_string(), "text");
    }
}
