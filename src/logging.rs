//! Process-wide structured logging setup.
//!
//! Reads `LOG_LEVEL` / `LOG_FORMAT` the way the rest of the environment-driven
//! configuration does, and layers a `tracing-subscriber` filter + formatter on top.
//! File rotation (`LOG_MAX_SIZE`, `LOG_MAX_BACKUPS`, `LOG_MAX_AGE`) is a deployment
//! concern we don't own — we validate and expose the values, an embedder wires them
//! into whatever appender it runs Pulse under.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "" => Ok(LogFormat::Text),
            other => anyhow::bail!("unknown LOG_FORMAT '{other}', expected 'text' or 'json'"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_max_size")]
    pub max_size_mb: u64,
    #[serde(default = "default_log_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_log_max_age")]
    pub max_age_days: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_log_max_size() -> u64 {
    100
}
fn default_log_max_backups() -> u32 {
    3
}
fn default_log_max_age() -> u32 {
    28
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            max_size_mb: default_log_max_size(),
            max_backups: default_log_max_backups(),
            max_age_days: default_log_max_age(),
        }
    }
}

impl LoggingConfig {
    /// Pull overrides from the process environment, falling back to file-provided
    /// defaults. Mirrors the precedence the rest of configuration loading uses:
    /// environment wins over file, file wins over built-in default.
    pub fn from_env(mut self) -> Self {
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.format = format;
        }
        if let Ok(v) = std::env::var("LOG_MAX_SIZE").and_then(|v| {
            v.parse().map_err(|_| std::env::VarError::NotPresent)
        }) {
            self.max_size_mb = v;
        }
        if let Ok(v) = std::env::var("LOG_MAX_BACKUPS").and_then(|v| {
            v.parse().map_err(|_| std::env::VarError::NotPresent)
        }) {
            self.max_backups = v;
        }
        if let Ok(v) = std::env::var("LOG_MAX_AGE").and_then(|v| {
            v.parse().map_err(|_| std::env::VarError::NotPresent)
        }) {
            self.max_age_days = v;
        }
        self
    }
}

/// Initialize the global `tracing` subscriber. Safe to call once per process;
/// a second call returns an error rather than panicking.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let format: LogFormat = config
        .format
        .parse()
        .with_context(|| format!("invalid LOG_FORMAT '{}'", config.format))?;

    let filter = EnvFilter::try_new(&config.level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_formats() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("".parse::<LogFormat>().unwrap(), LogFormat::Text);
    }

    #[test]
    fn rejects_unknown_format() {
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn env_overrides_defaults() {
        std::env::set_var("LOG_LEVEL", "debug");
        let cfg = LoggingConfig::default().from_env();
        assert_eq!(cfg.level, "debug");
        std::env::remove_var("LOG_LEVEL");
    }
}
