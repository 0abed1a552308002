//! Root configuration for a Pulse process.
//!
//! Loading and persisting the file itself is a caller concern (out of scope, same
//! as the donor project's config layer); this module only knows how to turn TOML
//! text plus an environment overlay into a validated `Config`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::logging::LoggingConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub clusters: Vec<ClusterSourceConfig>,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub ssrf: SsrfConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clusters: Vec::new(),
            notifications: NotificationConfig::default(),
            ssrf: SsrfConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Parse a `Config` from raw TOML text.
    pub fn from_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("failed to parse config TOML")
    }

    /// Load `.env` into the process environment (if present), then parse the file
    /// at `path`. Environment-sourced fields (e.g. endpoint auth tokens supplied
    /// via `#[serde(default = "...")]` hooks reading `std::env::var`) become
    /// visible to `serde` only because this runs first.
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{path}'"))?;
        let mut cfg = Self::from_str(&text)?;
        cfg.logging = cfg.logging.from_env();
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSourceConfig {
    pub name: String,
    pub endpoints: Vec<EndpointEntry>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    10
}

impl ClusterSourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointEntry {
    pub url: String,
    pub token: String,
    #[serde(default)]
    pub insecure_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_group_window_secs")]
    pub group_window_secs: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub group_by_node: bool,
    #[serde(default)]
    pub group_by_guest_type: bool,
    #[serde(default)]
    pub webhooks: Vec<WebhookDestinationConfig>,
    #[serde(default)]
    pub email: Option<EmailConfig>,
    #[serde(default)]
    pub apprise: Option<AppriseConfig>,
}

fn default_group_window_secs() -> u64 {
    30
}
fn default_cooldown_secs() -> u64 {
    300
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group_window_secs: default_group_window_secs(),
            cooldown_secs: default_cooldown_secs(),
            group_by_node: false,
            group_by_guest_type: false,
            webhooks: Vec::new(),
            email: None,
            apprise: None,
        }
    }
}

impl NotificationConfig {
    pub fn group_window(&self) -> Duration {
        Duration::from_secs(self.group_window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookService {
    Generic,
    Discord,
    Slack,
    Teams,
    Telegram,
    Pagerduty,
    Gotify,
    Pushover,
    Ntfy,
}

impl Default for WebhookService {
    fn default() -> Self {
        WebhookService::Generic
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDestinationConfig {
    pub id: String,
    pub name: String,
    pub url_template: String,
    #[serde(default = "default_webhook_method")]
    pub method: String,
    #[serde(default)]
    pub service: WebhookService,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub custom_payload_template: Option<String>,
    #[serde(default)]
    pub custom_fields: std::collections::HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_webhook_method() -> String {
    "POST".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default = "default_true")]
    pub use_starttls: bool,
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppriseConfig {
    #[serde(default)]
    pub cli_path: Option<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub config_key: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_apprise_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_apprise_timeout_secs() -> u64 {
    30
}

impl AppriseConfig {
    /// Clamped per spec §5 (5-120s).
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.clamp(5, 120))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsrfConfig {
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u8,
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: u64,
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub trusted_networks: Vec<String>,
}

fn default_max_redirects() -> u8 {
    3
}
fn default_max_response_bytes() -> u64 {
    1024 * 1024
}
fn default_webhook_timeout_secs() -> u64 {
    30
}

impl Default for SsrfConfig {
    fn default() -> Self {
        Self {
            max_redirects: default_max_redirects(),
            max_response_bytes: default_max_response_bytes(),
            timeout_secs: default_webhook_timeout_secs(),
            trusted_networks: Vec::new(),
        }
    }
}

impl SsrfConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_rate_limit_max")]
    pub max_per_window: u32,
}

fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_rate_limit_max() -> u32 {
    10
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_rate_limit_window_secs(),
            max_per_window: default_rate_limit_max(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}
