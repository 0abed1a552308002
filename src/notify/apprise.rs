//! Apprise delivery channel: either shells out to the `apprise` CLI with the
//! configured targets as positional arguments, or POSTs to a user-run Apprise
//! HTTP server. Grounded on `sniffer/security.rs::async_verifier`'s pattern of
//! wrapping a blocking operation in a bounded async task.

use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::alert::Alert;
use crate::config::AppriseConfig;

#[derive(Debug, Error)]
pub enum AppriseError {
    #[error("no delivery mode configured: need either targets (CLI) or server_url (HTTP)")]
    Unconfigured,
    #[error("apprise CLI not found or failed to spawn: {0}")]
    Spawn(String),
    #[error("apprise CLI timed out after {0:?}")]
    Timeout(Duration),
    #[error("apprise CLI exited with status {0}: {1}")]
    CliFailed(i32, String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("apprise server returned {0}")]
    BadStatus(u16),
}

pub struct AppriseTransport {
    http: reqwest::Client,
}

impl AppriseTransport {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
        })
    }

    pub async fn send(&self, config: &AppriseConfig, alerts: &[Alert]) -> Result<(), AppriseError> {
        let title = format!("Pulse: {} alert(s)", alerts.len());
        let body = alerts
            .iter()
            .map(|a| format!("{:?}: {} — {}", a.level, a.resource_name, a.message))
            .collect::<Vec<_>>()
            .join("\n");

        if let Some(server_url) = &config.server_url {
            self.send_http(server_url, config, &title, &body).await
        } else if !config.targets.is_empty() {
            self.send_cli(config, &title, &body).await
        } else {
            Err(AppriseError::Unconfigured)
        }
    }

    async fn send_cli(&self, config: &AppriseConfig, title: &str, body: &str) -> Result<(), AppriseError> {
        let binary = config.cli_path.as_deref().unwrap_or("apprise");
        let mut command = Command::new(binary);
        command
            .args(&config.targets)
            .arg("-t")
            .arg(title)
            .arg("-b")
            .arg(body)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let child = command.spawn().map_err(|e| AppriseError::Spawn(e.to_string()))?;
        let output = timeout(config.timeout(), child.wait_with_output())
            .await
            .map_err(|_| AppriseError::Timeout(config.timeout()))?
            .map_err(|e| AppriseError::Spawn(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(AppriseError::CliFailed(output.status.code().unwrap_or(-1), stderr));
        }
        Ok(())
    }

    async fn send_http(
        &self,
        server_url: &str,
        config: &AppriseConfig,
        title: &str,
        body: &str,
    ) -> Result<(), AppriseError> {
        let url = match &config.config_key {
            Some(key) => format!("{}/notify/{}", server_url.trim_end_matches('/'), key),
            None => format!("{}/notify", server_url.trim_end_matches('/')),
        };

        let mut request = self
            .http
            .post(&url)
            .timeout(config.timeout())
            .json(&serde_json::json!({ "title": title, "body": body }));

        if let Some(api_key) = &config.api_key {
            request = request.header("X-API-Key", api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AppriseError::BadStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

impl Default for AppriseTransport {
    fn default() -> Self {
        Self::new().expect("failed to build default reqwest client")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertLevel;
    use chrono::Utc;
    use std::collections::HashMap;

    fn sample_alert() -> Alert {
        Alert {
            id: "cpu-vm100".into(),
            alert_type: "cpu".into(),
            level: AlertLevel::Info,
            resource_id: "100".into(),
            resource_name: "vm100".into(),
            node: "node-a".into(),
            instance: "dc1".into(),
            message: "CPU usage high".into(),
            value: 95.0,
            threshold: 90.0,
            start_time: Utc::now(),
            metadata: HashMap::new(),
            acknowledged: false,
        }
    }

    fn base_config() -> AppriseConfig {
        AppriseConfig {
            cli_path: None,
            targets: Vec::new(),
            server_url: None,
            config_key: None,
            api_key: None,
            timeout_secs: 30,
        }
    }

    #[tokio::test]
    async fn unconfigured_mode_is_an_error() {
        let transport = AppriseTransport::new().unwrap();
        let result = transport.send(&base_config(), &[sample_alert()]).await;
        assert!(matches!(result, Err(AppriseError::Unconfigured)));
    }

    #[tokio::test]
    async fn http_mode_posts_to_notify_with_config_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/notify/keyA")
            .with_status(200)
            .create_async()
            .await;

        let transport = AppriseTransport::new().unwrap();
        let mut config = base_config();
        config.server_url = Some(server.url());
        config.config_key = Some("keyA".to_string());

        transport.send(&config, &[sample_alert()]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_mode_bad_status_surfaces_as_error() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/notify").with_status(503).create_async().await;

        let transport = AppriseTransport::new().unwrap();
        let mut config = base_config();
        config.server_url = Some(server.url());

        let result = transport.send(&config, &[sample_alert()]).await;
        assert!(matches!(result, Err(AppriseError::BadStatus(503))));
    }

    #[test]
    fn timeout_is_clamped_to_configured_range() {
        let mut config = base_config();
        config.timeout_secs = 999;
        assert_eq!(config.timeout(), Duration::from_secs(120));
        config.timeout_secs = 1;
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }
}
