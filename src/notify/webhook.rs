//! Webhook delivery channel.
//!
//! Validates the rendered URL (C9) before every request including redirects,
//! builds the service-appropriate `Content-Type`/headers, bounds the response
//! body, and records the outcome. Grounded on the donor's `rpc_pool.rs` HTTP
//! dispatch + `#[instrument]` style.

use bytes::BytesMut;
use reqwest::{Client, Method};
use thiserror::Error;
use tracing::{instrument, warn};
use url::Url;

use crate::alert::Alert;
use crate::config::{SsrfConfig, WebhookDestinationConfig, WebhookService};
use crate::notify::render::{self, RenderError};
use crate::notify::ssrf::{self, Disposition, ValidationError};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("url blocked: {0}")]
    Ssrf(#[from] ValidationError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("too many redirects (max {0})")]
    TooManyRedirects(u8),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned {0}")]
    BadStatus(u16),
}

pub struct WebhookTransport {
    http: Client,
}

impl WebhookTransport {
    pub fn new() -> anyhow::Result<Self> {
        let http = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { http })
    }

    /// Renders the URL and body for `destination`, validates the URL, sends
    /// the request, follows up to `ssrf.max_redirects` redirects (re-validating
    /// each target), and reads at most `ssrf.max_response_bytes` of the body.
    #[instrument(skip(self, ssrf, destination, alerts), fields(webhook = %destination.name))]
    pub async fn send(
        &self,
        destination: &WebhookDestinationConfig,
        ssrf: &SsrfConfig,
        alerts: &[Alert],
    ) -> Result<(u16, usize), WebhookError> {
        let mut url = render::render_url(&destination.url_template, alerts, &destination.custom_fields)?;
        let mut custom_fields = destination.custom_fields.clone();

        if destination.service == WebhookService::Telegram {
            let chat_id = render::extract_telegram_chat_id(&mut url)?;
            custom_fields.insert("chat_id".to_string(), chat_id);
        }

        let body = render::render_body(
            destination.service,
            destination.custom_payload_template.as_deref(),
            alerts,
            &custom_fields,
        )?;

        self.validate(&url)?;

        let content_type = if destination.service == WebhookService::Ntfy {
            "text/plain"
        } else {
            "application/json"
        };

        let method = Method::from_bytes(destination.method.as_bytes())
            .unwrap_or(Method::POST);

        let mut redirects_followed = 0u8;
        loop {
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .timeout(ssrf.timeout())
                .header("Content-Type", content_type)
                .header("User-Agent", "Pulse-Monitoring/2.0")
                .body(body.clone());

            for (key, value) in &destination.headers {
                if value.contains("{{") && value.contains("}}") {
                    continue;
                }
                request = request.header(key.as_str(), value.as_str());
            }

            let response = request
                .send()
                .await
                .map_err(|e| WebhookError::Transport(e.to_string()))?;

            let status = response.status();
            if status.is_redirection() {
                if redirects_followed >= ssrf.max_redirects {
                    return Err(WebhookError::TooManyRedirects(ssrf.max_redirects));
                }
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| WebhookError::Transport("redirect without Location".into()))?;
                let next = url
                    .join(location)
                    .map_err(|e| WebhookError::Transport(format!("bad redirect target: {e}")))?;
                self.validate(&next)?;
                url = next;
                redirects_followed += 1;
                continue;
            }

            let size = self.read_bounded(response, ssrf.max_response_bytes).await?;
            if !status.is_success() {
                return Err(WebhookError::BadStatus(status.as_u16()));
            }
            return Ok((status.as_u16(), size));
        }
    }

    fn validate(&self, url: &Url) -> Result<(), ValidationError> {
        let (_, disposition) = ssrf::validate_url(url.as_str())?;
        if disposition == Disposition::AllowWithWarning {
            warn!(url = %url, "webhook targets a private or bare-IP-HTTPS host");
        }
        Ok(())
    }

    /// Reads at most `max_bytes`; anything beyond is discarded and logged.
    async fn read_bounded(
        &self,
        response: reqwest::Response,
        max_bytes: u64,
    ) -> Result<usize, WebhookError> {
        let mut buf = BytesMut::new();
        let mut stream = response;
        let mut total = 0usize;
        while let Some(chunk) = stream
            .chunk()
            .await
            .map_err(|e| WebhookError::Transport(e.to_string()))?
        {
            total += chunk.len();
            if (buf.len() as u64) < max_bytes {
                let remaining = (max_bytes - buf.len() as u64) as usize;
                buf.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
            }
        }
        if total as u64 > max_bytes {
            warn!(total, max_bytes, "webhook response exceeded size cap, truncated");
        }
        Ok(total)
    }
}

impl Default for WebhookTransport {
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
            level: AlertLevel::Critical,
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

    fn destination(url: &str) -> WebhookDestinationConfig {
        WebhookDestinationConfig {
            id: "wh1".into(),
            name: "test".into(),
            url_template: url.into(),
            method: "POST".into(),
            service: WebhookService::Generic,
            headers: HashMap::new(),
            custom_payload_template: None,
            custom_fields: HashMap::new(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn ssrf_blocked_url_never_opens_a_socket() {
        let transport = WebhookTransport::new().unwrap();
        let ssrf = SsrfConfig {
            timeout_secs: 5,
            ..SsrfConfig::default()
        };
        let dest = destination("http://169.254.169.254/latest/meta-data/");
        let result = transport.send(&dest, &ssrf, &[sample_alert()]).await;
        assert!(matches!(result, Err(WebhookError::Ssrf(_))));
    }

    #[tokio::test]
    async fn successful_post_returns_status_and_size() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(200)
            .with_body("{\"ok\":true}")
            .create_async()
            .await;

        let transport = WebhookTransport::new().unwrap();
        let ssrf = SsrfConfig {
            timeout_secs: 5,
            ..SsrfConfig::default()
        };
        let dest = destination(&format!("{}/hook", server.url()));
        let result = transport.send(&dest, &ssrf, &[sample_alert()]).await.unwrap();
        assert_eq!(result.0, 200);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn redirect_target_is_revalidated_and_blocked() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(302)
            .with_header("Location", "http://169.254.169.254/evil")
            .create_async()
            .await;

        let transport = WebhookTransport::new().unwrap();
        let ssrf = SsrfConfig {
            timeout_secs: 5,
            ..SsrfConfig::default()
        };
        let dest = destination(&format!("{}/hook", server.url()));
        let result = transport.send(&dest, &ssrf, &[sample_alert()]).await;
        assert!(matches!(result, Err(WebhookError::Ssrf(_))));
    }

    #[tokio::test]
    async fn bad_status_surfaces_as_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(500)
            .create_async()
            .await;

        let transport = WebhookTransport::new().unwrap();
        let ssrf = SsrfConfig {
            timeout_secs: 5,
            ..SsrfConfig::default()
        };
        let dest = destination(&format!("{}/hook", server.url()));
        let result = transport.send(&dest, &ssrf, &[sample_alert()]).await;
        assert!(matches!(result, Err(WebhookError::BadStatus(500))));
    }

    #[test]
    fn headers_with_unrendered_template_markers_are_dropped() {
        let mut headers = HashMap::new();
        headers.insert("X-Static".to_string(), "ok".to_string());
        headers.insert("X-Dynamic".to_string(), "{{not.rendered}}".to_string());
        let forwarded: Vec<_> = headers
            .iter()
            .filter(|(_, v)| !(v.contains("{{") && v.contains("}}")))
            .collect();
        assert_eq!(forwarded.len(), 1);
    }
}
