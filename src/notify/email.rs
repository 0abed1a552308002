//! Email delivery channel.
//!
//! Multipart text+HTML, STARTTLS honoured when configured, destination
//! defaults to `From` when no recipient list is configured. `lettre`'s async
//! SMTP transport was picked as an enrichment dependency (see `DESIGN.md`) —
//! nothing in the retrieval pack sends mail.

use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::alert::Alert;
use crate::config::EmailConfig;
use crate::notify::render::generic_payload;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

pub struct EmailTransport;

impl EmailTransport {
    /// Sends one multipart message summarising `alerts`. Recipients fall back
    /// to `config.from` when `config.to` is empty.
    pub async fn send(&self, config: &EmailConfig, alerts: &[Alert]) -> Result<(), EmailError> {
        let from: Mailbox = config.from.parse()?;
        let recipients: Vec<&String> = if config.to.is_empty() {
            vec![&config.from]
        } else {
            config.to.iter().collect()
        };

        let subject = format!("Pulse: {} alert(s)", alerts.len());
        let text_body = plain_text_body(alerts);
        let html_body = html_body(alerts);

        let mut builder = Message::builder().from(from).subject(subject);
        for recipient in &recipients {
            let mailbox: Mailbox = recipient.parse()?;
            builder = builder.to(mailbox);
        }

        let message = builder.multipart(
            MultiPart::alternative()
                .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(text_body))
                .singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(html_body)),
        )?;

        let credentials = Credentials::new(config.username.clone(), config.password.clone());
        let mailer = if config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
        }
        .port(config.smtp_port)
        .credentials(credentials)
        .build();

        mailer.send(message).await?;
        Ok(())
    }
}

fn plain_text_body(alerts: &[Alert]) -> String {
    let mut body = format!("{} alert(s) from Pulse:\n\n", alerts.len());
    for alert in alerts {
        body.push_str(&format!(
            "[{:?}] {} — {}\n",
            alert.level, alert.resource_name, alert.message
        ));
    }
    body
}

fn html_body(alerts: &[Alert]) -> String {
    let payload = generic_payload(alerts);
    let mut rows = String::new();
    for alert in alerts {
        rows.push_str(&format!(
            "<tr><td>{:?}</td><td>{}</td><td>{}</td></tr>",
            alert.level, alert.resource_name, alert.message
        ));
    }
    format!(
        "<html><body><p>{} alert(s) from Pulse (generated {}).</p><table>{}</table></body></html>",
        alerts.len(),
        payload["timestamp"].as_str().unwrap_or_default(),
        rows
    )
}
