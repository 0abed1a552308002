//! Payload Renderer (C8).
//!
//! Turns a batch of `Alert`s into a channel-specific outgoing body: either the
//! user's own handlebars template, a built-in per-service template, or (for
//! `generic`, with no custom template) a plain JSON object serialized directly.
//! Also renders the webhook URL itself, since some services (Telegram bots)
//! need a templated path component.
//!
//! Grounded on nothing in the retrieval pack — rendering user-authored
//! templates at runtime has no precedent here, so `handlebars` was picked as
//! an enrichment dependency (see `DESIGN.md`). Validate-then-render-then-
//! validate control flow mirrors `cluster::classify`'s classify-then-branch
//! shape.

use chrono::Utc;
use handlebars::{
    handlebars_helper, Context as HbContext, Handlebars, Helper, HelperResult, Output,
    RenderContext as HbRenderContext,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;
use url::Url;

use crate::alert::Alert;
use crate::config::WebhookService;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(#[from] handlebars::RenderError),
    #[error("rendered body is not valid JSON: {0}")]
    NotJson(serde_json::Error),
    #[error("rendered url is empty")]
    EmptyUrl,
    #[error("rendered url failed to parse: {0}")]
    InvalidUrl(String),
    #[error("rendered url has no host")]
    MissingHost,
    #[error("telegram chat_id must be numeric (optional leading '-'), got '{0}'")]
    NonNumericChatId(String),
}

const FRAGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`');
const QUERY: &AsciiSet = &FRAGMENT.add(b'#').add(b'&').add(b'=').add(b'+');

#[derive(Debug, Clone, Serialize)]
struct AlertContext {
    id: String,
    #[serde(rename = "type")]
    alert_type: String,
    level: String,
    #[serde(rename = "resourceId")]
    resource_id: String,
    #[serde(rename = "resourceName")]
    resource_name: String,
    node: String,
    instance: String,
    message: String,
    value: f64,
    threshold: f64,
    #[serde(rename = "valueFormatted")]
    value_formatted: String,
    #[serde(rename = "thresholdFormatted")]
    threshold_formatted: String,
    #[serde(rename = "startTime")]
    start_time: String,
    duration: String,
    acknowledged: bool,
    metadata: HashMap<String, String>,
}

impl AlertContext {
    fn from_alert(alert: &Alert, now: chrono::DateTime<Utc>) -> Self {
        Self {
            id: alert.id.clone(),
            alert_type: alert.alert_type.clone(),
            level: format!("{:?}", alert.level).to_lowercase(),
            resource_id: alert.resource_id.clone(),
            resource_name: alert.resource_name.clone(),
            node: alert.node.clone(),
            instance: alert.instance.clone(),
            message: alert.message.clone(),
            value: alert.value,
            threshold: alert.threshold,
            value_formatted: format!("{:.2}", alert.value),
            threshold_formatted: format!("{:.2}", alert.threshold),
            start_time: alert.start_time.to_rfc3339(),
            duration: humanize_duration(alert.duration_since_start(now)),
            acknowledged: alert.acknowledged,
            metadata: alert.metadata.clone(),
        }
    }
}

fn humanize_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[derive(Debug, Clone, Serialize)]
struct RenderContext {
    alerts: Vec<AlertContext>,
    count: usize,
    timestamp: String,
    source: &'static str,
    grouped: bool,
    #[serde(rename = "customFields")]
    custom_fields: HashMap<String, String>,
}

fn build_context(alerts: &[Alert], custom_fields: &HashMap<String, String>) -> RenderContext {
    let now = Utc::now();
    RenderContext {
        alerts: alerts.iter().map(|a| AlertContext::from_alert(a, now)).collect(),
        count: alerts.len(),
        timestamp: now.to_rfc3339(),
        source: "pulse-monitoring",
        grouped: alerts.len() > 1,
        custom_fields: custom_fields.clone(),
    }
}

fn handlebars() -> Handlebars<'static> {
    let mut hb = Handlebars::new();
    hb.set_strict_mode(false);

    handlebars_helper!(upper: |s: String| s.to_uppercase());
    handlebars_helper!(lower: |s: String| s.to_lowercase());
    handlebars_helper!(title: |s: String| title_case(&s));
    handlebars_helper!(urlpath: |s: String| utf8_percent_encode(&s, FRAGMENT).to_string());
    handlebars_helper!(urlquery: |s: String| utf8_percent_encode(&s, QUERY).to_string());

    hb.register_helper("upper", Box::new(upper));
    hb.register_helper("lower", Box::new(lower));
    hb.register_helper("title", Box::new(title));
    hb.register_helper("urlpath", Box::new(urlpath));
    hb.register_helper("urlquery", Box::new(urlquery));
    hb.register_helper("sprintf", Box::new(sprintf_helper));
    hb
}

/// `{{sprintf "%.1f" value}}` — printf-style formatting for the one case
/// templates actually need: fixed-precision floats. Falls back to the plain
/// string form of the argument for any format spec it doesn't recognise.
fn sprintf_helper(
    h: &Helper,
    _: &Handlebars,
    _: &HbContext,
    _: &mut HbRenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let fmt = h.param(0).and_then(|p| p.value().as_str()).unwrap_or("%s");
    let arg = h.param(1).map(|p| p.value().clone()).unwrap_or(Value::Null);
    out.write(&apply_sprintf(fmt, &arg))?;
    Ok(())
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn apply_sprintf(fmt: &str, arg: &Value) -> String {
    match arg {
        Value::Number(n) if fmt.ends_with('f') => {
            let precision: usize = fmt
                .trim_start_matches('%')
                .trim_end_matches('f')
                .trim_start_matches('.')
                .parse()
                .unwrap_or(2);
            format!("{:.*}", precision, n.as_f64().unwrap_or(0.0))
        }
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn builtin_template(service: WebhookService) -> Option<&'static str> {
    match service {
        WebhookService::Generic => None,
        WebhookService::Discord => Some(
            r#"{"content":"**{{count}} alert(s)** from pulse-monitoring","embeds":[{{#each alerts}}{"title":"{{this.resourceName}}","description":"{{this.message}}","color":15158332}{{#unless @last}},{{/unless}}{{/each}}]}"#,
        ),
        WebhookService::Slack => Some(
            r#"{"text":"*{{count}} alert(s)*","blocks":[{{#each alerts}}{"type":"section","text":{"type":"mrkdwn","text":"*{{this.resourceName}}*: {{this.message}}"}}{{#unless @last}},{{/unless}}{{/each}}]}"#,
        ),
        WebhookService::Teams => Some(
            r#"{"@type":"MessageCard","summary":"Pulse alerts","text":"{{count}} alert(s): {{#each alerts}}{{this.message}}{{#unless @last}}; {{/unless}}{{/each}}"}"#,
        ),
        WebhookService::Telegram => Some(
            r#"{"chat_id":"{{customFields.chat_id}}","text":"{{count}} alert(s)\n{{#each alerts}}{{this.resourceName}}: {{this.message}}\n{{/each}}","parse_mode":"HTML"}"#,
        ),
        WebhookService::Pagerduty => Some(
            r#"{"routing_key":"{{customFields.routingKey}}","event_action":"trigger","payload":{"summary":"{{count}} alert(s)","severity":"{{#each alerts}}{{this.level}}{{/each}}","source":"pulse-monitoring"}}"#,
        ),
        WebhookService::Gotify => Some(
            r#"{"title":"Pulse: {{count}} alert(s)","message":"{{#each alerts}}{{this.message}}\n{{/each}}","priority":5}"#,
        ),
        WebhookService::Pushover => Some(
            r#"{"token":"{{customFields.token}}","user":"{{customFields.user}}","title":"Pulse: {{count}} alert(s)","message":"{{#each alerts}}{{this.message}}\n{{/each}}"}"#,
        ),
        WebhookService::Ntfy => None,
    }
}

/// Renders the outgoing body for `service`. `custom_template`, if present, wins
/// over the built-in template. `ntfy` skips JSON validation and may be plain
/// text. Every other service must produce parseable JSON or the send aborts.
pub fn render_body(
    service: WebhookService,
    custom_template: Option<&str>,
    alerts: &[Alert],
    custom_fields: &HashMap<String, String>,
) -> Result<String, RenderError> {
    let context = build_context(alerts, custom_fields);

    let body = if let Some(template) = custom_template {
        handlebars().render_template(template, &context)?
    } else if let Some(template) = builtin_template(service) {
        handlebars().render_template(template, &context)?
    } else if service == WebhookService::Ntfy {
        let mut text = format!("{} alert(s) from pulse-monitoring\n", context.count);
        for a in &context.alerts {
            text.push_str(&format!("{}: {}\n", a.resource_name, a.message));
        }
        text
    } else {
        serde_json::to_string(&context).expect("RenderContext always serializes")
    };

    if service != WebhookService::Ntfy {
        serde_json::from_str::<Value>(&body).map_err(RenderError::NotJson)?;
    }

    Ok(body)
}

/// Renders a webhook URL template. An empty render, or a result without both
/// scheme and host, is a `Validation`-class error (never retried).
pub fn render_url(
    url_template: &str,
    alerts: &[Alert],
    custom_fields: &HashMap<String, String>,
) -> Result<Url, RenderError> {
    let context = build_context(alerts, custom_fields);
    let rendered = handlebars().render_template(url_template, &context)?;
    if rendered.trim().is_empty() {
        return Err(RenderError::EmptyUrl);
    }
    let url = Url::parse(&rendered).map_err(|e| RenderError::InvalidUrl(e.to_string()))?;
    if url.host_str().is_none() {
        return Err(RenderError::MissingHost);
    }
    Ok(url)
}

/// Telegram-specific fixup: strips `chat_id` from the query string (it
/// belongs in the JSON payload, not the URL) and returns it. The id must be
/// numeric with an optional leading minus.
pub fn extract_telegram_chat_id(url: &mut Url) -> Result<String, RenderError> {
    let chat_id = url
        .query_pairs()
        .find(|(k, _)| k == "chat_id")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default();

    let numeric = {
        let mut s = chat_id.as_str();
        if let Some(rest) = s.strip_prefix('-') {
            s = rest;
        }
        !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
    };
    if !numeric {
        return Err(RenderError::NonNumericChatId(chat_id));
    }

    let remaining: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "chat_id")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if remaining.is_empty() {
        url.set_query(None);
    } else {
        let qs = remaining
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&qs));
    }

    Ok(chat_id)
}

/// Builds the generic JSON object used when no custom and no built-in
/// template applies: `{alerts, count, timestamp, source, grouped}`.
pub fn generic_payload(alerts: &[Alert]) -> Value {
    let context = build_context(alerts, &HashMap::new());
    json!({
        "alerts": context.alerts,
        "count": context.count,
        "timestamp": context.timestamp,
        "source": context.source,
        "grouped": context.grouped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertLevel;
    use chrono::Utc;

    fn sample_alert(id: &str) -> Alert {
        Alert {
            id: id.to_string(),
            alert_type: "cpu".to_string(),
            level: AlertLevel::Critical,
            resource_id: "100".to_string(),
            resource_name: "vm100".to_string(),
            node: "node-a".to_string(),
            instance: "dc1".to_string(),
            message: "CPU usage high".to_string(),
            value: 95.5,
            threshold: 90.0,
            start_time: Utc::now(),
            metadata: HashMap::new(),
            acknowledged: false,
        }
    }

    #[test]
    fn generic_service_with_no_custom_template_produces_spec_shaped_json() {
        let alerts = vec![sample_alert("a1")];
        let body = render_body(WebhookService::Generic, None, &alerts, &HashMap::new()).unwrap();
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["source"], "pulse-monitoring");
        assert_eq!(parsed["count"], 1);
        assert!(parsed["alerts"].is_array());
    }

    #[test]
    fn non_ntfy_service_with_non_json_template_aborts() {
        let alerts = vec![sample_alert("a1")];
        let err = render_body(
            WebhookService::Generic,
            Some("not json at all {{count}}"),
            &alerts,
            &HashMap::new(),
        );
        assert!(matches!(err, Err(RenderError::NotJson(_))));
    }

    #[test]
    fn ntfy_skips_json_validation() {
        let alerts = vec![sample_alert("a1")];
        let body = render_body(
            WebhookService::Ntfy,
            Some("{{count}} alert(s): {{#each alerts}}{{this.message}}{{/each}}"),
            &alerts,
            &HashMap::new(),
        )
        .unwrap();
        assert!(body.contains("1 alert(s)"));
    }

    #[test]
    fn url_template_without_substitutions_is_identity() {
        let alerts = vec![sample_alert("a1")];
        let url = render_url("https://hooks.example.com/fixed", &alerts, &HashMap::new()).unwrap();
        assert_eq!(url.as_str(), "https://hooks.example.com/fixed");
    }

    #[test]
    fn empty_url_template_render_is_an_error() {
        let alerts = vec![sample_alert("a1")];
        let err = render_url("", &alerts, &HashMap::new());
        assert!(matches!(err, Err(RenderError::EmptyUrl)));
    }

    #[test]
    fn telegram_chat_id_is_extracted_and_stripped() {
        let alerts = vec![sample_alert("a1")];
        let mut fields = HashMap::new();
        fields.insert("token".to_string(), "12345:abc".to_string());
        let mut url = render_url(
            "https://api.telegram.org/bot{{customFields.token}}/sendMessage?chat_id=-100123",
            &alerts,
            &fields,
        )
        .unwrap();
        let chat_id = extract_telegram_chat_id(&mut url).unwrap();
        assert_eq!(chat_id, "-100123");
        assert!(!url.as_str().contains("chat_id"));
    }

    #[test]
    fn non_numeric_telegram_chat_id_is_rejected() {
        let mut url = Url::parse("https://api.telegram.org/bot123/sendMessage?chat_id=abc").unwrap();
        assert!(matches!(
            extract_telegram_chat_id(&mut url),
            Err(RenderError::NonNumericChatId(_))
        ));
    }

    #[test]
    fn sprintf_helper_formats_floats() {
        let alerts = vec![sample_alert("a1")];
        let body = render_body(
            WebhookService::Generic,
            Some(r#"{"v":"{{sprintf "%.1f" 95.55}}"}"#),
            &alerts,
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(body, r#"{"v":"95.6"}"#);
    }
}
