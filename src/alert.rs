//! Alert data model and the external interface the (out-of-scope) alert
//! evaluation engine talks to the notification manager through.
//!
//! Everything that decides *when* an alert becomes active or resolves lives
//! outside this crate; `AlertSink` is the seam it drives.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Stable across evaluations of the same underlying condition.
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub level: AlertLevel,
    pub resource_id: String,
    pub resource_name: String,
    pub node: String,
    pub instance: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    /// Only changes on an inactive-to-active transition, not on every re-evaluation.
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub acknowledged: bool,
}

impl Alert {
    pub fn duration_since_start(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.start_time
    }
}

/// The capability contract the alert evaluation engine (out of scope) drives.
/// Implemented by the notification manager.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn on_alert_active(&self, alert: Alert);
    async fn on_alert_resolved(&self, alert_id: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alert(id: &str, start: DateTime<Utc>) -> Alert {
        Alert {
            id: id.to_string(),
            alert_type: "cpu".to_string(),
            level: AlertLevel::Warning,
            resource_id: "100".to_string(),
            resource_name: "vm100".to_string(),
            node: "node-a".to_string(),
            instance: "dc1".to_string(),
            message: "CPU usage high".to_string(),
            value: 95.0,
            threshold: 90.0,
            start_time: start,
            metadata: HashMap::new(),
            acknowledged: false,
        }
    }

    #[test]
    fn duration_since_start_reflects_elapsed_time() {
        let start = Utc::now() - chrono::Duration::minutes(5);
        let alert = sample_alert("cpu-vm100", start);
        let elapsed = alert.duration_since_start(Utc::now());
        assert!(elapsed.num_seconds() >= 299);
    }
}
