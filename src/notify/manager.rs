//! Notification Manager (C7).
//!
//! Cooldown gate, grouping timer, `groupBy` partitioning and fan-out dispatch
//! across the email/webhook/apprise channels. The grouping timer's
//! cancellable-background-task shape is grounded on
//! `sniffer/supervisor.rs::Supervisor` (command channel driving a spawned
//! task's lifecycle); the hot-swappable config snapshot uses `arc-swap`, the
//! same crate the donor declares for lock-free shared state. `NotificationManager`
//! itself is a thin `Arc`-backed handle — cheap to clone, same shape as
//! `reqwest::Client` — so the grouping timer can hold its own handle back in
//! without forcing every caller to wrap the manager in an `Arc`.

use arc_swap::ArcSwap;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{instrument, warn};

use crate::alert::{Alert, AlertSink};
use crate::config::{AppriseConfig, EmailConfig, NotificationConfig, RateLimitConfig, SsrfConfig, WebhookDestinationConfig};
use crate::metrics::{metrics, Timer};
use crate::notify::apprise::AppriseTransport;
use crate::notify::email::EmailTransport;
use crate::notify::history::{DeliveryHistory, DeliveryOutcome};
use crate::notify::ratelimit::RateLimiter;
use crate::notify::render;
use crate::notify::webhook::{WebhookError, WebhookTransport};

#[derive(Debug, Clone)]
struct CooldownRecord {
    last_sent_at: chrono::DateTime<Utc>,
    alert_start_time: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct PendingState {
    batch: Vec<Alert>,
    timer_cancel: Option<oneshot::Sender<()>>,
}

struct Inner {
    config: ArcSwap<NotificationConfig>,
    ssrf: SsrfConfig,
    cooldowns: DashMap<String, CooldownRecord>,
    pending: Mutex<PendingState>,
    rate_limiter: RateLimiter,
    history: DeliveryHistory,
    webhook: WebhookTransport,
    email: EmailTransport,
    apprise: AppriseTransport,
}

/// Fan-out engine. Cheap to clone — every clone shares the same cooldown
/// table, pending batch and delivery history.
#[derive(Clone)]
pub struct NotificationManager {
    inner: Arc<Inner>,
}

impl NotificationManager {
    pub fn new(config: NotificationConfig, ssrf: SsrfConfig, rate_limit: RateLimitConfig) -> anyhow::Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                config: ArcSwap::from_pointee(config),
                ssrf,
                cooldowns: DashMap::new(),
                pending: Mutex::new(PendingState::default()),
                rate_limiter: RateLimiter::new(rate_limit.window(), rate_limit.max_per_window),
                history: DeliveryHistory::new(),
                webhook: WebhookTransport::new()?,
                email: EmailTransport,
                apprise: AppriseTransport::new()?,
            }),
        })
    }

    /// Swaps in a new configuration, e.g. after a reload. Takes effect on the
    /// next grouping-timer fire or cooldown check; in-flight dispatches keep
    /// using the snapshot they already took.
    pub fn reload_config(&self, config: NotificationConfig) {
        self.inner.config.store(Arc::new(config));
    }

    pub fn delivery_history(&self) -> Vec<DeliveryOutcome> {
        self.inner.history.recent()
    }

    pub fn rate_limiter_gc(&self) {
        self.inner.rate_limiter.gc();
    }

    /// Cooldown gate + batch accumulation (spec §4.6 step 1-4).
    #[instrument(skip(self, alert), fields(alert_id = %alert.id))]
    pub async fn send_alert(&self, alert: Alert) {
        let cfg = self.inner.config.load_full();
        if !cfg.enabled {
            return;
        }

        if let Some(record) = self.inner.cooldowns.get(&alert.id) {
            let same_incarnation = record.alert_start_time == alert.start_time;
            let elapsed = Utc::now() - record.last_sent_at;
            let cooldown = chrono::Duration::from_std(cfg.cooldown()).unwrap_or(chrono::Duration::zero());
            if same_incarnation && elapsed < cooldown {
                metrics().notifications_suppressed_total.inc();
                return;
            }
        }

        let window = cfg.group_window();
        let should_fire_immediately;
        {
            let mut pending = self.inner.pending.lock();
            pending.batch.push(alert);
            should_fire_immediately = window.is_zero();
            if !should_fire_immediately && pending.timer_cancel.is_none() {
                let (tx, rx) = oneshot::channel();
                pending.timer_cancel = Some(tx);
                let this = self.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(window) => this.fire_batch().await,
                        _ = rx => {}
                    }
                });
            }
        }
        if should_fire_immediately {
            self.fire_batch().await;
        }
    }

    /// Removes any pending entries for `alert_id`; stops the grouping timer
    /// if the batch becomes empty.
    pub fn cancel_alert(&self, alert_id: &str) {
        let mut pending = self.inner.pending.lock();
        pending.batch.retain(|a| a.id != alert_id);
        if pending.batch.is_empty() {
            if let Some(tx) = pending.timer_cancel.take() {
                let _ = tx.send(());
            }
        }
    }

    async fn fire_batch(&self) {
        let batch = {
            let mut pending = self.inner.pending.lock();
            pending.timer_cancel = None;
            std::mem::take(&mut pending.batch)
        };
        if batch.is_empty() {
            return;
        }

        let cfg = self.inner.config.load_full();
        let groups = partition(batch.clone(), &cfg);

        let timer = Timer::start();
        let dispatches = groups.into_iter().map(|group| self.dispatch_group(group, cfg.clone()));
        join_all(dispatches).await;
        timer.observe(&metrics().notification_dispatch_duration);

        let now = Utc::now();
        for alert in &batch {
            self.inner.cooldowns.insert(
                alert.id.clone(),
                CooldownRecord {
                    last_sent_at: now,
                    alert_start_time: alert.start_time,
                },
            );
        }
    }

    async fn dispatch_group(&self, group: Vec<Alert>, cfg: Arc<NotificationConfig>) {
        let webhook_sends = cfg
            .webhooks
            .iter()
            .filter(|w| w.enabled)
            .map(|destination| self.dispatch_webhook(destination, &group));
        join_all(webhook_sends).await;

        if let Some(email) = &cfg.email {
            self.dispatch_email(email, &group).await;
        }
        if let Some(apprise) = &cfg.apprise {
            self.dispatch_apprise(apprise, &group).await;
        }
    }

    async fn dispatch_webhook(&self, destination: &WebhookDestinationConfig, alerts: &[Alert]) {
        let rendered_url = match render::render_url(&destination.url_template, alerts, &destination.custom_fields) {
            Ok(url) => url,
            Err(e) => {
                self.record(destination, alerts, None, false, Some(e.to_string()), 0, 0);
                return;
            }
        };

        if !self.inner.rate_limiter.allow(rendered_url.as_str()) {
            warn!(webhook = %destination.name, url = %rendered_url, "webhook rate limit exceeded, dropping send");
            metrics().webhook_rate_limited_total.inc();
            metrics().notifications_failed_total.inc();
            self.record(
                destination,
                alerts,
                None,
                false,
                Some("rate limit exceeded for this destination".to_string()),
                0,
                0,
            );
            return;
        }

        match self.inner.webhook.send(destination, &self.inner.ssrf, alerts).await {
            Ok((status, size)) => {
                metrics().notifications_sent_total.inc();
                self.record(destination, alerts, Some(status), true, None, 0, size)
            }
            Err(e) => {
                if matches!(e, WebhookError::Ssrf(_)) {
                    metrics().webhook_ssrf_blocked_total.inc();
                }
                metrics().notifications_failed_total.inc();
                self.record(destination, alerts, None, false, Some(e.to_string()), 0, 0)
            }
        }
    }

    fn record(
        &self,
        destination: &WebhookDestinationConfig,
        alerts: &[Alert],
        status_code: Option<u16>,
        success: bool,
        error_message: Option<String>,
        retry_attempts: u32,
        payload_size: usize,
    ) {
        for alert in alerts {
            self.inner.history.record(DeliveryOutcome {
                webhook_name: destination.name.clone(),
                url: destination.url_template.clone(),
                service: format!("{:?}", destination.service).to_lowercase(),
                alert_id: alert.id.clone(),
                timestamp: Utc::now(),
                status_code,
                success,
                error_message: error_message.clone(),
                retry_attempts,
                payload_size,
            });
        }
        metrics().webhook_history_len.set(self.inner.history.recent().len() as i64);
    }

    async fn dispatch_email(&self, config: &EmailConfig, alerts: &[Alert]) {
        match self.inner.email.send(config, alerts).await {
            Ok(()) => metrics().notifications_sent_total.inc(),
            Err(e) => {
                metrics().notifications_failed_total.inc();
                warn!(error = %e, "email delivery failed");
            }
        }
    }

    async fn dispatch_apprise(&self, config: &AppriseConfig, alerts: &[Alert]) {
        match self.inner.apprise.send(config, alerts).await {
            Ok(()) => metrics().notifications_sent_total.inc(),
            Err(e) => {
                metrics().notifications_failed_total.inc();
                warn!(error = %e, "apprise delivery failed");
            }
        }
    }
}

#[async_trait::async_trait]
impl AlertSink for NotificationManager {
    async fn on_alert_active(&self, alert: Alert) {
        self.send_alert(alert).await;
    }

    async fn on_alert_resolved(&self, alert_id: &str) {
        self.cancel_alert(alert_id);
    }
}

/// Splits `batch` into subgroups per the `groupBy {node, guestType}` flags.
/// With neither flag set, the whole batch is one group.
fn partition(batch: Vec<Alert>, cfg: &NotificationConfig) -> Vec<Vec<Alert>> {
    if !cfg.group_by_node && !cfg.group_by_guest_type {
        return vec![batch];
    }

    let mut groups: HashMap<(String, String), Vec<Alert>> = HashMap::new();
    let mut order: Vec<(String, String)> = Vec::new();
    for alert in batch {
        let node_key = if cfg.group_by_node { alert.node.clone() } else { String::new() };
        // Alert carries no guest-type field; alert_type (the metric that tripped,
        // e.g. "cpu"/"disk") is the closest available proxy for grouping.
        let type_key = if cfg.group_by_guest_type {
            alert.alert_type.clone()
        } else {
            String::new()
        };
        let key = (node_key, type_key);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(alert);
    }
    order.into_iter().filter_map(|k| groups.remove(&k)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertLevel;
    use chrono::Duration as ChronoDuration;

    fn alert(id: &str, node: &str, start: chrono::DateTime<Utc>) -> Alert {
        Alert {
            id: id.to_string(),
            alert_type: "cpu".to_string(),
            level: AlertLevel::Warning,
            resource_id: "100".to_string(),
            resource_name: "vm100".to_string(),
            node: node.to_string(),
            instance: "dc1".to_string(),
            message: "CPU usage high".to_string(),
            value: 95.0,
            threshold: 90.0,
            start_time: start,
            metadata: HashMap::new(),
            acknowledged: false,
        }
    }

    fn manager() -> NotificationManager {
        let mut cfg = NotificationConfig::default();
        cfg.group_window_secs = 0;
        NotificationManager::new(cfg, SsrfConfig::default(), RateLimitConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn duplicate_send_within_cooldown_is_suppressed() {
        let mgr = manager();
        let t0 = Utc::now();
        mgr.send_alert(alert("cpu-vm100", "node-a", t0)).await;
        let before = mgr.inner.history.recent().len();
        // Same incarnation, well within the default 5-minute cooldown.
        mgr.send_alert(alert("cpu-vm100", "node-a", t0)).await;
        let after = mgr.inner.history.recent().len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn new_incarnation_bypasses_cooldown() {
        let mgr = manager();
        let t0 = Utc::now();
        mgr.send_alert(alert("cpu-vm100", "node-a", t0)).await;

        let t1 = t0 + ChronoDuration::minutes(10);
        mgr.send_alert(alert("cpu-vm100", "node-a", t1)).await;
        let record = mgr.inner.cooldowns.get("cpu-vm100").unwrap();
        assert_eq!(record.alert_start_time, t1);
    }

    #[test]
    fn partition_by_node_groups_correctly() {
        let mut cfg = NotificationConfig::default();
        cfg.group_by_node = true;
        let batch = vec![
            alert("a1", "node-a", Utc::now()),
            alert("a2", "node-b", Utc::now()),
            alert("a3", "node-a", Utc::now()),
        ];
        let groups = partition(batch, &cfg);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn no_grouping_flags_yields_single_group() {
        let cfg = NotificationConfig::default();
        let batch = vec![alert("a1", "node-a", Utc::now()), alert("a2", "node-b", Utc::now())];
        let groups = partition(batch, &cfg);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn cancel_alert_removes_pending_entry() {
        let mgr = manager();
        {
            let mut pending = mgr.inner.pending.lock();
            pending.batch.push(alert("a1", "node-a", Utc::now()));
        }
        mgr.cancel_alert("a1");
        assert!(mgr.inner.pending.lock().batch.is_empty());
    }

    #[tokio::test]
    async fn grouping_timer_batches_alerts_arriving_within_the_window() {
        let cfg = NotificationConfig {
            group_window_secs: 60,
            ..NotificationConfig::default()
        };
        let mgr = NotificationManager::new(cfg, SsrfConfig::default(), RateLimitConfig::default()).unwrap();
        let t0 = Utc::now();
        mgr.send_alert(alert("a1", "node-a", t0)).await;
        mgr.send_alert(alert("a2", "node-a", t0)).await;
        // Neither has fired yet (no webhooks configured either way, but the
        // pending batch should still hold both until the timer or cancel).
        assert_eq!(mgr.inner.pending.lock().batch.len(), 2);
    }
}
