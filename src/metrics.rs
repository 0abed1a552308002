//! Prometheus metrics for the cluster client, state store and notification
//! manager. Follows the donor's `Registry`-owning-struct idiom: one struct holds
//! every metric and registers them all at construction time, with a process-wide
//! accessor backed by `once_cell`.

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::time::Instant;

pub struct Metrics {
    pub registry: Registry,

    pub poll_cycles_total: IntCounter,
    pub poll_errors_total: IntCounter,
    pub cluster_retries_total: IntCounter,
    pub cluster_exhausted_total: IntCounter,
    pub endpoints_healthy: IntGauge,
    pub endpoints_cooling: IntGauge,
    pub endpoints_unhealthy: IntGauge,

    pub notifications_sent_total: IntCounter,
    pub notifications_suppressed_total: IntCounter,
    pub notifications_failed_total: IntCounter,
    pub webhook_rate_limited_total: IntCounter,
    pub webhook_ssrf_blocked_total: IntCounter,
    pub webhook_history_len: IntGauge,

    pub state_snapshot_duration: Histogram,
    pub notification_dispatch_duration: Histogram,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let poll_cycles_total =
            IntCounter::with_opts(Opts::new("pulse_poll_cycles_total", "Completed poll cycles"))?;
        let poll_errors_total = IntCounter::with_opts(Opts::new(
            "pulse_poll_errors_total",
            "Poll cycles that surfaced a non-empty-list error",
        ))?;
        let cluster_retries_total = IntCounter::with_opts(Opts::new(
            "pulse_cluster_retries_total",
            "Retries issued by the cluster client across all sources",
        ))?;
        let cluster_exhausted_total = IntCounter::with_opts(Opts::new(
            "pulse_cluster_exhausted_total",
            "Operations that exhausted the retry budget",
        ))?;
        let endpoints_healthy = IntGauge::with_opts(Opts::new(
            "pulse_endpoints_healthy",
            "Endpoints currently marked healthy",
        ))?;
        let endpoints_cooling = IntGauge::with_opts(Opts::new(
            "pulse_endpoints_cooling",
            "Endpoints currently cooling down from a rate limit",
        ))?;
        let endpoints_unhealthy = IntGauge::with_opts(Opts::new(
            "pulse_endpoints_unhealthy",
            "Endpoints currently marked unhealthy",
        ))?;

        let notifications_sent_total = IntCounter::with_opts(Opts::new(
            "pulse_notifications_sent_total",
            "Notification deliveries that completed successfully",
        ))?;
        let notifications_suppressed_total = IntCounter::with_opts(Opts::new(
            "pulse_notifications_suppressed_total",
            "Alerts dropped by the cooldown gate",
        ))?;
        let notifications_failed_total = IntCounter::with_opts(Opts::new(
            "pulse_notifications_failed_total",
            "Notification deliveries that failed",
        ))?;
        let webhook_rate_limited_total = IntCounter::with_opts(Opts::new(
            "pulse_webhook_rate_limited_total",
            "Webhook deliveries dropped by the per-URL rate limiter",
        ))?;
        let webhook_ssrf_blocked_total = IntCounter::with_opts(Opts::new(
            "pulse_webhook_ssrf_blocked_total",
            "Webhook deliveries blocked by the SSRF validator",
        ))?;
        let webhook_history_len = IntGauge::with_opts(Opts::new(
            "pulse_webhook_history_len",
            "Current length of the webhook delivery history ring",
        ))?;

        let state_snapshot_duration = Histogram::with_opts(HistogramOpts::new(
            "pulse_state_snapshot_duration_seconds",
            "Time to build a state store snapshot",
        ))?;
        let notification_dispatch_duration = Histogram::with_opts(HistogramOpts::new(
            "pulse_notification_dispatch_duration_seconds",
            "Time to dispatch one notification batch",
        ))?;

        registry.register(Box::new(poll_cycles_total.clone()))?;
        registry.register(Box::new(poll_errors_total.clone()))?;
        registry.register(Box::new(cluster_retries_total.clone()))?;
        registry.register(Box::new(cluster_exhausted_total.clone()))?;
        registry.register(Box::new(endpoints_healthy.clone()))?;
        registry.register(Box::new(endpoints_cooling.clone()))?;
        registry.register(Box::new(endpoints_unhealthy.clone()))?;
        registry.register(Box::new(notifications_sent_total.clone()))?;
        registry.register(Box::new(notifications_suppressed_total.clone()))?;
        registry.register(Box::new(notifications_failed_total.clone()))?;
        registry.register(Box::new(webhook_rate_limited_total.clone()))?;
        registry.register(Box::new(webhook_ssrf_blocked_total.clone()))?;
        registry.register(Box::new(webhook_history_len.clone()))?;
        registry.register(Box::new(state_snapshot_duration.clone()))?;
        registry.register(Box::new(notification_dispatch_duration.clone()))?;

        Ok(Self {
            registry,
            poll_cycles_total,
            poll_errors_total,
            cluster_retries_total,
            cluster_exhausted_total,
            endpoints_healthy,
            endpoints_cooling,
            endpoints_unhealthy,
            notifications_sent_total,
            notifications_suppressed_total,
            notifications_failed_total,
            webhook_rate_limited_total,
            webhook_ssrf_blocked_total,
            webhook_history_len,
            state_snapshot_duration,
            notification_dispatch_duration,
        })
    }
}

static METRICS: Lazy<Metrics> =
    Lazy::new(|| Metrics::new().expect("metric registration cannot fail with static names"));

pub fn metrics() -> &'static Metrics {
    &METRICS
}

/// Scoped timer that records into a histogram when dropped or finished explicitly.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn observe(self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }
}
