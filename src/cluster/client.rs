//! Per-endpoint Client (C1) and Cluster Client (C3).
//!
//! `PulseClient` is the opaque capability contract a single endpoint exposes;
//! `ClusterClient` drives failover across a `ClusterSource`'s endpoints using the
//! `HealthRegistry` and the `classify` decision table.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::cluster::backoff::{rate_limit_delay, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_JITTER_MS};
use crate::cluster::classify::{classify, ClassifiedError};
use crate::cluster::endpoint::ClusterSource;
use crate::cluster::health::{HealthRegistry, SelectResult};
use crate::metrics::metrics;
use crate::state::model::{
    BackupTask, DockerHost, GenericHost, GuestInfo, NodeInfo, ReplicationJob, SnapshotInfo,
    StorageEntry,
};

/// Extra retries budgeted on top of `endpoints.len()` to absorb rate-limit waits
/// without immediately declaring the cluster exhausted.
pub const RATE_LIMIT_RETRY_BUDGET: u32 = 2;

/// A failure surfaced by an endpoint before classification — status code (if the
/// transport got as far as an HTTP response) plus a message.
#[derive(Debug, Clone)]
pub struct RawError {
    pub status: Option<u16>,
    pub message: String,
}

impl RawError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Opaque per-endpoint capability contract. Implementations must honour the
/// deadline passed to each call, treat TLS/connect failures as transient (not
/// fatal), attach the endpoint's auth token to every request, and hold no
/// cross-endpoint state.
#[async_trait]
pub trait PulseClient: Send + Sync {
    async fn list_nodes(&self, deadline: Duration) -> Result<Vec<NodeInfo>, RawError>;
    async fn list_guests(&self, deadline: Duration) -> Result<Vec<GuestInfo>, RawError>;
    async fn list_docker_hosts(&self, deadline: Duration) -> Result<Vec<DockerHost>, RawError>;
    async fn list_generic_hosts(&self, deadline: Duration) -> Result<Vec<GenericHost>, RawError>;
    async fn get_storage(&self, deadline: Duration) -> Result<Vec<StorageEntry>, RawError>;
    async fn get_snapshots(&self, deadline: Duration) -> Result<Vec<SnapshotInfo>, RawError>;
    async fn get_backup_tasks(&self, deadline: Duration) -> Result<Vec<BackupTask>, RawError>;
    async fn get_replication_jobs(&self, deadline: Duration) -> Result<Vec<ReplicationJob>, RawError>;
    /// Cheap reachability probe used for initial/recovery health checks.
    async fn ping(&self, deadline: Duration) -> Result<(), RawError>;
}

/// `reqwest`-backed implementation. One instance per endpoint, pooling its own
/// connections; carries no state shared with sibling endpoints.
pub struct HttpPulseClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl HttpPulseClient {
    pub fn new(base_url: &str, token: &str, insecure_tls: bool) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        deadline: Duration,
    ) -> Result<T, RawError> {
        let url = format!("{}{}", self.base_url, path);
        let request = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .timeout(deadline);

        let response = request
            .send()
            .await
            .map_err(|e| RawError::new(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RawError::new(Some(status.as_u16()), body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RawError::new(None, format!("unexpected response format: {e}")))
    }
}

#[async_trait]
impl PulseClient for HttpPulseClient {
    async fn list_nodes(&self, deadline: Duration) -> Result<Vec<NodeInfo>, RawError> {
        self.get_json("/api/v1/nodes", deadline).await
    }
    async fn list_guests(&self, deadline: Duration) -> Result<Vec<GuestInfo>, RawError> {
        self.get_json("/api/v1/guests", deadline).await
    }
    async fn list_docker_hosts(&self, deadline: Duration) -> Result<Vec<DockerHost>, RawError> {
        self.get_json("/api/v1/docker-hosts", deadline).await
    }
    async fn list_generic_hosts(&self, deadline: Duration) -> Result<Vec<GenericHost>, RawError> {
        self.get_json("/api/v1/generic-hosts", deadline).await
    }
    async fn get_storage(&self, deadline: Duration) -> Result<Vec<StorageEntry>, RawError> {
        self.get_json("/api/v1/storage", deadline).await
    }
    async fn get_snapshots(&self, deadline: Duration) -> Result<Vec<SnapshotInfo>, RawError> {
        self.get_json("/api/v1/snapshots", deadline).await
    }
    async fn get_backup_tasks(&self, deadline: Duration) -> Result<Vec<BackupTask>, RawError> {
        self.get_json("/api/v1/backups", deadline).await
    }
    async fn get_replication_jobs(&self, deadline: Duration) -> Result<Vec<ReplicationJob>, RawError> {
        self.get_json("/api/v1/replication", deadline).await
    }
    async fn ping(&self, deadline: Duration) -> Result<(), RawError> {
        self.get_json::<serde_json::Value>("/api/v1/ping", deadline)
            .await
            .map(|_| ())
    }
}

/// Drives failover for one `ClusterSource`.
pub struct ClusterClient {
    source: ClusterSource,
    health: HealthRegistry,
    clients: Vec<Arc<dyn PulseClient>>,
    probe_timeout: Duration,
    recovery_staleness: Duration,
    initial_check_done: AtomicBool,
}

impl ClusterClient {
    pub fn new(source: ClusterSource, clients: Vec<Arc<dyn PulseClient>>) -> Self {
        assert_eq!(source.endpoints.len(), clients.len());
        let health = HealthRegistry::new(source.endpoints.len());
        Self {
            source,
            health,
            clients,
            probe_timeout: Duration::from_secs(5),
            recovery_staleness: Duration::from_secs(10),
            initial_check_done: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.source.name
    }

    /// Pushes the current health registry counts into the process-wide gauges.
    /// Cheap (one read-lock pass) so it's fine to call after every health
    /// mutation rather than on a separate scrape-time schedule.
    fn sync_health_gauges(&self) {
        let (healthy, cooling, unhealthy) = self.health.counts();
        metrics().endpoints_healthy.set(healthy);
        metrics().endpoints_cooling.set(cooling);
        metrics().endpoints_unhealthy.set(unhealthy);
    }

    /// One-time initial health check. Single-endpoint sources are assumed
    /// healthy without probing (there's nothing to fail over to anyway).
    #[instrument(skip(self), fields(cluster = %self.source.name))]
    pub async fn initial_health_check(&self) {
        if self.initial_check_done.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.clients.len() <= 1 {
            return;
        }
        let probes = self.clients.iter().enumerate().map(|(idx, client)| {
            let client = client.clone();
            let timeout = self.probe_timeout;
            async move { (idx, client.ping(timeout).await) }
        });
        for (idx, result) in join_all(probes).await {
            match result {
                Ok(()) => self.health.mark_healthy(idx),
                Err(raw) => {
                    let classified = classify(&format!("endpoint-{idx}"), raw.status, &raw.message);
                    if classified.marks_unhealthy() {
                        self.health.mark_unhealthy(idx);
                    } else {
                        self.health.mark_healthy(idx);
                    }
                }
            }
        }
        self.sync_health_gauges();
    }

    /// Runs when `select()` can't find a usable endpoint: probes any endpoint
    /// whose last check is older than `recovery_staleness`. A success, or a
    /// failure that classifies as `NodeSpecific`, restores that endpoint to
    /// healthy (the node is reachable, just unhappy about this particular call).
    async fn recover(&self) {
        let stale = self.health.stale_indices(self.recovery_staleness);
        if stale.is_empty() {
            return;
        }
        let probes = stale.into_iter().map(|idx| {
            let client = self.clients[idx].clone();
            let timeout = self.probe_timeout;
            async move { (idx, client.ping(timeout).await) }
        });
        for (idx, result) in join_all(probes).await {
            self.health.record_checked(idx);
            match result {
                Ok(()) => {
                    debug!(endpoint = idx, "recovery probe succeeded");
                    self.health.mark_healthy(idx);
                }
                Err(raw) => {
                    let classified =
                        classify(&format!("endpoint-{idx}"), raw.status, &raw.message);
                    if matches!(classified, ClassifiedError::NodeSpecific { .. }) {
                        self.health.mark_healthy(idx);
                    }
                }
            }
        }
        self.sync_health_gauges();
    }

    async fn attempt<T, F, Fut>(&self, deadline: Duration, op: &F) -> Result<T, ClassifiedError>
    where
        F: Fn(Arc<dyn PulseClient>, Duration) -> Fut,
        Fut: std::future::Future<Output = Result<T, RawError>>,
    {
        let mut attempt_no = 0u32;
        let budget = self.source.len() as u32 + RATE_LIMIT_RETRY_BUDGET;
        let mut last_err: Option<ClassifiedError> = None;

        loop {
            if attempt_no >= budget {
                let last = last_err
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no endpoints available".to_string());
                metrics().cluster_exhausted_total.inc();
                return Err(ClassifiedError::Exhausted {
                    attempts: attempt_no,
                    last,
                });
            }

            let selection = self.health.select();
            let idx = match selection {
                SelectResult::Healthy(idx) | SelectResult::Cooling(idx) => idx,
                SelectResult::Exhausted => {
                    self.recover().await;
                    match self.health.select() {
                        SelectResult::Healthy(idx) | SelectResult::Cooling(idx) => idx,
                        SelectResult::Exhausted => {
                            let last = last_err
                                .map(|e| e.to_string())
                                .unwrap_or_else(|| "no healthy endpoints".to_string());
                            metrics().cluster_exhausted_total.inc();
                            return Err(ClassifiedError::Exhausted {
                                attempts: attempt_no,
                                last,
                            });
                        }
                    }
                }
            };

            let client = self.clients[idx].clone();
            let endpoint_name = format!("endpoint-{idx}");
            match op(client, deadline).await {
                Ok(value) => return Ok(value),
                Err(raw) => {
                    let classified = classify(&endpoint_name, raw.status, &raw.message);
                    attempt_no += 1;

                    match &classified {
                        ClassifiedError::Auth { .. }
                        | ClassifiedError::NotImplemented { .. }
                        | ClassifiedError::NodeSpecific { .. } => {
                            return Err(classified);
                        }
                        ClassifiedError::RateLimited { .. } => {
                            let delay = rate_limit_delay(
                                attempt_no,
                                DEFAULT_BASE_DELAY_MS,
                                DEFAULT_MAX_JITTER_MS,
                            );
                            self.health.apply_cooldown(idx, delay);
                            self.sync_health_gauges();
                            metrics().cluster_retries_total.inc();
                            warn!(endpoint = idx, ?delay, "endpoint rate limited, cooling down");
                            tokio::time::sleep(delay).await;
                        }
                        ClassifiedError::Transient { .. } => {
                            self.health.mark_unhealthy(idx);
                            self.sync_health_gauges();
                            metrics().cluster_retries_total.inc();
                        }
                        ClassifiedError::Validation(_) | ClassifiedError::Exhausted { .. } => {
                            return Err(classified);
                        }
                    }
                    last_err = Some(classified);
                }
            }
        }
    }

    /// Runs a non-list operation; an exhausted retry budget surfaces as an error.
    async fn execute<T, F, Fut>(&self, deadline: Duration, op: F) -> Result<T, ClassifiedError>
    where
        F: Fn(Arc<dyn PulseClient>, Duration) -> Fut,
        Fut: std::future::Future<Output = Result<T, RawError>>,
    {
        self.attempt(deadline, &op).await
    }

    /// Runs a list-returning operation. Per spec §4.3 / §4.9, exhaustion of all
    /// endpoints on this path returns an empty list with no error — the caller
    /// distinguishes "unknown" from "known empty" via the connection-health map,
    /// not via an error value.
    async fn execute_list<T, F, Fut>(&self, deadline: Duration, op: F) -> Result<Vec<T>, ClassifiedError>
    where
        F: Fn(Arc<dyn PulseClient>, Duration) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<T>, RawError>>,
    {
        match self.attempt(deadline, &op).await {
            Ok(value) => Ok(value),
            Err(ClassifiedError::Exhausted { .. }) => Ok(Vec::new()),
            Err(other) => Err(other),
        }
    }

    pub async fn list_nodes(&self, deadline: Duration) -> Result<Vec<NodeInfo>, ClassifiedError> {
        self.execute_list(deadline, |c, d| async move { c.list_nodes(d).await })
            .await
    }

    pub async fn list_guests(&self, deadline: Duration) -> Result<Vec<GuestInfo>, ClassifiedError> {
        self.execute_list(deadline, |c, d| async move { c.list_guests(d).await })
            .await
    }

    pub async fn list_docker_hosts(&self, deadline: Duration) -> Result<Vec<DockerHost>, ClassifiedError> {
        self.execute_list(deadline, |c, d| async move { c.list_docker_hosts(d).await })
            .await
    }

    pub async fn list_generic_hosts(&self, deadline: Duration) -> Result<Vec<GenericHost>, ClassifiedError> {
        self.execute_list(deadline, |c, d| async move { c.list_generic_hosts(d).await })
            .await
    }

    pub async fn get_storage(&self, deadline: Duration) -> Result<Vec<StorageEntry>, ClassifiedError> {
        self.execute_list(deadline, |c, d| async move { c.get_storage(d).await })
            .await
    }

    pub async fn get_snapshots(&self, deadline: Duration) -> Result<Vec<SnapshotInfo>, ClassifiedError> {
        self.execute_list(deadline, |c, d| async move { c.get_snapshots(d).await })
            .await
    }

    pub async fn get_backup_tasks(&self, deadline: Duration) -> Result<Vec<BackupTask>, ClassifiedError> {
        self.execute_list(deadline, |c, d| async move { c.get_backup_tasks(d).await })
            .await
    }

    pub async fn get_replication_jobs(&self, deadline: Duration) -> Result<Vec<ReplicationJob>, ClassifiedError> {
        self.execute_list(deadline, |c, d| async move { c.get_replication_jobs(d).await })
            .await
    }

    /// Scalar probe used outside the failover path, e.g. by a health endpoint.
    pub async fn ping(&self, deadline: Duration) -> Result<(), ClassifiedError> {
        self.execute(deadline, |c, d| async move { c.ping(d).await })
            .await
    }

    pub fn health_snapshot(&self) -> HashMap<String, bool> {
        let healthy = self.health.snapshot_health();
        self.source
            .endpoints
            .iter()
            .zip(healthy)
            .map(|(ep, h)| (ep.url.clone(), h))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::endpoint::{ClusterSource, Endpoint};
    use std::sync::atomic::AtomicU32;

    struct ScriptedClient {
        calls: AtomicU32,
        script: Vec<Result<(), RawError>>,
    }

    #[async_trait]
    impl PulseClient for ScriptedClient {
        async fn list_nodes(&self, _: Duration) -> Result<Vec<NodeInfo>, RawError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.script.get(n).cloned().unwrap_or(Ok(())) {
                Ok(()) => Ok(Vec::new()),
                Err(e) => Err(e),
            }
        }
        async fn list_guests(&self, _: Duration) -> Result<Vec<GuestInfo>, RawError> {
            Ok(Vec::new())
        }
        async fn list_docker_hosts(&self, _: Duration) -> Result<Vec<DockerHost>, RawError> {
            Ok(Vec::new())
        }
        async fn list_generic_hosts(&self, _: Duration) -> Result<Vec<GenericHost>, RawError> {
            Ok(Vec::new())
        }
        async fn get_storage(&self, _: Duration) -> Result<Vec<StorageEntry>, RawError> {
            Ok(Vec::new())
        }
        async fn get_snapshots(&self, _: Duration) -> Result<Vec<SnapshotInfo>, RawError> {
            Ok(Vec::new())
        }
        async fn get_backup_tasks(&self, _: Duration) -> Result<Vec<BackupTask>, RawError> {
            Ok(Vec::new())
        }
        async fn get_replication_jobs(&self, _: Duration) -> Result<Vec<ReplicationJob>, RawError> {
            Ok(Vec::new())
        }
        async fn ping(&self, _: Duration) -> Result<(), RawError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.script.get(n).cloned().unwrap_or(Ok(()))
        }
    }

    fn scripted(script: Vec<Result<(), RawError>>) -> Arc<dyn PulseClient> {
        Arc::new(ScriptedClient {
            calls: AtomicU32::new(0),
            script,
        })
    }

    fn source(n: usize) -> ClusterSource {
        let endpoints = (0..n)
            .map(|i| Endpoint::new(format!("https://ep{i}.example"), "tok", false))
            .collect();
        ClusterSource::new("dc1", endpoints)
    }

    #[tokio::test]
    async fn failover_on_transient_error_marks_endpoint_unhealthy() {
        let a = scripted(vec![Err(RawError::new(None, "connection refused"))]);
        let b = scripted(vec![Ok(())]);
        let c = scripted(vec![Ok(())]);
        let client = ClusterClient::new(source(3), vec![a, b, c]);

        let result = client.list_nodes(Duration::from_secs(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn guest_agent_error_surfaces_without_touching_health() {
        let a = scripted(vec![Err(RawError::new(
            Some(500),
            "No QEMU guest agent configured",
        ))]);
        let client = ClusterClient::new(source(1), vec![a]);

        let result = client.ping(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClassifiedError::NodeSpecific { .. })));
        assert_eq!(client.health_snapshot().values().all(|h| *h), true);
    }

    #[tokio::test]
    async fn list_read_on_terminal_exhaustion_yields_empty_list_not_error() {
        let a = scripted(vec![Err(RawError::new(None, "connection refused"))]);
        let client = ClusterClient::new(source(1), vec![a]);

        let result = client.list_nodes(Duration::from_secs(1)).await;
        assert_eq!(result.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn scalar_read_on_terminal_exhaustion_surfaces_error() {
        let a = scripted(vec![Err(RawError::new(None, "connection refused"))]);
        let client = ClusterClient::new(source(1), vec![a]);

        let result = client.ping(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClassifiedError::Exhausted { .. })));
    }

    #[tokio::test]
    async fn auth_error_returns_immediately_without_retry() {
        let a = scripted(vec![Err(RawError::new(Some(401), "unauthorized"))]);
        let client = ClusterClient::new(source(1), vec![a]);

        let result = client.ping(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClassifiedError::Auth { .. })));
    }
}
