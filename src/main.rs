//! Pulse — fleet monitoring aggregator.
//!
//! Reference process wiring: one [`cluster::ClusterClient`] per configured
//! cluster source, one shared [`state::StateStore`], one
//! [`notify::NotificationManager`]. No global singletons — everything below is
//! constructed here and handed down by value/`Arc`, the same shape the donor's
//! `main.rs` wires its RPC pool, nonce manager and sniffer through.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use pulse::cluster::{ClusterClient, ClusterSource, Endpoint, HttpPulseClient, PulseClient};
use pulse::config::Config;
use pulse::notify::NotificationManager;
use pulse::state::StateStore;
use pulse::{logging, metrics};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "pulse.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init(&config.logging).context("failed to initialize logging")?;

    info!("starting pulse");
    info!(clusters = config.clusters.len(), "loaded configuration");

    let state = Arc::new(StateStore::new());
    let notifications = NotificationManager::new(
        config.notifications.clone(),
        config.ssrf.clone(),
        config.rate_limit.clone(),
    )?;

    let clusters: Vec<Arc<ClusterClient>> = config
        .clusters
        .iter()
        .map(build_cluster_client)
        .collect::<Result<Vec<_>>>()?;

    for cluster in &clusters {
        cluster.initial_health_check().await;
    }

    let mut tasks = Vec::new();
    for (source, cluster) in config.clusters.iter().zip(clusters.into_iter()) {
        let state = state.clone();
        let poll_interval = source.poll_interval();
        let request_timeout = source.request_timeout();
        tasks.push(tokio::spawn(poll_loop(cluster, state, poll_interval, request_timeout)));
    }

    let rate_limiter_gc = notifications.clone();
    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            rate_limiter_gc.rate_limiter_gc();
        }
    }));

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("received shutdown signal, stopping poll loops");
    for task in tasks {
        task.abort();
    }

    Ok(())
}

fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path).with_context(|| format!("failed to load config from '{path}'"))
    } else {
        warn!("config file '{}' not found, using defaults", path);
        Ok(Config::default())
    }
}

fn build_cluster_client(source: &pulse::config::ClusterSourceConfig) -> Result<Arc<ClusterClient>> {
    let endpoints: Vec<Endpoint> = source
        .endpoints
        .iter()
        .map(|e| Endpoint::new(e.url.clone(), e.token.clone(), e.insecure_tls))
        .collect();

    let clients: Vec<Arc<dyn PulseClient>> = source
        .endpoints
        .iter()
        .map(|e| -> Result<Arc<dyn PulseClient>> {
            Ok(Arc::new(HttpPulseClient::new(&e.url, &e.token, e.insecure_tls)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let cluster_source = ClusterSource::new(source.name.clone(), endpoints);
    Ok(Arc::new(ClusterClient::new(cluster_source, clients)))
}

/// One cluster's poll cycle: fetch every section, replace it in the shared
/// store under this cluster's instance name, and record whether the cycle
/// came back healthy.
async fn poll_loop(
    cluster: Arc<ClusterClient>,
    state: Arc<StateStore>,
    poll_interval: Duration,
    request_timeout: Duration,
) {
    let mut interval = tokio::time::interval(poll_interval);
    let instance = cluster.name().to_string();

    loop {
        interval.tick().await;
        let healthy = run_poll_cycle(&cluster, &state, &instance, request_timeout).await;

        let timer = metrics::Timer::start();
        let _ = state.snapshot();
        timer.observe(&metrics::metrics().state_snapshot_duration);

        metrics::metrics().poll_cycles_total.inc();
        if !healthy {
            metrics::metrics().poll_errors_total.inc();
        }
        state.set_connection_health(&instance, healthy);
    }
}

async fn run_poll_cycle(
    cluster: &ClusterClient,
    state: &StateStore,
    instance: &str,
    deadline: Duration,
) -> bool {
    let mut healthy = true;

    match cluster.list_nodes(deadline).await {
        Ok(nodes) => state.replace_nodes_for_instance(instance, nodes),
        Err(e) => {
            error!(instance, error = %e, "failed to poll nodes");
            healthy = false;
        }
    }

    match cluster.list_guests(deadline).await {
        Ok(guests) => state.replace_guests_for_instance(instance, guests),
        Err(e) => {
            error!(instance, error = %e, "failed to poll guests");
            healthy = false;
        }
    }

    match cluster.get_storage(deadline).await {
        Ok(storage) => state.replace_storage_for_instance(instance, storage),
        Err(e) => {
            error!(instance, error = %e, "failed to poll storage");
            healthy = false;
        }
    }

    match cluster.get_backup_tasks(deadline).await {
        Ok(tasks) => state.replace_backup_tasks_for_instance(instance, tasks),
        Err(e) => {
            error!(instance, error = %e, "failed to poll backup tasks");
            healthy = false;
        }
    }

    match cluster.get_snapshots(deadline).await {
        Ok(snapshots) => state.replace_snapshots_for_instance(instance, snapshots),
        Err(e) => {
            error!(instance, error = %e, "failed to poll snapshots");
            healthy = false;
        }
    }

    match cluster.get_replication_jobs(deadline).await {
        Ok(jobs) => state.replace_replication_jobs_for_instance(instance, jobs),
        Err(e) => {
            error!(instance, error = %e, "failed to poll replication jobs");
            healthy = false;
        }
    }

    healthy
}
