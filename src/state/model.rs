//! Snapshot data model — the shapes the state store aggregates per cluster
//! instance and exposes through `Snapshot`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub instance: String,
    pub name: String,
    pub status: String,
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestInfo {
    pub instance: String,
    pub vmid: u64,
    pub name: String,
    pub node: String,
    pub guest_type: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub instance: String,
    pub name: String,
    pub node: String,
    pub used_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalDisk {
    pub instance: String,
    pub node: String,
    pub device_path: String,
    pub health: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerHost {
    pub hostname: String,
    pub containers_running: u32,
    pub containers_total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericHost {
    pub hostname: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupTask {
    pub instance: String,
    /// Numeric guest id this backup belongs to, if it names one.
    pub guest_id: Option<u64>,
    pub node: String,
    pub time: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub instance: String,
    pub guest_id: u64,
    pub node: String,
    pub name: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationJob {
    pub instance: String,
    pub guest_id: u64,
    pub job_number: u32,
    pub job_id: String,
    pub id: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub nodes: Vec<NodeInfo>,
    pub guests: Vec<GuestInfo>,
    pub docker_hosts: Vec<DockerHost>,
    pub generic_hosts: Vec<GenericHost>,
    pub storage: Vec<StorageEntry>,
    pub physical_disks: Vec<PhysicalDisk>,
    pub backup_tasks: Vec<BackupTask>,
    pub snapshots: Vec<SnapshotInfo>,
    pub replication_jobs: Vec<ReplicationJob>,
    pub connection_health: HashMap<String, bool>,
    pub last_update: u64,
}
