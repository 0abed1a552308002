//! State Store (C5).
//!
//! Aggregated fleet state behind a single read-write lock, the same
//! lock-guards-mutation / lock-free-reads-never-block idiom the donor's
//! `PositionTracker` uses with `DashMap`, adapted here to per-instance
//! replace-in-place semantics for poll-cycle sections and plain upsert/remove
//! for sections that aren't keyed by instance.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::state::model::{
    BackupTask, DockerHost, GenericHost, GuestInfo, NodeInfo, PhysicalDisk, ReplicationJob,
    Snapshot, SnapshotInfo, StorageEntry,
};

#[derive(Default)]
struct Sections {
    nodes: Vec<NodeInfo>,
    guests: Vec<GuestInfo>,
    docker_hosts: Vec<DockerHost>,
    generic_hosts: Vec<GenericHost>,
    storage: Vec<StorageEntry>,
    physical_disks: Vec<PhysicalDisk>,
    backup_tasks: Vec<BackupTask>,
    snapshots: Vec<SnapshotInfo>,
    replication_jobs: Vec<ReplicationJob>,
    connection_health: std::collections::HashMap<String, bool>,
}

pub struct StateStore {
    sections: RwLock<Sections>,
    last_update: Arc<AtomicU64>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            sections: RwLock::new(Sections::default()),
            last_update: Arc::new(AtomicU64::new(0)),
        }
    }

    fn bump_last_update(&self) {
        // Monotonic wall-clock millis; ties broken by the atomic fetch_add so
        // concurrent mutators never observe the same value twice.
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut prev = self.last_update.load(Ordering::SeqCst);
        loop {
            let next = now_ms.max(prev + 1);
            match self.last_update.compare_exchange_weak(
                prev,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn last_update(&self) -> u64 {
        self.last_update.load(Ordering::SeqCst)
    }

    pub fn replace_nodes_for_instance(&self, instance: &str, items: Vec<NodeInfo>) {
        let mut s = self.sections.write();
        s.nodes.retain(|n| n.instance != instance);
        s.nodes.extend(items);
        s.nodes.sort_by(|a, b| a.name.cmp(&b.name));
        drop(s);
        self.bump_last_update();
    }

    pub fn replace_guests_for_instance(&self, instance: &str, items: Vec<GuestInfo>) {
        let mut s = self.sections.write();
        s.guests.retain(|g| g.instance != instance);
        s.guests.extend(items);
        s.guests.sort_by_key(|g| g.vmid);
        drop(s);
        self.bump_last_update();
    }

    pub fn replace_storage_for_instance(&self, instance: &str, items: Vec<StorageEntry>) {
        let mut s = self.sections.write();
        s.storage.retain(|e| e.instance != instance);
        s.storage.extend(items);
        s.storage
            .sort_by(|a, b| (a.instance.as_str(), a.name.as_str()).cmp(&(b.instance.as_str(), b.name.as_str())));
        self.fix_up_backup_node_attribution(&mut s);
        drop(s);
        self.bump_last_update();
    }

    pub fn replace_physical_disks_for_instance(&self, instance: &str, items: Vec<PhysicalDisk>) {
        let mut s = self.sections.write();
        s.physical_disks.retain(|d| d.instance != instance);
        s.physical_disks.extend(items);
        s.physical_disks
            .sort_by(|a, b| (a.node.as_str(), a.device_path.as_str()).cmp(&(b.node.as_str(), b.device_path.as_str())));
        drop(s);
        self.bump_last_update();
    }

    pub fn replace_backup_tasks_for_instance(&self, instance: &str, items: Vec<BackupTask>) {
        let mut s = self.sections.write();
        s.backup_tasks.retain(|b| b.instance != instance);
        s.backup_tasks.extend(items);
        s.backup_tasks.sort_by(|a, b| b.time.cmp(&a.time));
        self.fix_up_backup_node_attribution(&mut s);
        drop(s);
        self.bump_last_update();
    }

    pub fn replace_snapshots_for_instance(&self, instance: &str, items: Vec<SnapshotInfo>) {
        let mut s = self.sections.write();
        s.snapshots.retain(|sn| sn.instance != instance);
        s.snapshots.extend(items);
        s.snapshots.sort_by(|a, b| b.time.cmp(&a.time));
        drop(s);
        self.bump_last_update();
    }

    pub fn replace_replication_jobs_for_instance(&self, instance: &str, items: Vec<ReplicationJob>) {
        let mut s = self.sections.write();
        s.replication_jobs.retain(|j| j.instance != instance);
        s.replication_jobs.extend(items);
        s.replication_jobs.sort_by(|a, b| {
            (a.instance.as_str(), a.guest_id, a.job_number, a.job_id.as_str(), a.id.as_str()).cmp(&(
                b.instance.as_str(),
                b.guest_id,
                b.job_number,
                b.job_id.as_str(),
                b.id.as_str(),
            ))
        });
        drop(s);
        self.bump_last_update();
    }

    /// Storage/backup content for a guest id that no longer has a known node
    /// keeps whatever node it last reported (see `DESIGN.md` Open Question 2);
    /// this only rewrites entries whose guest is *currently* known under a
    /// different node than the entry itself reports.
    fn fix_up_backup_node_attribution(&self, s: &mut Sections) {
        let guest_node: std::collections::HashMap<u64, String> = s
            .guests
            .iter()
            .map(|g| (g.vmid, g.node.clone()))
            .collect();
        for backup in s.backup_tasks.iter_mut() {
            if let Some(guest_id) = backup.guest_id {
                if let Some(node) = guest_node.get(&guest_id) {
                    backup.node = node.clone();
                }
            }
        }
    }

    pub fn upsert_docker_host(&self, host: DockerHost) {
        let mut s = self.sections.write();
        if let Some(existing) = s.docker_hosts.iter_mut().find(|h| h.hostname == host.hostname) {
            *existing = host;
        } else {
            s.docker_hosts.push(host);
        }
        s.docker_hosts.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        drop(s);
        self.bump_last_update();
    }

    pub fn remove_docker_host(&self, hostname: &str) {
        let mut s = self.sections.write();
        s.docker_hosts.retain(|h| h.hostname != hostname);
        drop(s);
        self.bump_last_update();
    }

    pub fn upsert_generic_host(&self, host: GenericHost) {
        let mut s = self.sections.write();
        if let Some(existing) = s.generic_hosts.iter_mut().find(|h| h.hostname == host.hostname) {
            *existing = host;
        } else {
            s.generic_hosts.push(host);
        }
        s.generic_hosts.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        drop(s);
        self.bump_last_update();
    }

    pub fn remove_generic_host(&self, hostname: &str) {
        let mut s = self.sections.write();
        s.generic_hosts.retain(|h| h.hostname != hostname);
        drop(s);
        self.bump_last_update();
    }

    pub fn set_connection_health(&self, instance: &str, healthy: bool) {
        let mut s = self.sections.write();
        s.connection_health.insert(instance.to_string(), healthy);
        drop(s);
        self.bump_last_update();
    }

    pub fn clear_connection_health(&self, instance: &str) {
        let mut s = self.sections.write();
        s.connection_health.remove(instance);
        drop(s);
        self.bump_last_update();
    }

    /// Deep-enough copy for a consistent point-in-time view. Only the read
    /// lock is held, and only long enough to clone each section.
    pub fn snapshot(&self) -> Snapshot {
        let s = self.sections.read();
        Snapshot {
            nodes: s.nodes.clone(),
            guests: s.guests.clone(),
            docker_hosts: s.docker_hosts.clone(),
            generic_hosts: s.generic_hosts.clone(),
            storage: s.storage.clone(),
            physical_disks: s.physical_disks.clone(),
            backup_tasks: s.backup_tasks.clone(),
            snapshots: s.snapshots.clone(),
            replication_jobs: s.replication_jobs.clone(),
            connection_health: s.connection_health.clone(),
            last_update: self.last_update(),
        }
    }
}
