//! Endpoint Health Registry (C2).
//!
//! Tracks per-endpoint health state for one `ClusterSource`. `select()` returns a
//! random healthy, non-cooling endpoint; if none exist it falls back to a random
//! cooling endpoint (still usable, just recently rate-limited); if neither exists
//! it returns `Exhausted` so the caller can decide whether to probe or give up.
//! Random selection (rather than strict round robin) is deliberate — it breaks
//! convoy effects where every caller always tries the same endpoint first.

use parking_lot::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct HealthEntry {
    healthy: bool,
    last_checked_at: Option<Instant>,
    cooldown_until: Option<Instant>,
}

impl HealthEntry {
    fn new() -> Self {
        Self {
            healthy: true,
            last_checked_at: None,
            cooldown_until: None,
        }
    }

    fn is_cooling(&self, now: Instant) -> bool {
        matches!(self.cooldown_until, Some(until) if until > now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectResult {
    Healthy(usize),
    Cooling(usize),
    Exhausted,
}

pub struct HealthRegistry {
    entries: RwLock<Vec<HealthEntry>>,
}

impl HealthRegistry {
    pub fn new(endpoint_count: usize) -> Self {
        Self {
            entries: RwLock::new(vec![HealthEntry::new(); endpoint_count]),
        }
    }

    pub fn select(&self) -> SelectResult {
        let now = Instant::now();
        let entries = self.entries.read();

        let healthy_idle: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.healthy && !e.is_cooling(now))
            .map(|(i, _)| i)
            .collect();
        if !healthy_idle.is_empty() {
            let pick = healthy_idle[rand::random::<usize>() % healthy_idle.len()];
            return SelectResult::Healthy(pick);
        }

        let cooling: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.healthy && e.is_cooling(now))
            .map(|(i, _)| i)
            .collect();
        if !cooling.is_empty() {
            let pick = cooling[rand::random::<usize>() % cooling.len()];
            return SelectResult::Cooling(pick);
        }

        SelectResult::Exhausted
    }

    pub fn mark_healthy(&self, index: usize) {
        let mut entries = self.entries.write();
        if let Some(e) = entries.get_mut(index) {
            e.healthy = true;
            e.last_checked_at = Some(Instant::now());
        }
    }

    pub fn mark_unhealthy(&self, index: usize) {
        let mut entries = self.entries.write();
        if let Some(e) = entries.get_mut(index) {
            e.healthy = false;
            e.cooldown_until = None;
            e.last_checked_at = Some(Instant::now());
        }
    }

    /// Applies a cooldown without touching `healthy` — a rate-limited endpoint
    /// stays healthy, it's just temporarily deprioritized.
    pub fn apply_cooldown(&self, index: usize, duration: Duration) {
        let mut entries = self.entries.write();
        if let Some(e) = entries.get_mut(index) {
            e.cooldown_until = Some(Instant::now() + duration);
        }
    }

    pub fn record_checked(&self, index: usize) {
        let mut entries = self.entries.write();
        if let Some(e) = entries.get_mut(index) {
            e.last_checked_at = Some(Instant::now());
        }
    }

    /// Indices whose last check is older than `staleness` (or never checked),
    /// used to drive the recovery probe when `select()` is exhausted.
    pub fn stale_indices(&self, staleness: Duration) -> Vec<usize> {
        let now = Instant::now();
        let entries = self.entries.read();
        entries
            .iter()
            .enumerate()
            .filter(|(_, e)| match e.last_checked_at {
                None => true,
                Some(t) => now.duration_since(t) > staleness,
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Consistent copy of `(endpoint_index, healthy)` for observability.
    pub fn snapshot_health(&self) -> Vec<bool> {
        self.entries.read().iter().map(|e| e.healthy).collect()
    }

    /// `(healthy_idle, cooling, unhealthy)` counts for the metrics gauges.
    pub fn counts(&self) -> (i64, i64, i64) {
        let now = Instant::now();
        let entries = self.entries.read();
        let mut healthy = 0i64;
        let mut cooling = 0i64;
        let mut unhealthy = 0i64;
        for e in entries.iter() {
            if !e.healthy {
                unhealthy += 1;
            } else if e.is_cooling(now) {
                cooling += 1;
            } else {
                healthy += 1;
            }
        }
        (healthy, cooling, unhealthy)
    }
}
