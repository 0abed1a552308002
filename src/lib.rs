//! Pulse - Fleet Monitoring Aggregator
//!
//! Aggregates fleet state (hypervisor nodes, guests, container hosts,
//! storage, backups, replication jobs) from one or more monitored clusters
//! reached through redundant HTTP endpoints, and fans alerts raised against
//! that state out to configured notification channels (email, webhook,
//! Apprise).
//!
//! No global singletons: an embedder wires one [`cluster::ClusterClient`] per
//! configured source, one [`state::StateStore`], and one
//! [`notify::NotificationManager`], then drives the poll loop itself (see
//! `main.rs` for the reference wiring).

pub mod alert;
pub mod cluster;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod state;

pub use alert::{Alert, AlertLevel, AlertSink};
pub use config::Config;
pub use notify::NotificationManager;
pub use state::StateStore;
