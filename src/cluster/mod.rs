//! Multi-endpoint failover client (C1-C4): per-endpoint `PulseClient`, the
//! health registry driving endpoint selection, the cluster client that
//! retries/fails over across a `ClusterSource`, and the error classifier the
//! other two consult.

pub mod backoff;
pub mod classify;
pub mod client;
pub mod endpoint;
pub mod health;

pub use classify::{classify, ClassifiedError, NodeSpecificReason};
pub use client::{ClusterClient, HttpPulseClient, PulseClient, RawError};
pub use endpoint::{ClusterSource, Endpoint};
pub use health::{HealthRegistry, SelectResult};
