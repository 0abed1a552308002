//! Aggregated fleet state (C5): the data model a poll cycle writes into, and
//! the single read-write-locked store it lands in.

pub mod model;
pub mod store;

pub use model::{
    BackupTask, DockerHost, GenericHost, GuestInfo, NodeInfo, PhysicalDisk, ReplicationJob,
    Snapshot, SnapshotInfo, StorageEntry,
};
pub use store::StateStore;
