//! Tessio Core - Core library for the partitioned ticket inventory fleet

pub mod cluster;
pub mod detector;
pub mod error;
pub mod operations;
pub mod replication;
pub mod store;
pub mod tasks;
pub mod transfer;

pub use cluster::*;
pub use detector::{FailureDetector, HeartbeatLoop};
pub use error::{Result, TessioError};
pub use operations::*;
pub use replication::ReplicationEngine;
pub use store::{
    ActivityEntry, ActivityStore, DeactivationResult, FailoverSnapshot, FingerprintEntry,
    InventoryItem, InventoryStore, NodeRegistry, PrepareResult, ReservationStore, ServerRecord,
    ServerStatus, ServerStore, SnapshotStore, StoreHandle, item_fingerprint,
};
pub use tasks::TaskQueue;
pub use transfer::{CHUNK_SIZE, TransferEngine, TransferGroup, TransferPlan};
