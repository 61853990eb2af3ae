//! SQLite-backed stores for Tessio
//!
//! Every store opens a fresh connection per call against the node's
//! single database file.

pub mod activity;
pub mod inventory;
pub mod registry;
pub mod reservations;
pub mod servers;
pub mod snapshots;

pub use activity::{ActivityEntry, ActivityStore};
pub use inventory::{
    DeactivationResult, FingerprintEntry, InventoryItem, InventoryStore, PrepareResult,
    item_fingerprint,
};
pub use registry::NodeRegistry;
pub use reservations::ReservationStore;
pub use servers::{ServerRecord, ServerStatus, ServerStore};
pub use snapshots::{FailoverSnapshot, SnapshotStore};

use crate::error::{Result, TessioError};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Handle to the node's database file. Stores clone this and open a
/// fresh connection per call.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    db_path: PathBuf,
}

impl StoreHandle {
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            db_path: data_dir.join("tessio.db"),
        })
    }

    pub(crate) fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }
}

pub(crate) fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|error| TessioError::Internal(format!("invalid RFC3339 timestamp: {}", error)))?;
    Ok(parsed.with_timezone(&Utc))
}
