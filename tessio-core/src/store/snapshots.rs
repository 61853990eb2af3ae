use crate::error::Result;
use crate::store::inventory::FingerprintEntry;
use crate::store::StoreHandle;
use chrono::Utc;
use rusqlite::params;

/// Sentinel item id marking a grant that covered no items. Real item ids
/// start at 1.
const EMPTY_GRANT_MARKER: i64 = 0;

#[derive(Debug, Clone)]
pub struct FailoverSnapshot {
    pub failed_server_id: i64,
    pub backup_server_id: i64,
    pub entries: Vec<FingerprintEntry>,
}

/// Per-item fingerprints captured from the backup at the moment a
/// failover was granted. Recovery compares against these to decide
/// whether the failed node's data can simply be reactivated.
pub struct SnapshotStore {
    handle: StoreHandle,
}

impl SnapshotStore {
    pub fn new(handle: StoreHandle) -> Result<Self> {
        let store = Self { handle };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS failover_snapshots (
                failed_server_id INTEGER NOT NULL,
                backup_server_id INTEGER NOT NULL,
                item_id INTEGER NOT NULL,
                fingerprint TEXT,
                taken_at TEXT NOT NULL,
                PRIMARY KEY (failed_server_id, item_id)
            )",
            [],
        )?;
        Ok(())
    }

    pub fn save(
        &self,
        failed_server_id: i64,
        backup_server_id: i64,
        entries: &[FingerprintEntry],
    ) -> Result<()> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "DELETE FROM failover_snapshots WHERE failed_server_id = ?1",
            params![failed_server_id],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO failover_snapshots
                    (failed_server_id, backup_server_id, item_id, fingerprint, taken_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            if entries.is_empty() {
                stmt.execute(params![
                    failed_server_id,
                    backup_server_id,
                    EMPTY_GRANT_MARKER,
                    Option::<String>::None,
                    now,
                ])?;
            } else {
                for entry in entries {
                    stmt.execute(params![
                        failed_server_id,
                        backup_server_id,
                        entry.id,
                        entry.fingerprint,
                        now,
                    ])?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn load(&self, failed_server_id: i64) -> Result<Option<FailoverSnapshot>> {
        let conn = self.handle.conn()?;
        let mut stmt = conn.prepare(
            "SELECT backup_server_id, item_id, fingerprint FROM failover_snapshots
             WHERE failed_server_id = ?1 ORDER BY item_id ASC",
        )?;
        let mut rows = stmt.query(params![failed_server_id])?;

        let mut snapshot: Option<FailoverSnapshot> = None;
        while let Some(row) = rows.next()? {
            let backup_server_id: i64 = row.get(0)?;
            let item_id: i64 = row.get(1)?;

            let entry = snapshot.get_or_insert(FailoverSnapshot {
                failed_server_id,
                backup_server_id,
                entries: Vec::new(),
            });

            if item_id != EMPTY_GRANT_MARKER {
                entry.entries.push(FingerprintEntry {
                    id: item_id,
                    fingerprint: row.get(2)?,
                });
            }
        }

        Ok(snapshot)
    }

    /// The failed server this node currently stands in for, if any.
    pub fn backup_duty(&self, server_id: i64) -> Result<Option<i64>> {
        let conn = self.handle.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT failed_server_id FROM failover_snapshots
             WHERE backup_server_id = ?1 LIMIT 1",
        )?;
        let mut rows = stmt.query(params![server_id])?;

        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn clear_for(&self, failed_server_id: i64) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute(
            "DELETE FROM failover_snapshots WHERE failed_server_id = ?1",
            params![failed_server_id],
        )?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute("DELETE FROM failover_snapshots", [])?;
        Ok(())
    }
}
