use crate::error::Result;
use crate::store::{parse_rfc3339, StoreHandle};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub actor: i64,
    pub action: String,
    pub detail: String,
}

/// Append-only audit trail of cluster events. Actor 0 is the orchestrator.
pub struct ActivityStore {
    handle: StoreHandle,
}

impl ActivityStore {
    pub fn new(handle: StoreHandle) -> Result<Self> {
        let store = Self { handle };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                at TEXT NOT NULL,
                actor INTEGER NOT NULL,
                action TEXT NOT NULL,
                detail TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn record(&self, actor: i64, action: &str, detail: &str) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute(
            "INSERT INTO activity_log (at, actor, action, detail) VALUES (?1, ?2, ?3, ?4)",
            params![Utc::now().to_rfc3339(), actor, action, detail],
        )?;
        Ok(())
    }

    /// Best-effort record. The audit trail never fails the operation that
    /// produced the event.
    pub fn note(&self, actor: i64, action: &str, detail: &str) {
        if let Err(error) = self.record(actor, action, detail) {
            tracing::warn!("Failed to record activity: action={} error={}", action, error);
        }
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<ActivityEntry>> {
        let conn = self.handle.conn()?;
        let mut stmt = conn.prepare(
            "SELECT at, actor, action, detail FROM activity_log
             ORDER BY id DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let at: String = row.get(0)?;
            entries.push(ActivityEntry {
                at: parse_rfc3339(&at)?,
                actor: row.get(1)?,
                action: row.get(2)?,
                detail: row.get(3)?,
            });
        }

        Ok(entries)
    }

    pub fn clear(&self) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute("DELETE FROM activity_log", [])?;
        Ok(())
    }
}
