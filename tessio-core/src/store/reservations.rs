use crate::error::Result;
use crate::store::StoreHandle;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

/// Soft claims taken on pool items before a delayed hand-off. A claim does
/// not block readers; it only decides which destination wins when two
/// transfers ask for the same parked item.
pub struct ReservationStore {
    handle: StoreHandle,
}

impl ReservationStore {
    pub fn new(handle: StoreHandle) -> Result<Self> {
        let store = Self { handle };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS transfer_reservations (
                item_id INTEGER PRIMARY KEY,
                claimed_by INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Claims an item for a destination. Returns false when another
    /// destination already holds the claim; re-claiming for the same
    /// destination succeeds.
    pub fn claim(&self, item_id: i64, destination: i64) -> Result<bool> {
        let conn = self.handle.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO transfer_reservations (item_id, claimed_by, created_at)
             VALUES (?1, ?2, ?3)",
            params![item_id, destination, Utc::now().to_rfc3339()],
        )?;

        if inserted > 0 {
            return Ok(true);
        }

        Ok(self.claimed_by(item_id)? == Some(destination))
    }

    pub fn claimed_by(&self, item_id: i64) -> Result<Option<i64>> {
        let conn = self.handle.conn()?;
        let holder = conn
            .query_row(
                "SELECT claimed_by FROM transfer_reservations WHERE item_id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(holder)
    }

    pub fn release(&self, ids: &[i64]) -> Result<()> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare("DELETE FROM transfer_reservations WHERE item_id = ?1")?;
            for &id in ids {
                stmt.execute(params![id])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute("DELETE FROM transfer_reservations", [])?;
        Ok(())
    }
}
