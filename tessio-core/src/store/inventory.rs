use crate::error::Result;
use crate::store::{parse_rfc3339, StoreHandle};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Row, Rows};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const ITEM_COLUMNS: &str = "id, committed, name, location, activated, locked, on_backup, \
     available, reserved_by, last_modified_by, last_modified_at";

/// One copy of a ticket. The `(id, committed)` primary key allows at most
/// one committed row and one in-flight draft per ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: i64,
    pub committed: bool,
    pub name: String,
    pub location: i64,
    pub activated: bool,
    pub locked: bool,
    pub on_backup: bool,
    pub available: bool,
    pub reserved_by: Option<String>,
    pub last_modified_by: i64,
    pub last_modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintEntry {
    pub id: i64,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DeactivationResult {
    pub deactivated: Vec<i64>,
    pub clean: Vec<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct PrepareResult {
    pub drafts: Vec<InventoryItem>,
    pub missed: Vec<i64>,
}

pub struct InventoryStore {
    handle: StoreHandle,
}

impl InventoryStore {
    pub fn new(handle: StoreHandle) -> Result<Self> {
        let store = Self { handle };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.handle.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS inventory (
                id INTEGER NOT NULL,
                committed INTEGER NOT NULL,
                name TEXT NOT NULL,
                location INTEGER NOT NULL,
                activated INTEGER NOT NULL DEFAULT 0,
                locked INTEGER NOT NULL DEFAULT 0,
                on_backup INTEGER NOT NULL DEFAULT 0,
                available INTEGER NOT NULL DEFAULT 1,
                reserved_by TEXT,
                last_modified_by INTEGER NOT NULL DEFAULT 0,
                last_modified_at TEXT NOT NULL,
                PRIMARY KEY (id, committed)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_inventory_location
             ON inventory(location, committed)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_inventory_reserved
             ON inventory(reserved_by)",
            [],
        )?;

        Ok(())
    }

    pub fn upsert(&self, items: &[InventoryItem]) -> Result<usize> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO inventory (id, committed, name, location, activated, locked,
                    on_backup, available, reserved_by, last_modified_by, last_modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id, committed) DO UPDATE SET
                    name = excluded.name,
                    location = excluded.location,
                    activated = excluded.activated,
                    locked = excluded.locked,
                    on_backup = excluded.on_backup,
                    available = excluded.available,
                    reserved_by = excluded.reserved_by,
                    last_modified_by = excluded.last_modified_by,
                    last_modified_at = excluded.last_modified_at",
            )?;

            for item in items {
                stmt.execute(params![
                    item.id,
                    item.committed,
                    item.name,
                    item.location,
                    item.activated,
                    item.locked,
                    item.on_backup,
                    item.available,
                    item.reserved_by,
                    item.last_modified_by,
                    item.last_modified_at.to_rfc3339(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(items.len())
    }

    pub fn get_committed(&self, id: i64) -> Result<Option<InventoryItem>> {
        let conn = self.handle.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM inventory WHERE id = ?1 AND committed = 1",
            ITEM_COLUMNS
        ))?;
        let mut rows = stmt.query(params![id])?;

        Ok(collect_items(&mut rows)?.into_iter().next())
    }

    pub fn get_draft(&self, id: i64) -> Result<Option<InventoryItem>> {
        let conn = self.handle.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM inventory WHERE id = ?1 AND committed = 0",
            ITEM_COLUMNS
        ))?;
        let mut rows = stmt.query(params![id])?;

        Ok(collect_items(&mut rows)?.into_iter().next())
    }

    pub fn list_committed(&self) -> Result<Vec<InventoryItem>> {
        let conn = self.handle.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM inventory WHERE committed = 1 ORDER BY id ASC",
            ITEM_COLUMNS
        ))?;
        let mut rows = stmt.query([])?;

        collect_items(&mut rows)
    }

    pub fn list_by_location(&self, location: i64) -> Result<Vec<InventoryItem>> {
        let conn = self.handle.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM inventory WHERE location = ?1 AND committed = 1 ORDER BY id ASC",
            ITEM_COLUMNS
        ))?;
        let mut rows = stmt.query(params![location])?;

        collect_items(&mut rows)
    }

    pub fn ids_at_location(&self, location: i64) -> Result<Vec<i64>> {
        let conn = self.handle.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM inventory WHERE location = ?1 AND committed = 1 ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![location])?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get(0)?);
        }

        Ok(ids)
    }

    /// Committed rows for the given ids, in id order. Missing ids are
    /// silently absent from the result.
    pub fn rows_for(&self, ids: &[i64]) -> Result<Vec<InventoryItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.handle.conn()?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM inventory WHERE committed = 1 AND id IN ({}) ORDER BY id ASC",
            ITEM_COLUMNS, placeholders
        ))?;
        let mut rows = stmt.query(params_from_iter(ids.iter()))?;

        collect_items(&mut rows)
    }

    fn drafts_for(&self, ids: &[i64]) -> Result<Vec<InventoryItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.handle.conn()?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM inventory WHERE committed = 0 AND id IN ({}) ORDER BY id ASC",
            ITEM_COLUMNS, placeholders
        ))?;
        let mut rows = stmt.query(params_from_iter(ids.iter()))?;

        collect_items(&mut rows)
    }

    /// Takes rows out of service at this node. Only rows this node owns and
    /// that no transaction holds are touched; everything else is reported
    /// as clean. A zero-row update is an answer, not an error.
    pub fn deactivate(
        &self,
        ids: &[i64],
        owner: i64,
        new_location: i64,
        actor: i64,
    ) -> Result<DeactivationResult> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut result = DeactivationResult::default();

        {
            let mut stmt = tx.prepare(
                "UPDATE inventory
                 SET activated = 0, location = ?3, on_backup = 0,
                     last_modified_by = ?4, last_modified_at = ?5
                 WHERE id = ?1 AND committed = 1 AND location = ?2 AND locked = 0",
            )?;

            for &id in ids {
                let affected = stmt.execute(params![id, owner, new_location, actor, now])?;
                if affected > 0 {
                    result.deactivated.push(id);
                } else {
                    result.clean.push(id);
                }
            }
        }

        tx.commit()?;
        Ok(result)
    }

    /// Brings rows into service. Rows this node owns (or that were parked
    /// at the orchestrator) are adopted outright; copies held for the
    /// partner are only marked activated.
    pub fn activate(
        &self,
        ids: &[i64],
        self_id: i64,
        partner_id: Option<i64>,
        actor: i64,
    ) -> Result<Vec<i64>> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut activated = Vec::new();

        {
            let mut own_stmt = tx.prepare(
                "UPDATE inventory
                 SET activated = 1, location = ?2, on_backup = 0,
                     last_modified_by = ?3, last_modified_at = ?4
                 WHERE id = ?1 AND committed = 1 AND location IN (0, ?2)",
            )?;
            let mut replica_stmt = tx.prepare(
                "UPDATE inventory
                 SET activated = 1, on_backup = 1, last_modified_by = ?3, last_modified_at = ?4
                 WHERE id = ?1 AND committed = 1 AND location = ?2",
            )?;

            for &id in ids {
                let owned = own_stmt.execute(params![id, self_id, actor, now])?;
                if owned > 0 {
                    activated.push(id);
                    continue;
                }

                if let Some(partner) = partner_id {
                    let replicated = replica_stmt.execute(params![id, partner, actor, now])?;
                    if replicated > 0 {
                        activated.push(id);
                    }
                }
            }
        }

        tx.commit()?;
        Ok(activated)
    }

    /// Rewrites ownership in the orchestrator's mirror after a move.
    pub fn set_location(
        &self,
        ids: &[i64],
        location: i64,
        activated: bool,
        actor: i64,
    ) -> Result<usize> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut updated = 0;

        {
            let mut stmt = tx.prepare(
                "UPDATE inventory
                 SET location = ?2, activated = ?3, on_backup = 0,
                     last_modified_by = ?4, last_modified_at = ?5
                 WHERE id = ?1 AND committed = 1",
            )?;

            for &id in ids {
                updated += stmt.execute(params![id, location, activated, actor, now])?;
            }
        }

        tx.commit()?;
        Ok(updated)
    }

    /// Takes over every committed row recorded at `from`. In-flight drafts
    /// left behind by the failed owner are dropped, matching an abort of
    /// whatever transaction it never finished.
    pub fn adopt_from(&self, from: i64, to: i64, actor: i64) -> Result<Vec<i64>> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let mut ids = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT id FROM inventory WHERE location = ?1 AND committed = 1 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query(params![from])?;
            while let Some(row) = rows.next()? {
                ids.push(row.get::<_, i64>(0)?);
            }
        }

        {
            let mut drop_draft = tx.prepare("DELETE FROM inventory WHERE id = ?1 AND committed = 0")?;
            let mut adopt = tx.prepare(
                "UPDATE inventory
                 SET location = ?2, on_backup = 1, locked = 0,
                     last_modified_by = ?3, last_modified_at = ?4
                 WHERE id = ?1 AND committed = 1 AND location = ?5",
            )?;

            for &id in &ids {
                drop_draft.execute(params![id])?;
                adopt.execute(params![id, to, actor, now, from])?;
            }
        }

        tx.commit()?;
        Ok(ids)
    }

    /// Parks every unlocked row this node owns back at the orchestrator.
    /// Locked rows finish their transaction first and are left for a
    /// later round.
    pub fn relinquish_owned(&self, owner: i64, actor: i64) -> Result<Vec<i64>> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let mut candidates = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT id FROM inventory
                 WHERE location = ?1 AND committed = 1 AND locked = 0
                 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query(params![owner])?;
            while let Some(row) = rows.next()? {
                candidates.push(row.get::<_, i64>(0)?);
            }
        }

        let mut relinquished = Vec::new();
        {
            let mut stmt = tx.prepare(
                "UPDATE inventory
                 SET location = 0, activated = 0, on_backup = 1,
                     last_modified_by = ?3, last_modified_at = ?4
                 WHERE id = ?1 AND committed = 1 AND location = ?2 AND locked = 0",
            )?;

            for &id in &candidates {
                if stmt.execute(params![id, owner, actor, now])? > 0 {
                    relinquished.push(id);
                }
            }
        }

        tx.commit()?;
        Ok(relinquished)
    }

    /// First phase of a reservation: lock each committed row that is still
    /// sellable at this owner and stage a draft carrying the reservation.
    /// Rows that fail the precondition are reported back, never treated as
    /// errors. The owner guard keeps replica copies held for the partner
    /// out of reach.
    pub fn prepare_reserve(
        &self,
        ids: &[i64],
        txn_id: &str,
        owner: i64,
        actor: i64,
    ) -> Result<PrepareResult> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut prepared = Vec::new();
        let mut missed = Vec::new();

        {
            let mut lock_stmt = tx.prepare(
                "UPDATE inventory
                 SET locked = 1, last_modified_by = ?2, last_modified_at = ?3
                 WHERE id = ?1 AND committed = 1 AND locked = 0 AND location = ?4
                   AND activated = 1 AND available = 1 AND reserved_by IS NULL",
            )?;
            let mut draft_stmt = tx.prepare(
                "INSERT INTO inventory (id, committed, name, location, activated, locked,
                    on_backup, available, reserved_by, last_modified_by, last_modified_at)
                 SELECT id, 0, name, location, activated, 1, on_backup, available, ?2, ?3, ?4
                 FROM inventory WHERE id = ?1 AND committed = 1",
            )?;

            for &id in ids {
                if lock_stmt.execute(params![id, actor, now, owner])? == 0 {
                    missed.push(id);
                    continue;
                }
                draft_stmt.execute(params![id, txn_id, actor, now])?;
                prepared.push(id);
            }
        }

        tx.commit()?;

        Ok(PrepareResult {
            drafts: self.drafts_for(&prepared)?,
            missed,
        })
    }

    pub fn reserved_ids(&self, txn_id: &str) -> Result<Vec<i64>> {
        let conn = self.handle.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM inventory
             WHERE reserved_by = ?1 AND committed = 1
             ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![txn_id])?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get(0)?);
        }

        Ok(ids)
    }

    /// First phase of a purchase: lock the rows reserved under the
    /// transaction and stage drafts that consume the reservation.
    pub fn prepare_purchase(&self, txn_id: &str, actor: i64) -> Result<PrepareResult> {
        let ids = self.reserved_ids(txn_id)?;

        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut prepared = Vec::new();
        let mut missed = Vec::new();

        {
            let mut lock_stmt = tx.prepare(
                "UPDATE inventory
                 SET locked = 1, last_modified_by = ?3, last_modified_at = ?4
                 WHERE id = ?1 AND committed = 1 AND locked = 0 AND reserved_by = ?2",
            )?;
            let mut draft_stmt = tx.prepare(
                "INSERT INTO inventory (id, committed, name, location, activated, locked,
                    on_backup, available, reserved_by, last_modified_by, last_modified_at)
                 SELECT id, 0, name, location, activated, 1, on_backup, 0, NULL, ?2, ?3
                 FROM inventory WHERE id = ?1 AND committed = 1",
            )?;

            for &id in &ids {
                if lock_stmt.execute(params![id, txn_id, actor, now])? == 0 {
                    missed.push(id);
                    continue;
                }
                draft_stmt.execute(params![id, actor, now])?;
                prepared.push(id);
            }
        }

        tx.commit()?;

        Ok(PrepareResult {
            drafts: self.drafts_for(&prepared)?,
            missed,
        })
    }

    /// Backup side of the prepare phase: store the primary's drafts and
    /// lock the matching replica rows. Retransmits overwrite the staged
    /// draft, so a retried prepare is harmless.
    pub fn prepare_replica(&self, rows: &[InventoryItem]) -> Result<Vec<i64>> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut accepted = Vec::new();

        {
            let mut draft_stmt = tx.prepare(
                "INSERT INTO inventory (id, committed, name, location, activated, locked,
                    on_backup, available, reserved_by, last_modified_by, last_modified_at)
                 VALUES (?1, 0, ?2, ?3, ?4, 1, 1, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id, committed) DO UPDATE SET
                    name = excluded.name,
                    location = excluded.location,
                    activated = excluded.activated,
                    locked = excluded.locked,
                    on_backup = excluded.on_backup,
                    available = excluded.available,
                    reserved_by = excluded.reserved_by,
                    last_modified_by = excluded.last_modified_by,
                    last_modified_at = excluded.last_modified_at",
            )?;
            let mut lock_stmt = tx.prepare(
                "UPDATE inventory SET locked = 1, last_modified_at = ?2
                 WHERE id = ?1 AND committed = 1 AND locked = 0",
            )?;

            for row in rows {
                draft_stmt.execute(params![
                    row.id,
                    row.name,
                    row.location,
                    row.activated,
                    row.available,
                    row.reserved_by,
                    row.last_modified_by,
                    now,
                ])?;
                lock_stmt.execute(params![row.id, now])?;
                accepted.push(row.id);
            }
        }

        tx.commit()?;
        Ok(accepted)
    }

    /// Second phase: promote each staged draft to the committed row.
    /// Ids without a draft are skipped, so replaying an apply is safe.
    pub fn apply(&self, ids: &[i64]) -> Result<Vec<i64>> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut applied = Vec::new();

        {
            let mut probe = tx.prepare("SELECT 1 FROM inventory WHERE id = ?1 AND committed = 0")?;
            let mut drop_old = tx.prepare("DELETE FROM inventory WHERE id = ?1 AND committed = 1")?;
            let mut promote = tx.prepare(
                "UPDATE inventory SET committed = 1, locked = 0, last_modified_at = ?2
                 WHERE id = ?1 AND committed = 0",
            )?;

            for &id in ids {
                let mut rows = probe.query(params![id])?;
                if rows.next()?.is_none() {
                    continue;
                }
                drop_old.execute(params![id])?;
                promote.execute(params![id, now])?;
                applied.push(id);
            }
        }

        tx.commit()?;
        Ok(applied)
    }

    /// Drops staged drafts and releases the locks they held.
    pub fn abort(&self, ids: &[i64]) -> Result<()> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        {
            let mut drop_draft = tx.prepare("DELETE FROM inventory WHERE id = ?1 AND committed = 0")?;
            let mut unlock = tx.prepare(
                "UPDATE inventory SET locked = 0, last_modified_at = ?2
                 WHERE id = ?1 AND committed = 1 AND locked = 1",
            )?;

            for &id in ids {
                drop_draft.execute(params![id])?;
                unlock.execute(params![id, now])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn fingerprints(&self, ids: &[i64]) -> Result<Vec<FingerprintEntry>> {
        let mut entries = Vec::with_capacity(ids.len());
        for &id in ids {
            entries.push(FingerprintEntry {
                id,
                fingerprint: self.get_committed(id)?.map(|item| item_fingerprint(&item)),
            });
        }

        Ok(entries)
    }

    pub fn count_committed(&self) -> Result<i64> {
        let conn = self.handle.conn()?;
        let count =
            conn.query_row("SELECT COUNT(*) FROM inventory WHERE committed = 1", [], |row| {
                row.get(0)
            })?;
        Ok(count)
    }

    pub fn clear(&self) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute("DELETE FROM inventory", [])?;
        Ok(())
    }
}

/// Content fingerprint of a committed row, used to decide whether a row
/// changed while its owner was away. Ownership fields are excluded on
/// purpose: a failover moves the row without changing what it sells.
pub fn item_fingerprint(item: &InventoryItem) -> String {
    let canonical = format!(
        "{}|{}|{}|{}|{}",
        item.id,
        item.name,
        item.activated,
        item.available,
        item.reserved_by.as_deref().unwrap_or("-"),
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn collect_items(rows: &mut Rows<'_>) -> Result<Vec<InventoryItem>> {
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(decode_item(row)?);
    }
    Ok(items)
}

fn decode_item(row: &Row<'_>) -> Result<InventoryItem> {
    let modified_at: String = row.get(10)?;
    Ok(InventoryItem {
        id: row.get(0)?,
        committed: row.get(1)?,
        name: row.get(2)?,
        location: row.get(3)?,
        activated: row.get(4)?,
        locked: row.get(5)?,
        on_backup: row.get(6)?,
        available: row.get(7)?,
        reserved_by: row.get(8)?,
        last_modified_by: row.get(9)?,
        last_modified_at: parse_rfc3339(&modified_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, InventoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let handle = StoreHandle::open(dir.path()).unwrap();
        let store = InventoryStore::new(handle).unwrap();
        (dir, store)
    }

    fn item(id: i64, location: i64) -> InventoryItem {
        InventoryItem {
            id,
            committed: true,
            name: format!("ticket-{}", id),
            location,
            activated: true,
            locked: false,
            on_backup: false,
            available: true,
            reserved_by: None,
            last_modified_by: 0,
            last_modified_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_and_lookup() {
        let (_dir, store) = test_store();
        store.upsert(&[item(1, 5), item(2, 5), item(3, 7)]).unwrap();

        let found = store.get_committed(2).unwrap().unwrap();
        assert_eq!(found.location, 5);
        assert!(store.get_committed(99).unwrap().is_none());

        assert_eq!(store.list_committed().unwrap().len(), 3);
        assert_eq!(store.ids_at_location(5).unwrap(), vec![1, 2]);
        assert_eq!(store.count_committed().unwrap(), 3);
    }

    #[test]
    fn test_deactivate_reports_clean_for_unowned_and_locked() {
        let (_dir, store) = test_store();
        let mut locked = item(3, 5);
        locked.locked = true;
        store.upsert(&[item(1, 5), item(2, 7), locked]).unwrap();

        let result = store.deactivate(&[1, 2, 3, 4], 5, 0, 5).unwrap();
        assert_eq!(result.deactivated, vec![1]);
        assert_eq!(result.clean, vec![2, 3, 4]);

        let moved = store.get_committed(1).unwrap().unwrap();
        assert_eq!(moved.location, 0);
        assert!(!moved.activated);
    }

    #[test]
    fn test_activate_owner_and_replica_branches() {
        let (_dir, store) = test_store();
        let mut parked = item(1, 0);
        parked.activated = false;
        let mut replica = item(2, 9);
        replica.activated = false;
        replica.on_backup = true;
        store.upsert(&[parked, replica]).unwrap();

        let activated = store.activate(&[1, 2, 3], 5, Some(9), 5).unwrap();
        assert_eq!(activated, vec![1, 2]);

        let owned = store.get_committed(1).unwrap().unwrap();
        assert_eq!(owned.location, 5);
        assert!(owned.activated);
        assert!(!owned.on_backup);

        let copy = store.get_committed(2).unwrap().unwrap();
        assert_eq!(copy.location, 9);
        assert!(copy.activated);
        assert!(copy.on_backup);
    }

    #[test]
    fn test_relinquish_skips_locked_rows() {
        let (_dir, store) = test_store();
        let mut locked = item(2, 5);
        locked.locked = true;
        store.upsert(&[item(1, 5), locked]).unwrap();

        let parked = store.relinquish_owned(5, 5).unwrap();
        assert_eq!(parked, vec![1]);

        let row = store.get_committed(1).unwrap().unwrap();
        assert_eq!(row.location, 0);
        assert!(row.on_backup);
        assert_eq!(store.get_committed(2).unwrap().unwrap().location, 5);
    }

    #[test]
    fn test_adopt_takes_rows_and_drops_orphan_drafts() {
        let (_dir, store) = test_store();
        store.upsert(&[item(1, 9), item(2, 9)]).unwrap();
        let prep = store.prepare_reserve(&[1], "txn-orphan", 9, 9).unwrap();
        assert_eq!(prep.drafts.len(), 1);

        let adopted = store.adopt_from(9, 5, 5).unwrap();
        assert_eq!(adopted, vec![1, 2]);

        let row = store.get_committed(1).unwrap().unwrap();
        assert_eq!(row.location, 5);
        assert!(row.on_backup);
        assert!(!row.locked);
        assert!(store.get_draft(1).unwrap().is_none());
    }

    #[test]
    fn test_reserve_second_attempt_misses() {
        let (_dir, store) = test_store();
        store.upsert(&[item(1, 5)]).unwrap();

        let first = store.prepare_reserve(&[1], "txn-a", 5, 5).unwrap();
        assert_eq!(first.drafts.len(), 1);
        assert!(first.missed.is_empty());

        let second = store.prepare_reserve(&[1], "txn-b", 5, 5).unwrap();
        assert!(second.drafts.is_empty());
        assert_eq!(second.missed, vec![1]);
    }

    #[test]
    fn test_reserve_skips_replica_copies() {
        let (_dir, store) = test_store();
        let mut replica = item(1, 9);
        replica.on_backup = true;
        store.upsert(&[replica, item(2, 5)]).unwrap();

        let prep = store.prepare_reserve(&[1, 2], "txn-a", 5, 5).unwrap();
        assert_eq!(prep.missed, vec![1]);
        assert_eq!(prep.drafts.len(), 1);
        assert_eq!(prep.drafts[0].id, 2);
        assert!(!store.get_committed(1).unwrap().unwrap().locked);
    }

    #[test]
    fn test_abort_leaves_no_drafts_and_unlocks() {
        let (_dir, store) = test_store();
        store.upsert(&[item(1, 5)]).unwrap();

        store.prepare_reserve(&[1], "txn-a", 5, 5).unwrap();
        store.abort(&[1]).unwrap();

        assert!(store.get_draft(1).unwrap().is_none());
        let row = store.get_committed(1).unwrap().unwrap();
        assert!(!row.locked);
        assert!(row.reserved_by.is_none());

        let retry = store.prepare_reserve(&[1], "txn-b", 5, 5).unwrap();
        assert_eq!(retry.drafts.len(), 1);
    }

    #[test]
    fn test_apply_promotes_draft() {
        let (_dir, store) = test_store();
        store.upsert(&[item(1, 5)]).unwrap();

        store.prepare_reserve(&[1], "txn-a", 5, 5).unwrap();
        let applied = store.apply(&[1]).unwrap();
        assert_eq!(applied, vec![1]);

        let row = store.get_committed(1).unwrap().unwrap();
        assert_eq!(row.reserved_by.as_deref(), Some("txn-a"));
        assert!(!row.locked);
        assert!(store.get_draft(1).unwrap().is_none());

        assert!(store.apply(&[1]).unwrap().is_empty());
    }

    #[test]
    fn test_purchase_consumes_reservation() {
        let (_dir, store) = test_store();
        store.upsert(&[item(1, 5), item(2, 5)]).unwrap();

        store.prepare_reserve(&[1, 2], "txn-a", 5, 5).unwrap();
        store.apply(&[1, 2]).unwrap();
        assert_eq!(store.reserved_ids("txn-a").unwrap(), vec![1, 2]);

        let prep = store.prepare_purchase("txn-a", 5).unwrap();
        assert_eq!(prep.drafts.len(), 2);
        assert!(prep.missed.is_empty());
        store.apply(&[1, 2]).unwrap();

        let row = store.get_committed(1).unwrap().unwrap();
        assert!(!row.available);
        assert!(row.reserved_by.is_none());
        assert!(store.reserved_ids("txn-a").unwrap().is_empty());
    }

    #[test]
    fn test_replica_prepare_is_retransmit_safe() {
        let (_dir, store) = test_store();
        let mut base = item(1, 9);
        base.on_backup = true;
        store.upsert(&[base]).unwrap();

        let mut draft = item(1, 9);
        draft.committed = false;
        draft.reserved_by = Some("txn-a".to_string());

        let accepted = store.prepare_replica(std::slice::from_ref(&draft)).unwrap();
        assert_eq!(accepted, vec![1]);
        let accepted = store.prepare_replica(std::slice::from_ref(&draft)).unwrap();
        assert_eq!(accepted, vec![1]);

        store.apply(&[1]).unwrap();
        let row = store.get_committed(1).unwrap().unwrap();
        assert_eq!(row.reserved_by.as_deref(), Some("txn-a"));
        assert!(row.on_backup);
    }

    #[test]
    fn test_fingerprints_ignore_ownership() {
        let (_dir, store) = test_store();
        store.upsert(&[item(1, 5)]).unwrap();
        let before = store.fingerprints(&[1, 2]).unwrap();
        assert!(before[0].fingerprint.is_some());
        assert!(before[1].fingerprint.is_none());

        store.set_location(&[1], 9, true, 0).unwrap();
        let after = store.fingerprints(&[1]).unwrap();
        assert_eq!(before[0].fingerprint, after[0].fingerprint);

        let mut sold = store.get_committed(1).unwrap().unwrap();
        sold.available = false;
        store.upsert(&[sold]).unwrap();
        let changed = store.fingerprints(&[1]).unwrap();
        assert_ne!(before[0].fingerprint, changed[0].fingerprint);
    }
}
