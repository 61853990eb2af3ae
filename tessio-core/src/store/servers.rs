use crate::error::{Result, TessioError};
use crate::store::StoreHandle;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Active,
    Disabled,
    Standalone,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Active => "active",
            ServerStatus::Disabled => "disabled",
            ServerStatus::Standalone => "standalone",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(ServerStatus::Active),
            "disabled" => Ok(ServerStatus::Disabled),
            "standalone" => Ok(ServerStatus::Standalone),
            other => Err(TessioError::Internal(format!(
                "unknown server status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: i64,
    pub hostname: String,
    pub port: u16,
    pub status: ServerStatus,
    pub partner_id: Option<i64>,
}

/// Fleet membership table. The orchestrator owns the authoritative copy;
/// workers hold a pushed mirror for partner lookups.
pub struct ServerStore {
    handle: StoreHandle,
}

impl ServerStore {
    pub fn new(handle: StoreHandle) -> Result<Self> {
        let store = Self { handle };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS servers (
                id INTEGER PRIMARY KEY,
                hostname TEXT NOT NULL,
                port INTEGER NOT NULL,
                status TEXT NOT NULL,
                partner_id INTEGER
            )",
            [],
        )?;
        Ok(())
    }

    /// Assigns the next id and records the worker as active and unpaired.
    pub fn register(&self, hostname: &str, port: u16) -> Result<ServerRecord> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;

        let id: i64 = tx.query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM servers", [], |row| {
            row.get(0)
        })?;
        tx.execute(
            "INSERT INTO servers (id, hostname, port, status, partner_id)
             VALUES (?1, ?2, ?3, ?4, NULL)",
            params![id, hostname, port, ServerStatus::Active.as_str()],
        )?;

        tx.commit()?;

        Ok(ServerRecord {
            id,
            hostname: hostname.to_string(),
            port,
            status: ServerStatus::Active,
            partner_id: None,
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<ServerRecord>> {
        let conn = self.handle.conn()?;
        let record = conn
            .query_row(
                "SELECT id, hostname, port, status, partner_id FROM servers WHERE id = ?1",
                params![id],
                decode_record,
            )
            .optional()?;

        match record {
            Some(decoded) => Ok(Some(decoded?)),
            None => Ok(None),
        }
    }

    pub fn require(&self, id: i64) -> Result<ServerRecord> {
        self.get(id)?
            .ok_or_else(|| TessioError::NotFound(format!("server {} is not registered", id)))
    }

    pub fn find_by_address(&self, hostname: &str, port: u16) -> Result<Option<ServerRecord>> {
        let conn = self.handle.conn()?;
        let record = conn
            .query_row(
                "SELECT id, hostname, port, status, partner_id FROM servers
                 WHERE hostname = ?1 AND port = ?2",
                params![hostname, port],
                decode_record,
            )
            .optional()?;

        match record {
            Some(decoded) => Ok(Some(decoded?)),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> Result<Vec<ServerRecord>> {
        let conn = self.handle.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, hostname, port, status, partner_id FROM servers ORDER BY id ASC")?;
        let mut rows = stmt.query([])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(decode_record(row)??);
        }

        Ok(records)
    }

    pub fn set_status(&self, id: i64, status: ServerStatus) -> Result<()> {
        let conn = self.handle.conn()?;
        let affected = conn.execute(
            "UPDATE servers SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;

        if affected == 0 {
            return Err(TessioError::NotFound(format!(
                "server {} is not registered",
                id
            )));
        }

        Ok(())
    }

    pub fn set_partner(&self, id: i64, partner_id: Option<i64>) -> Result<()> {
        let conn = self.handle.conn()?;
        let affected = conn.execute(
            "UPDATE servers SET partner_id = ?2 WHERE id = ?1",
            params![id, partner_id],
        )?;

        if affected == 0 {
            return Err(TessioError::NotFound(format!(
                "server {} is not registered",
                id
            )));
        }

        Ok(())
    }

    /// Records a pairing in both directions and marks both nodes active.
    pub fn pair(&self, first: i64, second: i64) -> Result<()> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE servers SET partner_id = ?2, status = ?3 WHERE id = ?1",
            params![first, second, ServerStatus::Active.as_str()],
        )?;
        tx.execute(
            "UPDATE servers SET partner_id = ?2, status = ?3 WHERE id = ?1",
            params![second, first, ServerStatus::Active.as_str()],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Replaces the whole table with a pushed copy of the fleet map.
    pub fn replace_all(&self, records: &[ServerRecord]) -> Result<()> {
        let mut conn = self.handle.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM servers", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO servers (id, hostname, port, status, partner_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.id,
                    record.hostname,
                    record.port,
                    record.status.as_str(),
                    record.partner_id,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn address(&self, id: i64) -> Result<String> {
        let record = self.require(id)?;
        Ok(format!("{}:{}", record.hostname, record.port))
    }

    pub fn clear(&self) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute("DELETE FROM servers", [])?;
        Ok(())
    }
}

fn decode_record(row: &Row<'_>) -> rusqlite::Result<Result<ServerRecord>> {
    let status_text: String = row.get(3)?;
    let id = row.get(0)?;
    let hostname = row.get(1)?;
    let port = row.get(2)?;
    let partner_id = row.get(4)?;

    Ok(ServerStatus::parse(&status_text).map(|status| ServerRecord {
        id,
        hostname,
        port,
        status,
        partner_id,
    }))
}
