use crate::error::Result;
use crate::store::servers::ServerStatus;
use crate::store::{parse_rfc3339, StoreHandle};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

const KEY_STATUS: &str = "status";
const KEY_SERVER_ID: &str = "server_id";
const KEY_PARTNER_ID: &str = "partner_id";
const KEY_IN_BACKUP: &str = "in_backup";
const KEY_ORCHESTRATOR: &str = "orchestrator_address";
const KEY_LAST_HEARTBEAT: &str = "last_heartbeat";

/// A worker's view of itself: assigned id, partner, enablement and the
/// last heartbeat seen from that partner. Persisted so a restart comes
/// back knowing who it was.
pub struct NodeRegistry {
    handle: StoreHandle,
}

impl NodeRegistry {
    pub fn new(handle: StoreHandle) -> Result<Self> {
        let registry = Self { handle };
        registry.init_schema()?;
        Ok(registry)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS node_registry (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.handle.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM node_registry WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute(
            "INSERT INTO node_registry (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute("DELETE FROM node_registry WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn status(&self) -> Result<ServerStatus> {
        match self.get(KEY_STATUS)? {
            Some(value) => ServerStatus::parse(&value),
            None => Ok(ServerStatus::Active),
        }
    }

    pub fn set_status(&self, status: ServerStatus) -> Result<()> {
        self.set(KEY_STATUS, status.as_str())
    }

    pub fn server_id(&self) -> Result<Option<i64>> {
        match self.get(KEY_SERVER_ID)? {
            Some(value) => Ok(Some(value.parse().map_err(|_| {
                crate::error::TessioError::Internal(format!("bad server id in registry: {}", value))
            })?)),
            None => Ok(None),
        }
    }

    pub fn set_server_id(&self, id: i64) -> Result<()> {
        self.set(KEY_SERVER_ID, &id.to_string())
    }

    pub fn partner_id(&self) -> Result<Option<i64>> {
        match self.get(KEY_PARTNER_ID)? {
            Some(value) => Ok(Some(value.parse().map_err(|_| {
                crate::error::TessioError::Internal(format!(
                    "bad partner id in registry: {}",
                    value
                ))
            })?)),
            None => Ok(None),
        }
    }

    pub fn set_partner_id(&self, partner_id: Option<i64>) -> Result<()> {
        match partner_id {
            Some(id) => self.set(KEY_PARTNER_ID, &id.to_string()),
            None => self.delete(KEY_PARTNER_ID),
        }
    }

    pub fn in_backup(&self) -> Result<bool> {
        Ok(self.get(KEY_IN_BACKUP)?.as_deref() == Some("true"))
    }

    pub fn set_in_backup(&self, in_backup: bool) -> Result<()> {
        self.set(KEY_IN_BACKUP, if in_backup { "true" } else { "false" })
    }

    pub fn orchestrator_address(&self) -> Result<Option<String>> {
        self.get(KEY_ORCHESTRATOR)
    }

    pub fn set_orchestrator_address(&self, address: &str) -> Result<()> {
        self.set(KEY_ORCHESTRATOR, address)
    }

    pub fn last_heartbeat(&self) -> Result<Option<DateTime<Utc>>> {
        match self.get(KEY_LAST_HEARTBEAT)? {
            Some(value) => Ok(Some(parse_rfc3339(&value)?)),
            None => Ok(None),
        }
    }

    pub fn set_last_heartbeat(&self, at: DateTime<Utc>) -> Result<()> {
        self.set(KEY_LAST_HEARTBEAT, &at.to_rfc3339())
    }

    pub fn touch_heartbeat(&self) -> Result<()> {
        self.set_last_heartbeat(Utc::now())
    }

    pub fn clear(&self) -> Result<()> {
        let conn = self.handle.conn()?;
        conn.execute("DELETE FROM node_registry", [])?;
        Ok(())
    }
}
