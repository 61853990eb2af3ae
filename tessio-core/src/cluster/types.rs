use crate::store::inventory::InventoryItem;
use crate::store::servers::ServerStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPing {
    pub server_id: i64,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeactivateResponse {
    pub deactivated: Vec<i64>,
    pub clean: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<InventoryItem>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateResponse {
    pub activated: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub accepted: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureResponse {
    pub granted: bool,
    pub failed_server_id: i64,
    pub backup_server_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub server_id: i64,
    #[serde(default)]
    pub relinquished_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryOutcomeKind {
    Repaired,
    Standalone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResponse {
    pub outcome: RecoveryOutcomeKind,
    pub restored: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatusResponse {
    pub status: ServerStatus,
    pub server_id: Option<i64>,
    pub partner_id: Option<i64>,
    pub in_backup: bool,
    pub items: i64,
}
