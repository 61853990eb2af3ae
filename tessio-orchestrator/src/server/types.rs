use serde::{Deserialize, Serialize};
use tessio_core::ServerRecord;

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct AckResponse {
    pub(crate) ok: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AutoregisterQuery {
    pub(crate) hostname: String,
    pub(crate) port: u16,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServersQuery {
    #[serde(default)]
    pub(crate) refresh: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PairQuery {
    pub(crate) server1_id: i64,
    pub(crate) server2_id: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct PairResponse {
    pub(crate) first: ServerRecord,
    pub(crate) second: ServerRecord,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FailureQuery {
    pub(crate) failed_server_id: i64,
    pub(crate) backup_server_id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NewItem {
    pub(crate) id: i64,
    pub(crate) name: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateResponse {
    pub(crate) created: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransferRequest {
    pub(crate) ids: Vec<i64>,
    pub(crate) destination: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusResponse {
    pub(crate) status: String,
    pub(crate) servers: usize,
    pub(crate) items: i64,
}
