use crate::cluster::PeerClient;
use crate::error::{Result, TessioError};
use crate::store::{ServerRecord, ServerStatus, ServerStore};
use std::sync::Arc;

/// Polls a worker for its live status and folds the answer back into the
/// fleet table. A healthy worker without a partner shows as standalone.
pub struct RefreshServerOperation {
    servers: Arc<ServerStore>,
    peers: Arc<PeerClient>,
}

pub struct RefreshServerOperationRequest {
    pub server_id: i64,
}

impl RefreshServerOperation {
    pub fn new(servers: Arc<ServerStore>, peers: Arc<PeerClient>) -> Self {
        Self { servers, peers }
    }

    pub async fn run(&self, request: RefreshServerOperationRequest) -> Result<ServerRecord> {
        let record = self.servers.require(request.server_id)?;
        let address = format!("{}:{}", record.hostname, record.port);

        let reported = self
            .peers
            .fetch_status(&address)
            .await
            .map_err(|error| TessioError::PeerUnreachable(error.to_string()))?;

        let status = if reported.status == ServerStatus::Active && record.partner_id.is_none() {
            ServerStatus::Standalone
        } else {
            reported.status
        };
        self.servers.set_status(record.id, status)?;

        self.servers.require(record.id)
    }
}
