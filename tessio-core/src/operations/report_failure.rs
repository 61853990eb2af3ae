use crate::cluster::PeerClient;
use crate::error::{Result, TessioError};
use crate::store::{ActivityStore, InventoryStore, ServerStatus, ServerStore, SnapshotStore};
use crate::transfer::CHUNK_SIZE;
use std::sync::Arc;

/// Decides which survivor of a broken pair takes over. Authority goes to
/// the first eligible reporter; everyone else is denied and must stand
/// down. Before granting, the backup's current fingerprints are captured
/// so the dead node's later recovery can tell whether anything changed.
pub struct ReportFailureOperation {
    servers: Arc<ServerStore>,
    inventory: Arc<InventoryStore>,
    snapshots: Arc<SnapshotStore>,
    peers: Arc<PeerClient>,
    activity: Arc<ActivityStore>,
}

pub struct ReportFailureOperationRequest {
    pub failed_server_id: i64,
    pub backup_server_id: i64,
}

pub enum FailureOutcome {
    Granted { items: usize },
    Denied { reason: String },
}

impl ReportFailureOperation {
    pub fn new(
        servers: Arc<ServerStore>,
        inventory: Arc<InventoryStore>,
        snapshots: Arc<SnapshotStore>,
        peers: Arc<PeerClient>,
        activity: Arc<ActivityStore>,
    ) -> Self {
        Self {
            servers,
            inventory,
            snapshots,
            peers,
            activity,
        }
    }

    pub async fn run(&self, request: ReportFailureOperationRequest) -> Result<FailureOutcome> {
        if request.failed_server_id == request.backup_server_id {
            return self.deny("a server cannot back itself up");
        }

        let backup = self.servers.require(request.backup_server_id)?;
        let failed = self.servers.require(request.failed_server_id)?;

        if backup.status == ServerStatus::Disabled {
            return self.deny("reporting server is disabled");
        }
        if let Some(standing_in_for) = self.snapshots.backup_duty(backup.id)? {
            return self.deny(&format!(
                "server {} is already standing in for server {}",
                backup.id, standing_in_for
            ));
        }
        // A reporter with no recorded partner counts as a first-time claim.
        if failed.partner_id != Some(backup.id) && backup.partner_id.is_some() {
            return self.deny("servers are not partners");
        }

        let ids = self.inventory.ids_at_location(request.failed_server_id)?;
        let backup_address = format!("{}:{}", backup.hostname, backup.port);

        let mut entries = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(CHUNK_SIZE) {
            let fetched = self
                .peers
                .fetch_fingerprints(&backup_address, chunk)
                .await
                .map_err(|error| TessioError::PeerUnreachable(error.to_string()))?;
            entries.extend(fetched);
        }
        self.snapshots
            .save(request.failed_server_id, backup.id, &entries)?;

        self.servers
            .set_status(request.failed_server_id, ServerStatus::Disabled)?;
        self.servers.set_partner(backup.id, None)?;
        self.servers.set_status(backup.id, ServerStatus::Standalone)?;

        self.inventory
            .adopt_from(request.failed_server_id, backup.id, 0)?;

        self.activity.note(
            0,
            "failover_grant",
            &format!(
                "server {} took over {} items from server {}",
                backup.id,
                ids.len(),
                request.failed_server_id
            ),
        );

        Ok(FailureOutcome::Granted { items: ids.len() })
    }

    fn deny(&self, reason: &str) -> Result<FailureOutcome> {
        self.activity.note(0, "failover_deny", reason);
        Ok(FailureOutcome::Denied {
            reason: reason.to_string(),
        })
    }
}
