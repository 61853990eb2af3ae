use crate::cluster::PeerClient;
use crate::error::Result;
use crate::store::{ServerRecord, ServerStore};
use std::sync::Arc;

/// Pushes the authoritative server map to every worker. Unreachable
/// workers are skipped; they pick up the map on their next sync.
pub struct SyncServersOperation {
    servers: Arc<ServerStore>,
    peers: Arc<PeerClient>,
}

impl SyncServersOperation {
    pub fn new(servers: Arc<ServerStore>, peers: Arc<PeerClient>) -> Self {
        Self { servers, peers }
    }

    pub async fn run(&self) -> Result<Vec<ServerRecord>> {
        let fleet = self.servers.list()?;
        for target in &fleet {
            let address = format!("{}:{}", target.hostname, target.port);
            if let Err(error) = self.peers.push_servers(&address, &fleet).await {
                tracing::warn!(
                    "Failed to push server map: target={} error={}",
                    target.id,
                    error
                );
            }
        }

        Ok(fleet)
    }
}
