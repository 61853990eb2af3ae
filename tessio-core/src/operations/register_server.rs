use crate::cluster::PeerClient;
use crate::error::Result;
use crate::store::{ActivityStore, ServerRecord, ServerStore};
use std::sync::Arc;

/// Adds a worker to the fleet and pushes the refreshed server map to
/// every registered node.
pub struct RegisterServerOperation {
    servers: Arc<ServerStore>,
    peers: Arc<PeerClient>,
    activity: Arc<ActivityStore>,
}

pub struct RegisterServerOperationRequest {
    pub hostname: String,
    pub port: u16,
}

impl RegisterServerOperation {
    pub fn new(
        servers: Arc<ServerStore>,
        peers: Arc<PeerClient>,
        activity: Arc<ActivityStore>,
    ) -> Self {
        Self {
            servers,
            peers,
            activity,
        }
    }

    pub async fn run(&self, request: RegisterServerOperationRequest) -> Result<ServerRecord> {
        // A node re-announcing itself keeps its identity; only first-time
        // registrations grow the fleet and trigger a map push.
        if let Some(existing) = self
            .servers
            .find_by_address(&request.hostname, request.port)?
        {
            return Ok(existing);
        }

        let record = self.servers.register(&request.hostname, request.port)?;

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

        self.activity.note(
            0,
            "register",
            &format!("server {} joined at {}:{}", record.id, record.hostname, record.port),
        );

        Ok(record)
    }
}
