use crate::cluster::PeerClient;
use crate::error::{Result, TessioError};
use crate::store::{InventoryItem, InventoryStore, NodeRegistry, ServerStore};
use std::sync::Arc;

/// Two-phase mirroring of inventory writes from a primary to its partner.
/// The partner stages the rows, then both sides promote them. Nothing is
/// visible to buyers until apply, so an abort leaves no trace.
pub struct ReplicationEngine {
    inventory: Arc<InventoryStore>,
    registry: Arc<NodeRegistry>,
    servers: Arc<ServerStore>,
    peers: Arc<PeerClient>,
}

impl ReplicationEngine {
    pub fn new(
        inventory: Arc<InventoryStore>,
        registry: Arc<NodeRegistry>,
        servers: Arc<ServerStore>,
        peers: Arc<PeerClient>,
    ) -> Self {
        Self {
            inventory,
            registry,
            servers,
            peers,
        }
    }

    /// Where mirrored rows go, if anywhere. A node standing in for its
    /// dead partner has nobody to mirror to and commits locally.
    fn partner_address(&self) -> Result<Option<String>> {
        if self.registry.in_backup()? {
            return Ok(None);
        }

        let partner_id = match self.registry.partner_id()? {
            Some(id) => id,
            None => return Ok(None),
        };

        match self.servers.get(partner_id)? {
            Some(record) => Ok(Some(format!("{}:{}", record.hostname, record.port))),
            None => Err(TessioError::PeerUnreachable(format!(
                "partner {} is not in the local server map",
                partner_id
            ))),
        }
    }

    /// Commits staged drafts, mirroring them to the partner first. If the
    /// partner cannot take the write, both sides abort and the caller sees
    /// the peer failure.
    pub async fn commit(&self, ids: &[i64], drafts: Vec<InventoryItem>) -> Result<()> {
        let address = match self.partner_address()? {
            Some(address) => address,
            None => {
                self.inventory.apply(ids)?;
                return Ok(());
            }
        };

        let mut replicas = drafts;
        for replica in &mut replicas {
            replica.on_backup = true;
        }

        if let Err(error) = self.mirror_to(&address, ids, &replicas).await {
            self.inventory.abort(ids)?;
            if let Err(abort_error) = self.peers.abort(&address, ids).await {
                tracing::warn!(
                    "Failed to abort mirrored transaction: partner={} error={}",
                    address,
                    abort_error
                );
            }
            return Err(TessioError::PeerUnreachable(error.to_string()));
        }

        self.inventory.apply(ids)?;
        Ok(())
    }

    async fn mirror_to(&self, address: &str, ids: &[i64], replicas: &[InventoryItem]) -> Result<()> {
        let accepted = self.peers.prepare(address, replicas).await?;
        if accepted.len() != ids.len() {
            return Err(TessioError::Internal(format!(
                "partner accepted {} of {} rows",
                accepted.len(),
                ids.len()
            )));
        }

        self.peers.apply(address, ids).await
    }

    pub fn accept_prepare(&self, rows: &[InventoryItem]) -> Result<Vec<i64>> {
        self.inventory.prepare_replica(rows)
    }

    pub fn accept_apply(&self, ids: &[i64]) -> Result<Vec<i64>> {
        self.inventory.apply(ids)
    }

    pub fn accept_abort(&self, ids: &[i64]) -> Result<()> {
        self.inventory.abort(ids)
    }
}
