use crate::cluster::PeerClient;
use crate::error::{Result, TessioError};
use crate::store::{ActivityStore, InventoryStore, NodeRegistry, ServerStatus, ServerStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
const DETECT_INTERVAL: Duration = Duration::from_secs(5);
const HEARTBEAT_TIMEOUT_SECS: i64 = 15;

/// Periodically pings the partner so its failure detector stays quiet.
pub struct HeartbeatLoop {
    registry: Arc<NodeRegistry>,
    servers: Arc<ServerStore>,
    peers: Arc<PeerClient>,
}

impl HeartbeatLoop {
    pub fn new(
        registry: Arc<NodeRegistry>,
        servers: Arc<ServerStore>,
        peers: Arc<PeerClient>,
    ) -> Self {
        Self {
            registry,
            servers,
            peers,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(error) = self.beat().await {
                tracing::warn!("Heartbeat failed: error={}", error);
            }
        }
    }

    async fn beat(&self) -> Result<()> {
        if self.registry.status()? == ServerStatus::Disabled || self.registry.in_backup()? {
            return Ok(());
        }

        let server_id = match self.registry.server_id()? {
            Some(id) => id,
            None => return Ok(()),
        };
        let partner_id = match self.registry.partner_id()? {
            Some(id) => id,
            None => return Ok(()),
        };
        let partner = match self.servers.get(partner_id)? {
            Some(record) => record,
            None => return Ok(()),
        };

        self.peers
            .heartbeat(&format!("{}:{}", partner.hostname, partner.port), server_id)
            .await
    }
}

/// Watches the partner's heartbeats. When they stop, asks the
/// orchestrator for authority over the partner's items; if refused, the
/// partner already took over, so this node steps aside and rejoins.
pub struct FailureDetector {
    registry: Arc<NodeRegistry>,
    servers: Arc<ServerStore>,
    inventory: Arc<InventoryStore>,
    activity: Arc<ActivityStore>,
    peers: Arc<PeerClient>,
}

impl FailureDetector {
    pub fn new(
        registry: Arc<NodeRegistry>,
        servers: Arc<ServerStore>,
        inventory: Arc<InventoryStore>,
        activity: Arc<ActivityStore>,
        peers: Arc<PeerClient>,
    ) -> Self {
        Self {
            registry,
            servers,
            inventory,
            activity,
            peers,
        }
    }

    pub async fn run(self) {
        if let Err(error) = self.registry.touch_heartbeat() {
            tracing::warn!("Failed to seed heartbeat baseline: error={}", error);
        }

        let mut ticker = tokio::time::interval(DETECT_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(error) = self.check().await {
                tracing::warn!("Failure check errored: error={}", error);
            }
        }
    }

    async fn check(&self) -> Result<()> {
        if self.registry.status()? == ServerStatus::Disabled || self.registry.in_backup()? {
            return Ok(());
        }

        let partner_id = match self.registry.partner_id()? {
            Some(id) => id,
            None => return Ok(()),
        };
        let server_id = match self.registry.server_id()? {
            Some(id) => id,
            None => return Ok(()),
        };

        let last_seen = match self.registry.last_heartbeat()? {
            Some(at) => at,
            None => {
                self.registry.touch_heartbeat()?;
                return Ok(());
            }
        };

        let elapsed = Utc::now() - last_seen;
        if elapsed < chrono::Duration::seconds(HEARTBEAT_TIMEOUT_SECS) {
            return Ok(());
        }

        tracing::warn!(
            "Partner heartbeat timed out: partner={} elapsed={}s",
            partner_id,
            elapsed.num_seconds()
        );

        let orchestrator = match self.registry.orchestrator_address()? {
            Some(address) => address,
            None => return Ok(()),
        };

        match self
            .peers
            .report_failure(&orchestrator, partner_id, server_id)
            .await
        {
            Ok(()) => {
                self.registry.set_in_backup(true)?;
                let adopted = self.inventory.adopt_from(partner_id, server_id, server_id)?;
                self.activity.note(
                    server_id,
                    "failover_adopt",
                    &format!("took over {} items from server {}", adopted.len(), partner_id),
                );
                tracing::info!(
                    "Assumed failed partner's items: partner={} adopted={}",
                    partner_id,
                    adopted.len()
                );
                Ok(())
            }
            Err(TessioError::AuthorityDenied(reason)) => {
                tracing::info!("Failover denied, standing down: reason={}", reason);
                self.stand_down(server_id, &orchestrator).await
            }
            Err(error) => {
                tracing::warn!("Failure report not delivered: error={}", error);
                Ok(())
            }
        }
    }

    /// The orchestrator sided with the partner, meaning this node was the
    /// one presumed dead. Give up the items, hand them back through the
    /// orchestrator, and rejoin with whatever role it assigns.
    async fn stand_down(&self, server_id: i64, orchestrator: &str) -> Result<()> {
        self.registry.set_status(ServerStatus::Disabled)?;
        let relinquished = self.inventory.relinquish_owned(server_id, server_id)?;
        self.activity.note(
            server_id,
            "stand_down",
            &format!("parked {} items for re-homing", relinquished.len()),
        );

        let outcome = self
            .peers
            .initiate_recovery(orchestrator, server_id, &relinquished)
            .await;

        self.registry.set_status(ServerStatus::Active)?;
        self.registry.set_in_backup(false)?;
        self.registry.touch_heartbeat()?;

        let response = outcome?;
        tracing::info!(
            "Re-entered the fleet after standing down: outcome={:?} restored={}",
            response.outcome,
            response.restored
        );
        Ok(())
    }
}
