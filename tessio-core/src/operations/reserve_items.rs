use crate::error::{Result, TessioError};
use crate::replication::ReplicationEngine;
use crate::store::{ActivityStore, InventoryStore, NodeRegistry, ServerStatus};
use std::collections::HashSet;
use std::sync::Arc;
use ulid::Ulid;

/// Soft-locks a set of items for a buyer. All requested items must still
/// be sellable; otherwise nothing is held and the unavailable ids are
/// reported back.
pub struct ReserveItemsOperation {
    inventory: Arc<InventoryStore>,
    registry: Arc<NodeRegistry>,
    replication: Arc<ReplicationEngine>,
    activity: Arc<ActivityStore>,
}

pub struct ReserveItemsOperationRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug)]
pub enum ReserveOutcome {
    Reserved {
        transaction_id: String,
        reserved: Vec<i64>,
    },
    Rejected {
        unavailable: Vec<i64>,
    },
}

impl ReserveItemsOperation {
    pub fn new(
        inventory: Arc<InventoryStore>,
        registry: Arc<NodeRegistry>,
        replication: Arc<ReplicationEngine>,
        activity: Arc<ActivityStore>,
    ) -> Self {
        Self {
            inventory,
            registry,
            replication,
            activity,
        }
    }

    pub async fn run(&self, request: ReserveItemsOperationRequest) -> Result<ReserveOutcome> {
        if self.registry.status()? == ServerStatus::Disabled {
            return Err(TessioError::ServiceUnavailable(
                "server is disabled".to_string(),
            ));
        }
        if request.ids.is_empty() {
            return Err(TessioError::InvalidRequest(
                "no items requested".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let ids: Vec<i64> = request
            .ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();

        let transaction_id = Ulid::new().to_string();
        let server_id = self.registry.server_id()?.ok_or_else(|| {
            TessioError::ServiceUnavailable("server is not registered yet".to_string())
        })?;

        let prepared = self
            .inventory
            .prepare_reserve(&ids, &transaction_id, server_id, server_id)?;
        if !prepared.missed.is_empty() {
            let held: Vec<i64> = prepared.drafts.iter().map(|draft| draft.id).collect();
            self.inventory.abort(&held)?;
            return Ok(ReserveOutcome::Rejected {
                unavailable: prepared.missed,
            });
        }

        self.replication.commit(&ids, prepared.drafts).await?;

        self.activity.note(
            server_id,
            "reserve",
            &format!("transaction {} reserved {} items", transaction_id, ids.len()),
        );

        Ok(ReserveOutcome::Reserved {
            transaction_id,
            reserved: ids,
        })
    }
}
