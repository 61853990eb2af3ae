use crate::error::{Result, TessioError};
use crate::replication::ReplicationEngine;
use crate::store::{ActivityStore, InventoryStore, NodeRegistry, ServerStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Completes a reservation: the reserved rows become sold and the
/// reservation is consumed. Only the last four card digits survive
/// anywhere, receipt and audit trail included.
pub struct PurchaseItemsOperation {
    inventory: Arc<InventoryStore>,
    registry: Arc<NodeRegistry>,
    replication: Arc<ReplicationEngine>,
    activity: Arc<ActivityStore>,
}

pub struct PurchaseItemsOperationRequest {
    pub transaction_id: String,
    pub credit_card_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub transaction_id: String,
    pub item_ids: Vec<i64>,
    pub card_last4: String,
    pub purchased_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum PurchaseOutcome {
    Purchased { receipt: PurchaseReceipt },
    UnknownTransaction,
}

impl PurchaseItemsOperation {
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

    pub async fn run(&self, request: PurchaseItemsOperationRequest) -> Result<PurchaseOutcome> {
        if self.registry.status()? == ServerStatus::Disabled {
            return Err(TessioError::ServiceUnavailable(
                "server is disabled".to_string(),
            ));
        }

        let card_last4 = mask_card(&request.credit_card_number)?;

        let ids = self.inventory.reserved_ids(&request.transaction_id)?;
        if ids.is_empty() {
            return Ok(PurchaseOutcome::UnknownTransaction);
        }

        let actor = self.registry.server_id()?.unwrap_or(0);
        let prepared = self
            .inventory
            .prepare_purchase(&request.transaction_id, actor)?;
        if !prepared.missed.is_empty() {
            let held: Vec<i64> = prepared.drafts.iter().map(|draft| draft.id).collect();
            self.inventory.abort(&held)?;
            return Err(TessioError::ServiceUnavailable(
                "reservation is contended, retry shortly".to_string(),
            ));
        }

        self.replication.commit(&ids, prepared.drafts).await?;

        self.activity.note(
            actor,
            "purchase",
            &format!(
                "transaction {} purchased {} items, card ending {}",
                request.transaction_id,
                ids.len(),
                card_last4
            ),
        );

        Ok(PurchaseOutcome::Purchased {
            receipt: PurchaseReceipt {
                transaction_id: request.transaction_id,
                item_ids: ids,
                card_last4,
                purchased_at: Utc::now(),
            },
        })
    }
}

fn mask_card(card_number: &str) -> Result<String> {
    let digits: Vec<char> = card_number.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return Err(TessioError::InvalidRequest(
            "credit card number is invalid".to_string(),
        ));
    }

    Ok(digits[digits.len() - 4..].iter().collect())
}
