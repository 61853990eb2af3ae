use crate::error::{Result, TessioError};
use crate::store::{InventoryStore, NodeRegistry};
use std::sync::Arc;

/// Brings delivered rows into service. Rows stamped with this node's id
/// (or parked at the pool) become served items; rows stamped with the
/// partner's id are backup copies and only get their activation flag.
pub struct ActivateItemsOperation {
    inventory: Arc<InventoryStore>,
    registry: Arc<NodeRegistry>,
}

pub struct ActivateItemsOperationRequest {
    pub ids: Vec<i64>,
}

impl ActivateItemsOperation {
    pub fn new(inventory: Arc<InventoryStore>, registry: Arc<NodeRegistry>) -> Self {
        Self {
            inventory,
            registry,
        }
    }

    pub async fn run(&self, request: ActivateItemsOperationRequest) -> Result<Vec<i64>> {
        let server_id = self.registry.server_id()?.ok_or_else(|| {
            TessioError::ServiceUnavailable("server is not registered yet".to_string())
        })?;
        let partner_id = self.registry.partner_id()?;

        self.inventory
            .activate(&request.ids, server_id, partner_id, server_id)
    }
}
