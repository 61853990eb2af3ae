use crate::error::{Result, TessioError};
use crate::store::{DeactivationResult, InventoryItem, InventoryStore, NodeRegistry};
use std::sync::Arc;

/// Takes locally owned rows out of service ahead of a transfer. The rows
/// are restamped with their next location; callers that want to carry the
/// row images away ask for them with `send_data`.
pub struct DeactivateItemsOperation {
    inventory: Arc<InventoryStore>,
    registry: Arc<NodeRegistry>,
}

pub struct DeactivateItemsOperationRequest {
    pub ids: Vec<i64>,
    pub new_location: i64,
    pub send_data: bool,
}

#[derive(Debug)]
pub struct DeactivateItemsOperationResult {
    pub deactivated: Vec<i64>,
    pub clean: Vec<i64>,
    pub rows: Option<Vec<InventoryItem>>,
}

impl DeactivateItemsOperation {
    pub fn new(inventory: Arc<InventoryStore>, registry: Arc<NodeRegistry>) -> Self {
        Self {
            inventory,
            registry,
        }
    }

    pub async fn run(
        &self,
        request: DeactivateItemsOperationRequest,
    ) -> Result<DeactivateItemsOperationResult> {
        let server_id = self.registry.server_id()?.ok_or_else(|| {
            TessioError::ServiceUnavailable("server is not registered yet".to_string())
        })?;

        let DeactivationResult { deactivated, clean } = self.inventory.deactivate(
            &request.ids,
            server_id,
            request.new_location,
            server_id,
        )?;

        let rows = if request.send_data {
            Some(self.inventory.rows_for(&deactivated)?)
        } else {
            None
        };

        Ok(DeactivateItemsOperationResult {
            deactivated,
            clean,
            rows,
        })
    }
}
