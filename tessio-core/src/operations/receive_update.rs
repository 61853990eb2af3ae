use crate::error::Result;
use crate::store::{InventoryItem, InventoryStore};
use std::sync::Arc;

/// Stores row images pushed by the orchestrator or a peer during a
/// transfer. Rows arrive deactivated and become visible to buyers only
/// after the follow-up activate call.
pub struct ReceiveUpdateOperation {
    inventory: Arc<InventoryStore>,
}

impl ReceiveUpdateOperation {
    pub fn new(inventory: Arc<InventoryStore>) -> Self {
        Self { inventory }
    }

    pub async fn run(&self, rows: Vec<InventoryItem>) -> Result<usize> {
        self.inventory.upsert(&rows)
    }
}
