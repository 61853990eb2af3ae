use crate::error::{Result, TessioError};
use crate::store::{ServerStatus, ServerStore};
use crate::transfer::{TransferEngine, TransferPlan};
use std::sync::Arc;

/// Admin-triggered rebalance: plans a move and queues the per-source
/// groups as background work. The plan is returned right away so the
/// caller can see what will move and what was skipped.
pub struct TransferItemsOperation {
    servers: Arc<ServerStore>,
    engine: Arc<TransferEngine>,
}

pub struct TransferItemsOperationRequest {
    pub ids: Vec<i64>,
    pub destination: i64,
}

impl TransferItemsOperation {
    pub fn new(servers: Arc<ServerStore>, engine: Arc<TransferEngine>) -> Self {
        Self { servers, engine }
    }

    pub async fn run(&self, request: TransferItemsOperationRequest) -> Result<TransferPlan> {
        if request.destination != 0 {
            let record = self.servers.require(request.destination)?;
            if record.status == ServerStatus::Disabled {
                return Err(TessioError::ServiceUnavailable(format!(
                    "server {} is disabled",
                    record.id
                )));
            }
        }

        let plan = self.engine.plan(&request.ids, request.destination)?;
        self.engine.dispatch(&plan, request.destination);
        Ok(plan)
    }
}
