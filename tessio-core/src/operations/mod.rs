//! One struct per externally triggered operation. Handlers stay thin and
//! delegate here; each operation owns its stores and talks to peers
//! through the shared client.

pub mod activate_items;
pub mod deactivate_items;
pub mod initiate_recovery;
pub mod pair_servers;
pub mod purchase_items;
pub mod receive_update;
pub mod refresh_server;
pub mod register_server;
pub mod report_failure;
pub mod reserve_items;
pub mod sync_servers;
pub mod transfer_items;

pub use activate_items::{ActivateItemsOperation, ActivateItemsOperationRequest};
pub use deactivate_items::{
    DeactivateItemsOperation, DeactivateItemsOperationRequest, DeactivateItemsOperationResult,
};
pub use initiate_recovery::{
    InitiateRecoveryOperation, InitiateRecoveryOperationRequest, RecoveryOutcome,
};
pub use pair_servers::{
    PairServersOperation, PairServersOperationRequest, PairServersOperationResult,
};
pub use purchase_items::{
    PurchaseItemsOperation, PurchaseItemsOperationRequest, PurchaseOutcome, PurchaseReceipt,
};
pub use receive_update::ReceiveUpdateOperation;
pub use refresh_server::{RefreshServerOperation, RefreshServerOperationRequest};
pub use register_server::{RegisterServerOperation, RegisterServerOperationRequest};
pub use report_failure::{FailureOutcome, ReportFailureOperation, ReportFailureOperationRequest};
pub use reserve_items::{ReserveItemsOperation, ReserveItemsOperationRequest, ReserveOutcome};
pub use sync_servers::SyncServersOperation;
pub use transfer_items::{TransferItemsOperation, TransferItemsOperationRequest};
