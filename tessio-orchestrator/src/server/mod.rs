use crate::config::Config;
use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use std::sync::Arc;
use tessio_core::{
    ActivityStore, InitiateRecoveryOperation, InventoryStore, PairServersOperation, PeerClient,
    RefreshServerOperation, RegisterServerOperation, ReportFailureOperation, ReservationStore,
    Result, ServerStore, SnapshotStore, StoreHandle, SyncServersOperation, TaskQueue, TessioError,
    TransferEngine, TransferItemsOperation,
};
use tokio::net::TcpListener;

mod external;
mod internal;
mod types;

use external::{
    create_inventory, get_item, get_server, list_inventory, list_servers, pair, reset, status,
    sync_servers, transfer,
};
use internal::{autoregister, failure, initiate_recovery};
pub(crate) use types::*;

pub struct OrchestratorState {
    pub(crate) servers: Arc<ServerStore>,
    pub(crate) inventory: Arc<InventoryStore>,
    pub(crate) reservations: Arc<ReservationStore>,
    pub(crate) snapshots: Arc<SnapshotStore>,
    pub(crate) activity: Arc<ActivityStore>,
    pub(crate) register_operation: RegisterServerOperation,
    pub(crate) refresh_operation: RefreshServerOperation,
    pub(crate) sync_operation: SyncServersOperation,
    pub(crate) pair_operation: PairServersOperation,
    pub(crate) transfer_operation: TransferItemsOperation,
    pub(crate) failure_operation: ReportFailureOperation,
    pub(crate) recovery_operation: InitiateRecoveryOperation,
}

pub async fn run_server(config: Config) -> Result<()> {
    let handle = StoreHandle::open(&config.node.data_dir)?;
    let servers = Arc::new(ServerStore::new(handle.clone())?);
    let inventory = Arc::new(InventoryStore::new(handle.clone())?);
    let reservations = Arc::new(ReservationStore::new(handle.clone())?);
    let snapshots = Arc::new(SnapshotStore::new(handle.clone())?);
    let activity = Arc::new(ActivityStore::new(handle)?);
    let peers = Arc::new(PeerClient::new()?);
    let tasks = Arc::new(TaskQueue::new(config.tasks.max_concurrent));

    let engine = Arc::new(TransferEngine::new(
        inventory.clone(),
        servers.clone(),
        reservations.clone(),
        activity.clone(),
        peers.clone(),
        tasks,
    ));

    let state = Arc::new(OrchestratorState {
        register_operation: RegisterServerOperation::new(
            servers.clone(),
            peers.clone(),
            activity.clone(),
        ),
        refresh_operation: RefreshServerOperation::new(servers.clone(), peers.clone()),
        sync_operation: SyncServersOperation::new(servers.clone(), peers.clone()),
        pair_operation: PairServersOperation::new(
            servers.clone(),
            inventory.clone(),
            peers.clone(),
            engine.clone(),
            activity.clone(),
        ),
        transfer_operation: TransferItemsOperation::new(servers.clone(), engine.clone()),
        failure_operation: ReportFailureOperation::new(
            servers.clone(),
            inventory.clone(),
            snapshots.clone(),
            peers.clone(),
            activity.clone(),
        ),
        recovery_operation: InitiateRecoveryOperation::new(
            servers.clone(),
            inventory.clone(),
            snapshots.clone(),
            peers,
            engine,
            activity.clone(),
        ),
        servers,
        inventory,
        reservations,
        snapshots,
        activity,
    });

    let bind_addr = config.bind_addr();
    let app = Router::new()
        .route("/status", get(status))
        .route("/autoregister", post(autoregister))
        .route("/servers", get(list_servers))
        .route("/servers/sync", put(sync_servers))
        .route("/servers/:id", get(get_server))
        .route("/pair", put(pair))
        .route("/inventory", get(list_inventory).post(create_inventory))
        .route("/inventory/:id", get(get_item))
        .route("/inventory/transfer", put(transfer))
        .route("/failure", put(failure))
        .route("/initiate-recovery", put(initiate_recovery))
        .route("/reset", put(reset))
        .with_state(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Tessio orchestrator listening on {}", bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|error| TessioError::Http(error.to_string()))?;

    Ok(())
}

pub(crate) fn response_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

pub(crate) fn error_status(error: &TessioError) -> StatusCode {
    match error {
        TessioError::PeerUnreachable(_) => StatusCode::BAD_GATEWAY,
        TessioError::AuthorityDenied(_) => StatusCode::UNAUTHORIZED,
        TessioError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        TessioError::NotFound(_) => StatusCode::NOT_FOUND,
        TessioError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
