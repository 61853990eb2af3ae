use crate::config::Config;
use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use std::sync::Arc;
use tessio_core::{
    ActivateItemsOperation, ActivityStore, DeactivateItemsOperation, FailureDetector,
    HeartbeatLoop, InventoryStore, NodeRegistry, PeerClient, PurchaseItemsOperation,
    ReceiveUpdateOperation, RecoveryOutcomeKind, ReplicationEngine, ReserveItemsOperation, Result,
    ServerStatus, ServerStore, StoreHandle, TessioError,
};
use tokio::net::TcpListener;

mod external;
mod internal;
mod types;

use external::{
    disable, enable, get_item, list_inventory, list_servers, orchestrator_inventory,
    orchestrator_servers, payment, register_with_orchestrator, reserve, status,
};
use internal::{
    abort, activate, apply, deactivate, fingerprints, heartbeat, prepare, receive_update, reset,
    set_orchestrator, set_partner, sync_servers,
};
pub(crate) use types::*;

pub struct WorkerState {
    pub(crate) config: Config,
    pub(crate) registry: Arc<NodeRegistry>,
    pub(crate) inventory: Arc<InventoryStore>,
    pub(crate) servers: Arc<ServerStore>,
    pub(crate) activity: Arc<ActivityStore>,
    pub(crate) peers: Arc<PeerClient>,
    pub(crate) replication: Arc<ReplicationEngine>,
    pub(crate) deactivate_operation: DeactivateItemsOperation,
    pub(crate) activate_operation: ActivateItemsOperation,
    pub(crate) receive_update_operation: ReceiveUpdateOperation,
    pub(crate) reserve_operation: ReserveItemsOperation,
    pub(crate) purchase_operation: PurchaseItemsOperation,
}

pub async fn run_server(config: Config) -> Result<()> {
    let handle = StoreHandle::open(&config.node.data_dir)?;
    let registry = Arc::new(NodeRegistry::new(handle.clone())?);
    let inventory = Arc::new(InventoryStore::new(handle.clone())?);
    let servers = Arc::new(ServerStore::new(handle.clone())?);
    let activity = Arc::new(ActivityStore::new(handle)?);
    let peers = Arc::new(PeerClient::new()?);

    let replication = Arc::new(ReplicationEngine::new(
        inventory.clone(),
        registry.clone(),
        servers.clone(),
        peers.clone(),
    ));

    let state = Arc::new(WorkerState {
        deactivate_operation: DeactivateItemsOperation::new(inventory.clone(), registry.clone()),
        activate_operation: ActivateItemsOperation::new(inventory.clone(), registry.clone()),
        receive_update_operation: ReceiveUpdateOperation::new(inventory.clone()),
        reserve_operation: ReserveItemsOperation::new(
            inventory.clone(),
            registry.clone(),
            replication.clone(),
            activity.clone(),
        ),
        purchase_operation: PurchaseItemsOperation::new(
            inventory.clone(),
            registry.clone(),
            replication.clone(),
            activity.clone(),
        ),
        config,
        registry,
        inventory,
        servers,
        activity,
        peers,
        replication,
    });

    if let Some(endpoint) = &state.config.orchestrator {
        state.registry.set_orchestrator_address(&endpoint.address)?;
    }

    match state.registry.server_id()? {
        None => {
            if let Err(error) = announce(&state).await {
                tracing::warn!("Failed to register with orchestrator: {}", error);
            }
        }
        Some(server_id) => {
            if let Err(error) = recover_on_boot(&state, server_id).await {
                tracing::warn!("Recovery on boot failed: {}", error);
            }
        }
    }
    state.registry.touch_heartbeat()?;

    let heartbeat_loop = HeartbeatLoop::new(
        state.registry.clone(),
        state.servers.clone(),
        state.peers.clone(),
    );
    tokio::spawn(heartbeat_loop.run());

    let detector = FailureDetector::new(
        state.registry.clone(),
        state.servers.clone(),
        state.inventory.clone(),
        state.activity.clone(),
        state.peers.clone(),
    );
    tokio::spawn(detector.run());

    let bind_addr = state.config.bind_addr();
    let app = Router::new()
        .route("/status", get(status))
        .route("/enable", put(enable))
        .route("/disable", put(disable))
        .route("/heartbeat", put(heartbeat))
        .route("/partner", put(set_partner))
        .route("/orchestrator", put(set_orchestrator))
        .route("/orchestrator/register", post(register_with_orchestrator))
        .route("/orchestrator/servers", get(orchestrator_servers))
        .route("/orchestrator/inventory", get(orchestrator_inventory))
        .route("/servers", get(list_servers))
        .route("/servers/sync", put(sync_servers))
        .route("/inventory", get(list_inventory))
        .route("/inventory/:id", get(get_item))
        .route("/inventory/deactivate", put(deactivate))
        .route("/inventory/activate", put(activate))
        .route("/inventory/update", put(receive_update))
        .route("/inventory/fingerprints", post(fingerprints))
        .route("/inventory/buy/reserve", post(reserve))
        .route("/inventory/buy/payment", post(payment))
        .route("/inventory/prepare", put(prepare))
        .route("/inventory/apply", put(apply))
        .route("/inventory/abort", put(abort))
        .route("/reset", put(reset))
        .with_state(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Tessio worker listening on {}", bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|error| TessioError::Http(error.to_string()))?;

    Ok(())
}

/// First boot against a configured orchestrator: pick up a server id.
/// Failure is logged, not fatal, so an operator can still attach the
/// worker later through its registration endpoint.
async fn announce(state: &WorkerState) -> Result<()> {
    let Some(orchestrator) = state.registry.orchestrator_address()? else {
        return Ok(());
    };

    let record = state
        .peers
        .autoregister(
            &orchestrator,
            &state.config.node.hostname,
            state.config.node.port,
        )
        .await?;
    state.registry.set_server_id(record.id)?;
    tracing::info!("Registered with orchestrator: server_id={}", record.id);
    Ok(())
}

/// A worker that already has an identity went down at some point, so it
/// asks the orchestrator to fold it back in before serving traffic. Rows
/// parked locally at the pool were relinquished during a stand-down and
/// are offered back.
async fn recover_on_boot(state: &WorkerState, server_id: i64) -> Result<()> {
    let Some(orchestrator) = state.registry.orchestrator_address()? else {
        return Ok(());
    };

    let relinquished = state.inventory.ids_at_location(0)?;
    let response = state
        .peers
        .initiate_recovery(&orchestrator, server_id, &relinquished)
        .await?;

    state.registry.set_status(ServerStatus::Active)?;
    state.registry.set_in_backup(false)?;
    state.registry.touch_heartbeat()?;

    match response.outcome {
        RecoveryOutcomeKind::Repaired => {
            tracing::info!(
                "Rejoined the fleet with former partner: restored={}",
                response.restored
            );
        }
        RecoveryOutcomeKind::Standalone => {
            tracing::info!(
                "Rejoined the fleet standalone: restored={}",
                response.restored
            );
        }
    }
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

pub(crate) fn parse_id_list(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<i64>()
                .map_err(|_| TessioError::InvalidRequest(format!("invalid item id '{}'", token)))
        })
        .collect()
}
