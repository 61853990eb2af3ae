use super::{
    AckResponse, DeactivateQuery, OrchestratorQuery, PartnerQuery, UpdateResponse, WorkerState,
    error_status, parse_id_list, response_error,
};
use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use std::sync::Arc;
use tessio_core::{
    ActivateItemsOperationRequest, ActivateResponse, DeactivateItemsOperationRequest,
    DeactivateResponse, HeartbeatPing, InventoryItem, PrepareResponse, ServerRecord,
};

pub(crate) async fn heartbeat(
    State(state): State<Arc<WorkerState>>,
    Json(ping): Json<HeartbeatPing>,
) -> impl IntoResponse {
    tracing::debug!("Heartbeat received: partner={}", ping.server_id);
    if let Err(error) = state.registry.touch_heartbeat() {
        return response_error(error_status(&error), error.to_string());
    }
    Json(AckResponse { ok: true }).into_response()
}

pub(crate) async fn set_partner(
    State(state): State<Arc<WorkerState>>,
    Query(query): Query<PartnerQuery>,
) -> impl IntoResponse {
    if let Err(error) = state.registry.set_partner_id(query.partner_id) {
        return response_error(error_status(&error), error.to_string());
    }
    if let Err(error) = state.registry.set_in_backup(false) {
        return response_error(error_status(&error), error.to_string());
    }
    if let Err(error) = state.registry.touch_heartbeat() {
        return response_error(error_status(&error), error.to_string());
    }

    tracing::info!("Partner assignment updated: partner={:?}", query.partner_id);
    Json(AckResponse { ok: true }).into_response()
}

pub(crate) async fn set_orchestrator(
    State(state): State<Arc<WorkerState>>,
    Query(query): Query<OrchestratorQuery>,
) -> impl IntoResponse {
    let address = format!("{}:{}", query.ip_address, query.port);
    if let Err(error) = state.registry.set_orchestrator_address(&address) {
        return response_error(error_status(&error), error.to_string());
    }
    Json(AckResponse { ok: true }).into_response()
}

pub(crate) async fn sync_servers(
    State(state): State<Arc<WorkerState>>,
    Json(records): Json<Vec<ServerRecord>>,
) -> impl IntoResponse {
    if let Err(error) = state.servers.replace_all(&records) {
        return response_error(error_status(&error), error.to_string());
    }
    Json(AckResponse { ok: true }).into_response()
}

pub(crate) async fn deactivate(
    State(state): State<Arc<WorkerState>>,
    Query(query): Query<DeactivateQuery>,
) -> impl IntoResponse {
    let ids = match parse_id_list(&query.ids) {
        Ok(ids) => ids,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    let result = match state
        .deactivate_operation
        .run(DeactivateItemsOperationRequest {
            ids,
            new_location: query.new_location,
            send_data: query.send_data,
        })
        .await
    {
        Ok(result) => result,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(DeactivateResponse {
        deactivated: result.deactivated,
        clean: result.clean,
        rows: result.rows,
    })
    .into_response()
}

pub(crate) async fn activate(
    State(state): State<Arc<WorkerState>>,
    Json(ids): Json<Vec<i64>>,
) -> impl IntoResponse {
    let activated = match state
        .activate_operation
        .run(ActivateItemsOperationRequest { ids })
        .await
    {
        Ok(activated) => activated,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(ActivateResponse { activated }).into_response()
}

pub(crate) async fn receive_update(
    State(state): State<Arc<WorkerState>>,
    Json(rows): Json<Vec<InventoryItem>>,
) -> impl IntoResponse {
    let updated = match state.receive_update_operation.run(rows).await {
        Ok(updated) => updated,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(UpdateResponse { updated }).into_response()
}

pub(crate) async fn fingerprints(
    State(state): State<Arc<WorkerState>>,
    Json(ids): Json<Vec<i64>>,
) -> impl IntoResponse {
    let entries = match state.inventory.fingerprints(&ids) {
        Ok(entries) => entries,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(entries).into_response()
}

pub(crate) async fn prepare(
    State(state): State<Arc<WorkerState>>,
    Json(rows): Json<Vec<InventoryItem>>,
) -> impl IntoResponse {
    let accepted = match state.replication.accept_prepare(&rows) {
        Ok(accepted) => accepted,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(PrepareResponse { accepted }).into_response()
}

pub(crate) async fn apply(
    State(state): State<Arc<WorkerState>>,
    Json(ids): Json<Vec<i64>>,
) -> impl IntoResponse {
    if let Err(error) = state.replication.accept_apply(&ids) {
        return response_error(error_status(&error), error.to_string());
    }
    Json(AckResponse { ok: true }).into_response()
}

pub(crate) async fn abort(
    State(state): State<Arc<WorkerState>>,
    Json(ids): Json<Vec<i64>>,
) -> impl IntoResponse {
    if let Err(error) = state.replication.accept_abort(&ids) {
        return response_error(error_status(&error), error.to_string());
    }
    Json(AckResponse { ok: true }).into_response()
}

pub(crate) async fn reset(State(state): State<Arc<WorkerState>>) -> impl IntoResponse {
    let wiped = state
        .inventory
        .clear()
        .and_then(|_| state.servers.clear())
        .and_then(|_| state.registry.clear())
        .and_then(|_| state.activity.clear());

    if let Err(error) = wiped {
        return response_error(error_status(&error), error.to_string());
    }

    tracing::info!("Worker state reset");
    Json(AckResponse { ok: true }).into_response()
}
