use super::{
    AckResponse, CreateResponse, NewItem, OrchestratorState, PairQuery, PairResponse, ServersQuery,
    StatusResponse, TransferRequest, error_status, response_error,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use std::sync::Arc;
use tessio_core::{
    InventoryItem, PairServersOperationRequest, RefreshServerOperationRequest,
    TransferItemsOperationRequest,
};

pub(crate) async fn status(State(state): State<Arc<OrchestratorState>>) -> impl IntoResponse {
    let servers = match state.servers.list() {
        Ok(records) => records.len(),
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };
    let items = match state.inventory.count_committed() {
        Ok(count) => count,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(StatusResponse {
        status: "ok".to_string(),
        servers,
        items,
    })
    .into_response()
}

pub(crate) async fn list_servers(
    State(state): State<Arc<OrchestratorState>>,
    Query(query): Query<ServersQuery>,
) -> impl IntoResponse {
    if query.refresh {
        let records = match state.servers.list() {
            Ok(records) => records,
            Err(error) => return response_error(error_status(&error), error.to_string()),
        };
        for record in records {
            if let Err(error) = state
                .refresh_operation
                .run(RefreshServerOperationRequest {
                    server_id: record.id,
                })
                .await
            {
                tracing::warn!("Failed to refresh server: id={} error={}", record.id, error);
            }
        }
    }

    let records = match state.servers.list() {
        Ok(records) => records,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(records).into_response()
}

pub(crate) async fn get_server(
    State(state): State<Arc<OrchestratorState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let record = match state
        .refresh_operation
        .run(RefreshServerOperationRequest { server_id: id })
        .await
    {
        Ok(record) => record,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(record).into_response()
}

pub(crate) async fn sync_servers(State(state): State<Arc<OrchestratorState>>) -> impl IntoResponse {
    let fleet = match state.sync_operation.run().await {
        Ok(fleet) => fleet,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(fleet).into_response()
}

pub(crate) async fn pair(
    State(state): State<Arc<OrchestratorState>>,
    Query(query): Query<PairQuery>,
) -> impl IntoResponse {
    let result = match state
        .pair_operation
        .run(PairServersOperationRequest {
            server1_id: query.server1_id,
            server2_id: query.server2_id,
        })
        .await
    {
        Ok(result) => result,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(PairResponse {
        first: result.first,
        second: result.second,
    })
    .into_response()
}

pub(crate) async fn list_inventory(State(state): State<Arc<OrchestratorState>>) -> impl IntoResponse {
    let items = match state.inventory.list_committed() {
        Ok(items) => items,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(items).into_response()
}

/// Seeds new items into the orchestrator pool. They stay deactivated at
/// location 0 until a transfer hands them to a worker.
pub(crate) async fn create_inventory(
    State(state): State<Arc<OrchestratorState>>,
    Json(request): Json<Vec<NewItem>>,
) -> impl IntoResponse {
    if request.iter().any(|item| item.id <= 0) {
        return response_error(StatusCode::BAD_REQUEST, "item ids must be positive");
    }

    let now = Utc::now();
    let rows: Vec<InventoryItem> = request
        .into_iter()
        .map(|item| InventoryItem {
            id: item.id,
            committed: true,
            name: item.name,
            location: 0,
            activated: false,
            locked: false,
            on_backup: false,
            available: true,
            reserved_by: None,
            last_modified_by: 0,
            last_modified_at: now,
        })
        .collect();

    let created = match state.inventory.upsert(&rows) {
        Ok(created) => created,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    tracing::info!("Created inventory items: count={}", created);
    Json(CreateResponse { created }).into_response()
}

pub(crate) async fn get_item(
    State(state): State<Arc<OrchestratorState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let item = match state.inventory.get_committed(id) {
        Ok(Some(item)) => item,
        Ok(None) => {
            return response_error(StatusCode::NOT_FOUND, format!("item {} not found", id));
        }
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(item).into_response()
}

pub(crate) async fn transfer(
    State(state): State<Arc<OrchestratorState>>,
    Json(request): Json<TransferRequest>,
) -> impl IntoResponse {
    let plan = match state
        .transfer_operation
        .run(TransferItemsOperationRequest {
            ids: request.ids,
            destination: request.destination,
        })
        .await
    {
        Ok(plan) => plan,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(plan).into_response()
}

pub(crate) async fn reset(State(state): State<Arc<OrchestratorState>>) -> impl IntoResponse {
    let wiped = state
        .inventory
        .clear()
        .and_then(|_| state.servers.clear())
        .and_then(|_| state.reservations.clear())
        .and_then(|_| state.snapshots.clear())
        .and_then(|_| state.activity.clear());

    if let Err(error) = wiped {
        return response_error(error_status(&error), error.to_string());
    }

    tracing::info!("Orchestrator state reset");
    Json(AckResponse { ok: true }).into_response()
}
