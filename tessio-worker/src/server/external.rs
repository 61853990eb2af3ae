use super::{
    AckResponse, PaymentRequest, RegisterQuery, RegisterResponse, RejectedResponse, ReserveRequest,
    ReserveResponse, WorkerState, error_status, response_error,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use std::sync::Arc;
use tessio_core::{
    PurchaseItemsOperationRequest, PurchaseOutcome, ReserveItemsOperationRequest, ReserveOutcome,
    Result, ServerStatus, WorkerStatusResponse,
};

pub(crate) async fn status(State(state): State<Arc<WorkerState>>) -> impl IntoResponse {
    let payload = match build_status(&state) {
        Ok(payload) => payload,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(payload).into_response()
}

fn build_status(state: &WorkerState) -> Result<WorkerStatusResponse> {
    let server_id = state.registry.server_id()?;
    let items = match server_id {
        Some(id) => state.inventory.ids_at_location(id)?.len() as i64,
        None => 0,
    };

    Ok(WorkerStatusResponse {
        status: state.registry.status()?,
        server_id,
        partner_id: state.registry.partner_id()?,
        in_backup: state.registry.in_backup()?,
        items,
    })
}

pub(crate) async fn enable(State(state): State<Arc<WorkerState>>) -> impl IntoResponse {
    if let Err(error) = state.registry.set_status(ServerStatus::Active) {
        return response_error(error_status(&error), error.to_string());
    }
    if let Err(error) = state.registry.touch_heartbeat() {
        return response_error(error_status(&error), error.to_string());
    }
    Json(AckResponse { ok: true }).into_response()
}

pub(crate) async fn disable(State(state): State<Arc<WorkerState>>) -> impl IntoResponse {
    if let Err(error) = state.registry.set_status(ServerStatus::Disabled) {
        return response_error(error_status(&error), error.to_string());
    }
    Json(AckResponse { ok: true }).into_response()
}

pub(crate) async fn list_servers(State(state): State<Arc<WorkerState>>) -> impl IntoResponse {
    let records = match state.servers.list() {
        Ok(records) => records,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(records).into_response()
}

pub(crate) async fn list_inventory(State(state): State<Arc<WorkerState>>) -> impl IntoResponse {
    let items = match state.inventory.list_committed() {
        Ok(items) => items,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(items).into_response()
}

pub(crate) async fn get_item(
    State(state): State<Arc<WorkerState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let server_id = match state.registry.server_id() {
        Ok(Some(server_id)) => server_id,
        Ok(None) => {
            return response_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "server is not registered yet",
            );
        }
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    let item = match state.inventory.get_committed(id) {
        Ok(Some(item)) => item,
        Ok(None) => {
            return response_error(StatusCode::NOT_FOUND, format!("item {} not found", id));
        }
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    if item.location != server_id {
        return response_error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("item {} is not owned by this server", id),
        );
    }

    Json(item).into_response()
}

pub(crate) async fn reserve(
    State(state): State<Arc<WorkerState>>,
    Json(request): Json<ReserveRequest>,
) -> impl IntoResponse {
    let outcome = match state
        .reserve_operation
        .run(ReserveItemsOperationRequest { ids: request.ids })
        .await
    {
        Ok(outcome) => outcome,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    match outcome {
        ReserveOutcome::Reserved {
            transaction_id,
            reserved,
        } => Json(ReserveResponse {
            transaction_id,
            reserved,
        })
        .into_response(),
        ReserveOutcome::Rejected { unavailable } => (
            StatusCode::CONFLICT,
            Json(RejectedResponse {
                error: "some items are unavailable".to_string(),
                unavailable,
            }),
        )
            .into_response(),
    }
}

pub(crate) async fn payment(
    State(state): State<Arc<WorkerState>>,
    Json(request): Json<PaymentRequest>,
) -> impl IntoResponse {
    let transaction_id = request.transaction_id.clone();
    let outcome = match state
        .purchase_operation
        .run(PurchaseItemsOperationRequest {
            transaction_id: request.transaction_id,
            credit_card_number: request.credit_card_number,
        })
        .await
    {
        Ok(outcome) => outcome,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    match outcome {
        PurchaseOutcome::Purchased { receipt } => Json(receipt).into_response(),
        PurchaseOutcome::UnknownTransaction => response_error(
            StatusCode::NOT_FOUND,
            format!("transaction {} not found", transaction_id),
        ),
    }
}

pub(crate) async fn register_with_orchestrator(
    State(state): State<Arc<WorkerState>>,
    Query(query): Query<RegisterQuery>,
) -> impl IntoResponse {
    match state.registry.server_id() {
        Ok(Some(server_id)) => return Json(RegisterResponse { server_id }).into_response(),
        Ok(None) => {}
        Err(error) => return response_error(error_status(&error), error.to_string()),
    }

    let orchestrator = match state.registry.orchestrator_address() {
        Ok(Some(address)) => address,
        Ok(None) => {
            return response_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "orchestrator address is not configured",
            );
        }
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    let port = query.port.unwrap_or(state.config.node.port);
    let record = match state
        .peers
        .autoregister(&orchestrator, &state.config.node.hostname, port)
        .await
    {
        Ok(record) => record,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    if let Err(error) = state.registry.set_server_id(record.id) {
        return response_error(error_status(&error), error.to_string());
    }

    tracing::info!("Registered with orchestrator: server_id={}", record.id);
    Json(RegisterResponse {
        server_id: record.id,
    })
    .into_response()
}

pub(crate) async fn orchestrator_servers(State(state): State<Arc<WorkerState>>) -> impl IntoResponse {
    let orchestrator = match state.registry.orchestrator_address() {
        Ok(Some(address)) => address,
        Ok(None) => {
            return response_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "orchestrator address is not configured",
            );
        }
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    match state.peers.fetch_servers(&orchestrator).await {
        Ok(records) => Json(records).into_response(),
        Err(error) => response_error(error_status(&error), error.to_string()),
    }
}

pub(crate) async fn orchestrator_inventory(
    State(state): State<Arc<WorkerState>>,
) -> impl IntoResponse {
    let orchestrator = match state.registry.orchestrator_address() {
        Ok(Some(address)) => address,
        Ok(None) => {
            return response_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "orchestrator address is not configured",
            );
        }
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    match state.peers.fetch_inventory(&orchestrator).await {
        Ok(items) => Json(items).into_response(),
        Err(error) => response_error(error_status(&error), error.to_string()),
    }
}
