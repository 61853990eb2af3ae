use super::{AutoregisterQuery, FailureQuery, OrchestratorState, error_status, response_error};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use std::sync::Arc;
use tessio_core::{
    FailureOutcome, FailureResponse, InitiateRecoveryOperationRequest, RecoveryOutcome,
    RecoveryOutcomeKind, RecoveryRequest, RecoveryResponse, RegisterServerOperationRequest,
    ReportFailureOperationRequest,
};

pub(crate) async fn autoregister(
    State(state): State<Arc<OrchestratorState>>,
    Query(query): Query<AutoregisterQuery>,
) -> impl IntoResponse {
    let record = match state
        .register_operation
        .run(RegisterServerOperationRequest {
            hostname: query.hostname,
            port: query.port,
        })
        .await
    {
        Ok(record) => record,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    Json(record).into_response()
}

pub(crate) async fn failure(
    State(state): State<Arc<OrchestratorState>>,
    Query(query): Query<FailureQuery>,
) -> impl IntoResponse {
    let outcome = match state
        .failure_operation
        .run(ReportFailureOperationRequest {
            failed_server_id: query.failed_server_id,
            backup_server_id: query.backup_server_id,
        })
        .await
    {
        Ok(outcome) => outcome,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    match outcome {
        FailureOutcome::Granted { items } => {
            tracing::info!(
                "Failover granted: failed={} backup={} items={}",
                query.failed_server_id,
                query.backup_server_id,
                items
            );
            Json(FailureResponse {
                granted: true,
                failed_server_id: query.failed_server_id,
                backup_server_id: query.backup_server_id,
            })
            .into_response()
        }
        FailureOutcome::Denied { reason } => response_error(StatusCode::UNAUTHORIZED, reason),
    }
}

pub(crate) async fn initiate_recovery(
    State(state): State<Arc<OrchestratorState>>,
    Json(request): Json<RecoveryRequest>,
) -> impl IntoResponse {
    let outcome = match state
        .recovery_operation
        .run(InitiateRecoveryOperationRequest {
            server_id: request.server_id,
            relinquished_ids: request.relinquished_ids,
        })
        .await
    {
        Ok(outcome) => outcome,
        Err(error) => return response_error(error_status(&error), error.to_string()),
    };

    let response = match outcome {
        RecoveryOutcome::Repaired { restored } => RecoveryResponse {
            outcome: RecoveryOutcomeKind::Repaired,
            restored,
        },
        RecoveryOutcome::Standalone { restored } => RecoveryResponse {
            outcome: RecoveryOutcomeKind::Standalone,
            restored,
        },
    };

    Json(response).into_response()
}
