//! Call Management API handlers

use super::dto::{ApiResponse, CallListResponse, HealthResponse, PlaceCallRequest};
use super::metrics_handler::record_outbound_call;
use super::router::AppState;
use crate::application::call::OutboundCallError;
use crate::domain::call::CallSessionView;
use crate::domain::provider::ProviderError;
use crate::domain::shared::value_objects::CallSid;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info, warn};

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let endpoint = state.calls.endpoint();
    Json(ApiResponse::success(HealthResponse {
        status: "OK",
        pipeline: state.calls.pipeline_name(),
        endpoint: endpoint.current().map(|snapshot| (*snapshot).clone()),
        registration: endpoint.registration(),
        sessions: state.calls.session_count().await,
    }))
}

/// List call sessions
pub async fn list_calls(
    State(state): State<AppState>,
) -> Json<ApiResponse<CallListResponse<CallSessionView>>> {
    info!("API: Listing call sessions");

    let calls = state.calls.sessions().await;
    let total = calls.len();
    Json(ApiResponse::success(CallListResponse { calls, total }))
}

/// Get call session by CallSid
pub async fn get_call(
    State(state): State<AppState>,
    Path(call_sid): Path<String>,
) -> (StatusCode, Json<ApiResponse<CallSessionView>>) {
    info!("API: Getting call {}", call_sid);

    let Ok(sid) = CallSid::parse(&call_sid) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!("Invalid CallSid {}", call_sid))),
        );
    };

    match state.calls.get_call(&sid).await {
        Some(view) => (StatusCode::OK, Json(ApiResponse::success(view))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Call {} not found", call_sid))),
        ),
    }
}

/// Place an outbound call
pub async fn place_call(
    State(state): State<AppState>,
    Json(request): Json<PlaceCallRequest>,
) -> (StatusCode, Json<ApiResponse<CallSessionView>>) {
    info!("API: Placing call from {} to {}", request.from, request.to);

    match state.calls.place_call(&request.to, &request.from).await {
        Ok(view) => {
            record_outbound_call("placed");
            (StatusCode::CREATED, Json(ApiResponse::success(view)))
        }
        Err(e) => {
            let status = match &e {
                OutboundCallError::InvalidNumber(_) => {
                    record_outbound_call("invalid_number");
                    warn!("API: {}", e);
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                OutboundCallError::NoEndpoint(_) => {
                    record_outbound_call("no_endpoint");
                    error!("API: Failed to place call: {}", e);
                    StatusCode::SERVICE_UNAVAILABLE
                }
                OutboundCallError::Provider(provider) => {
                    record_outbound_call("provider_error");
                    error!("API: Failed to place call: {}", e);
                    match provider {
                        ProviderError::Transport(_) => StatusCode::GATEWAY_TIMEOUT,
                        _ => StatusCode::BAD_GATEWAY,
                    }
                }
            };
            (status, Json(ApiResponse::error(e.to_string())))
        }
    }
}
