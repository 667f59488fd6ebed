//! API Router configuration

use super::calls_handler::{get_call, health_check, list_calls, place_call};
use super::media_handler::media_stream_handler;
use super::metrics_handler::metrics_handler;
use super::webhook_handler::{bootstrap_handler, status_handler};
use super::ws_handler::ws_handler;
use crate::application::call::CallService;
use crate::config::Settings;
use crate::domain::endpoint::{BOOTSTRAP_PATH, MEDIA_STREAM_PATH, STATUS_CALLBACK_PATH};
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub calls: Arc<CallService>,
    pub settings: Arc<Settings>,
}

/// Build the API router
pub fn build_router(state: AppState, prometheus_handle: PrometheusHandle) -> Router {
    // Provider-facing routes
    let provider_routes = Router::new()
        .route(BOOTSTRAP_PATH, post(bootstrap_handler))
        .route("/twiml", post(bootstrap_handler))
        .route(STATUS_CALLBACK_PATH, post(status_handler))
        .route(MEDIA_STREAM_PATH, get(media_stream_handler));

    // Operator routes
    let call_routes = Router::new()
        .route("/health", get(health_check))
        .route("/calls", get(list_calls).post(place_call))
        .route("/calls/:call_sid", get(get_call))
        .route("/events", get(ws_handler));

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    // Combine routes with state
    Router::new()
        .merge(provider_routes)
        .merge(call_routes)
        .with_state(state)
        .merge(metrics_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
