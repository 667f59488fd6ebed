//! Prometheus metrics handler

use crate::application::events::EventBroadcaster;
use crate::domain::call::{CallEvent, CallEventKind};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

/// Initialize the Prometheus metrics exporter
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        "voxbridge_calls_total",
        "Total number of call sessions created"
    );
    describe_counter!(
        "voxbridge_calls_ended_total",
        "Total number of calls ended, by reason"
    );
    describe_gauge!(
        "voxbridge_call_sessions",
        "Number of call sessions currently held, ended ones included"
    );
    describe_counter!(
        "voxbridge_bootstraps_total",
        "Call notifications answered, by outcome"
    );
    describe_counter!(
        "voxbridge_bootstrap_routing_failures_total",
        "Call notifications that reached a stale public endpoint"
    );
    describe_counter!(
        "voxbridge_stream_rejections_total",
        "Media streams refused at attach, by reason"
    );
    describe_counter!(
        "voxbridge_outbound_calls_total",
        "Outbound call placements, by outcome"
    );

    Ok(handle)
}

/// HTTP metrics handler
pub async fn metrics_handler(
    axum::extract::State(prometheus_handle): axum::extract::State<PrometheusHandle>,
) -> Response {
    let metrics = prometheus_handle.render();
    (StatusCode::OK, metrics).into_response()
}

/// Record the outcome of a call notification
pub fn record_bootstrap(outcome: &'static str) {
    counter!("voxbridge_bootstraps_total", "outcome" => outcome).increment(1);
}

/// Record a notification that arrived on an old or unregistered endpoint
pub fn record_routing_failure() {
    counter!("voxbridge_bootstrap_routing_failures_total").increment(1);
}

/// Record a refused media stream
pub fn record_stream_rejected(reason: &'static str) {
    counter!("voxbridge_stream_rejections_total", "reason" => reason).increment(1);
}

/// Record an outbound call placement
pub fn record_outbound_call(outcome: &'static str) {
    counter!("voxbridge_outbound_calls_total", "outcome" => outcome).increment(1);
}

fn record_call_event(event: &CallEvent) {
    match &event.kind {
        CallEventKind::Created { direction, .. } => {
            counter!("voxbridge_calls_total", "direction" => direction.as_str()).increment(1);
            gauge!("voxbridge_call_sessions").increment(1.0);
        }
        CallEventKind::Ended { reason, .. } => {
            counter!("voxbridge_calls_ended_total", "reason" => reason.as_str().to_string())
                .increment(1);
        }
        CallEventKind::Purged => {
            gauge!("voxbridge_call_sessions").decrement(1.0);
        }
        CallEventKind::Bootstrapped | CallEventKind::StreamAttached { .. } => {}
    }
}

/// Keep call metrics in step with lifecycle events
pub fn spawn_event_metrics(events: &EventBroadcaster) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => record_call_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Metrics task lagged, {} call events not counted", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
