//! Provider webhooks: call notification and status callback
//!
//! Both are form-encoded POSTs. Whatever goes wrong, the provider gets a
//! 200 with a document it can execute; a raw error would make it play its
//! generic failure message to the caller.

use super::metrics_handler::{record_bootstrap, record_routing_failure};
use super::router::AppState;
use crate::application::call::{BootstrapError, CallNotification, StatusOutcome};
use crate::domain::shared::value_objects::CallSid;
use crate::infrastructure::twilio::{empty_document, fallback_document, signature, twiml};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Uri},
    response::{IntoResponse, Response},
};
use tracing::{debug, error, info, warn};

/// Marks a fallback caused by an outdated public endpoint
pub const ROUTING_HEADER: &str = "x-voxbridge-routing";
pub const ROUTING_STALE: &str = "stale-endpoint";

type FormParams = Vec<(String, String)>;

fn xml(document: String) -> Response {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static(twiml::CONTENT_TYPE))],
        document,
    )
        .into_response()
}

fn field(params: &FormParams, name: &str) -> Option<String> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
        .filter(|value| !value.is_empty())
}

/// Host the provider addressed, as seen through the tunnel
fn request_host(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(',').next().unwrap_or(value).trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Check `X-Twilio-Signature` when validation is enabled
fn signature_valid(state: &AppState, headers: &HeaderMap, uri: &Uri, params: &FormParams) -> bool {
    let twilio = &state.settings.twilio;
    if !twilio.validate_signatures {
        return true;
    }
    let (Some(auth_token), Some(snapshot)) =
        (twilio.auth_token.as_deref(), state.calls.endpoint().current())
    else {
        return false;
    };
    let Some(provided) = headers
        .get(signature::SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };

    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = snapshot.public_url(path);
    signature::verify(auth_token, &url, params, provided)
}

/// `POST /` and `POST /twiml`: answer a call notification
pub async fn bootstrap_handler(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let params: FormParams = match serde_urlencoded::from_bytes(&body) {
        Ok(params) => params,
        Err(e) => {
            warn!("Webhook: unreadable call notification: {}", e);
            record_bootstrap("malformed");
            return xml(fallback_document());
        }
    };

    if !signature_valid(&state, &headers, &uri, &params) {
        warn!("Webhook: call notification failed signature validation");
        record_bootstrap("bad_signature");
        return xml(fallback_document());
    }

    let notification = CallNotification {
        call_sid: field(&params, "CallSid"),
        from: field(&params, "From"),
        to: field(&params, "To"),
        direction: field(&params, "Direction"),
        request_host: request_host(&headers),
    };
    info!(
        "Webhook: call notification {:?} from {:?}",
        notification.call_sid, notification.from
    );

    match state.calls.bootstrap(notification).await {
        Ok(outcome) => {
            record_bootstrap(if outcome.created { "created" } else { "replayed" });
            xml(outcome.document)
        }
        Err(BootstrapError::StaleEndpoint(reason)) => {
            error!(
                "Webhook: call notification reached a stale endpoint ({}); \
                 re-run setup or check the tunnel",
                reason
            );
            record_bootstrap("stale_endpoint");
            record_routing_failure();
            let mut response = xml(fallback_document());
            response
                .headers_mut()
                .insert(ROUTING_HEADER, HeaderValue::from_static(ROUTING_STALE));
            response
        }
        Err(e @ BootstrapError::DeadlineExceeded(_)) => {
            error!("Webhook: {}", e);
            record_bootstrap("deadline");
            xml(fallback_document())
        }
        Err(e @ BootstrapError::CallEnded(_)) => {
            info!("Webhook: {}", e);
            record_bootstrap("ended");
            xml(fallback_document())
        }
        Err(e) => {
            warn!("Webhook: rejected call notification: {}", e);
            record_bootstrap("invalid");
            xml(fallback_document())
        }
    }
}

/// `POST /status`: provider call status callback
pub async fn status_handler(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let params: FormParams = serde_urlencoded::from_bytes(&body).unwrap_or_default();

    if !signature_valid(&state, &headers, &uri, &params) {
        warn!("Webhook: status callback failed signature validation");
        return xml(empty_document());
    }

    let (Some(raw_sid), Some(status)) = (field(&params, "CallSid"), field(&params, "CallStatus"))
    else {
        debug!("Webhook: status callback without CallSid/CallStatus");
        return xml(empty_document());
    };

    let Ok(call_sid) = CallSid::parse(&raw_sid) else {
        debug!("Webhook: status callback with invalid CallSid {:?}", raw_sid);
        return xml(empty_document());
    };

    match state.calls.handle_status(&call_sid, &status).await {
        StatusOutcome::Ended => info!("Webhook: call {} {}", call_sid, status),
        StatusOutcome::Progress | StatusOutcome::Ignored => {}
    }
    xml(empty_document())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_lookup() {
        let params: FormParams = serde_urlencoded::from_str("CallSid=CA1&From=%2B15550001111&To=")
            .unwrap();
        assert_eq!(field(&params, "CallSid").as_deref(), Some("CA1"));
        assert_eq!(field(&params, "From").as_deref(), Some("+15550001111"));
        assert_eq!(field(&params, "To"), None);
        assert_eq!(field(&params, "Direction"), None);
    }

    #[test]
    fn test_request_host_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("127.0.0.1:7860"));
        assert_eq!(request_host(&headers).as_deref(), Some("127.0.0.1:7860"));

        headers.insert(
            "x-forwarded-host",
            HeaderValue::from_static("abc.ngrok.io, proxy.internal"),
        );
        assert_eq!(request_host(&headers).as_deref(), Some("abc.ngrok.io"));
    }
}
