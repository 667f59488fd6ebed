//! Call notification -> call-control document

use super::{BootstrapError, CallService};
use crate::domain::call::{CallDirection, CallPhase, CallSession};
use crate::domain::endpoint::EndpointSnapshot;
use crate::domain::shared::value_objects::CallSid;
use crate::infrastructure::twilio::StreamDocument;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info};

/// Call notification fields, as posted by the provider
#[derive(Debug, Clone, Default)]
pub struct CallNotification {
    pub call_sid: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub direction: Option<String>,
    /// Host the request was addressed to (`X-Forwarded-Host` or `Host`)
    pub request_host: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub call_sid: CallSid,
    /// Call-control document to return
    pub document: String,
    /// `false` when this was a duplicate notification and the stored
    /// document was replayed
    pub created: bool,
}

impl CallService {
    /// Answer a call notification with a media-stream document
    ///
    /// Duplicate notifications replay the stored document. The whole
    /// operation is bounded by the configured bootstrap deadline.
    pub async fn bootstrap(
        &self,
        notification: CallNotification,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        let deadline = self.config.bootstrap_deadline;
        timeout(deadline, self.bootstrap_inner(notification))
            .await
            .map_err(|_| BootstrapError::DeadlineExceeded(deadline))?
    }

    async fn bootstrap_inner(
        &self,
        notification: CallNotification,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        let raw_sid = notification
            .call_sid
            .as_deref()
            .ok_or(BootstrapError::MissingCallSid)?;
        let call_sid = CallSid::parse(raw_sid).map_err(BootstrapError::InvalidCallSid)?;

        let snapshot = self.routable_snapshot(notification.request_host.as_deref())?;

        let direction = CallDirection::from_provider(notification.direction.as_deref());
        let from = notification.from.unwrap_or_default();
        let to = notification.to.unwrap_or_default();

        let (session_ref, created) = self
            .sessions
            .get_or_insert_with(&call_sid, || {
                CallSession::announced(call_sid.clone(), direction, from, to)
            })
            .await;

        let mut session = session_ref.lock().await;
        match session.phase() {
            CallPhase::Ringing | CallPhase::Dialing => {
                let document = StreamDocument::new(snapshot.stream_url())
                    .parameter("call_sid", call_sid.as_str())
                    .parameter("from_number", session.from())
                    .parameter("to_number", session.to())
                    .parameter("direction", session.direction().as_str())
                    .parameter("agent", self.config.agent.as_str())
                    .pause(self.config.pause_secs)
                    .render();

                session.bootstrap(document.clone())?;
                let events = session.take_events();
                drop(session);
                self.events.publish_all(events);
                self.watch_stream_deadline(
                    call_sid.clone(),
                    session_ref.clone(),
                    CallPhase::Bootstrapped,
                );

                info!(
                    "Call {} bootstrapped ({}), stream {}",
                    call_sid,
                    direction.as_str(),
                    snapshot.stream_url()
                );

                Ok(BootstrapOutcome {
                    call_sid,
                    document,
                    created: true,
                })
            }
            CallPhase::Bootstrapped | CallPhase::Active => {
                let document = session.control_document().unwrap_or_default().to_string();
                debug!(
                    "Duplicate notification for call {} (session created: {}), replaying document",
                    call_sid, created
                );
                Ok(BootstrapOutcome {
                    call_sid,
                    document,
                    created: false,
                })
            }
            CallPhase::Ended(_) => Err(BootstrapError::CallEnded(call_sid)),
        }
    }

    /// Current endpoint, if the provider can reach the stream URL it names
    fn routable_snapshot(
        &self,
        request_host: Option<&str>,
    ) -> Result<Arc<EndpointSnapshot>, BootstrapError> {
        let snapshot = self
            .endpoint
            .routable()
            .map_err(|e| BootstrapError::StaleEndpoint(e.to_string()))?;

        if let Some(host) = request_host {
            let requested = host_without_port(host);
            if !is_loopback(requested)
                && !requested.eq_ignore_ascii_case(host_without_port(&snapshot.authority()))
            {
                return Err(BootstrapError::StaleEndpoint(format!(
                    "request addressed to {} but the current endpoint is {}",
                    host,
                    snapshot.authority()
                )));
            }
        }

        Ok(snapshot)
    }
}

fn host_without_port(authority: &str) -> &str {
    let authority = authority.trim();
    if let Some(rest) = authority.strip_prefix('[') {
        // [::1]:7860
        return rest.split(']').next().unwrap_or(rest);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    }
}

fn is_loopback(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost") || host == "::1" || host.starts_with("127.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::call::tests_support::{service, snapshot_url};
    use crate::domain::endpoint::{normalize_public_url, PublicEndpoint};

    fn notification(call_sid: &str) -> CallNotification {
        CallNotification {
            call_sid: Some(call_sid.to_string()),
            from: Some("+15550001111".to_string()),
            to: Some("+15550002222".to_string()),
            direction: Some("inbound".to_string()),
            request_host: Some("abc.ngrok.io".to_string()),
        }
    }

    #[tokio::test]
    async fn test_bootstrap_creates_one_session() {
        let service = service(PublicEndpoint::unmanaged());
        snapshot_url(&service, "abc.ngrok.io");

        let outcome = service.bootstrap(notification("CA1")).await.unwrap();
        assert!(outcome.created);
        assert!(outcome.document.contains("<Stream url=\"wss://abc.ngrok.io/ws\">"));
        assert!(outcome
            .document
            .contains("<Parameter name=\"call_sid\" value=\"CA1\"/>"));

        let view = service.get_call(&outcome.call_sid).await.unwrap();
        assert_eq!(view.phase, "bootstrapped");
        assert_eq!(service.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_notification_replays_document() {
        let service = service(PublicEndpoint::unmanaged());
        snapshot_url(&service, "abc.ngrok.io");

        let first = service.bootstrap(notification("CA2")).await.unwrap();
        let second = service.bootstrap(notification("CA2")).await.unwrap();
        assert!(!second.created);
        assert_eq!(first.document, second.document);
        assert_eq!(service.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_call_sid() {
        let service = service(PublicEndpoint::unmanaged());
        snapshot_url(&service, "abc.ngrok.io");

        let mut n = notification("CA3");
        n.call_sid = None;
        assert!(matches!(
            service.bootstrap(n).await,
            Err(BootstrapError::MissingCallSid)
        ));
        assert!(service.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_request_to_old_host_is_stale() {
        let service = service(PublicEndpoint::unmanaged());
        snapshot_url(&service, "new.ngrok.io");

        assert!(matches!(
            service.bootstrap(notification("CA4")).await,
            Err(BootstrapError::StaleEndpoint(_))
        ));
        assert!(service.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_rotation_is_stale() {
        let endpoint = PublicEndpoint::managed();
        let first = endpoint.rotate(normalize_public_url("abc.ngrok.io").unwrap());
        endpoint.mark_registered(first.version());
        let service = service(endpoint.clone());

        assert!(service.bootstrap(notification("CA5")).await.is_ok());

        endpoint.rotate(normalize_public_url("abc2.ngrok.io").unwrap());
        let mut n = notification("CA6");
        n.request_host = None;
        assert!(matches!(
            service.bootstrap(n).await,
            Err(BootstrapError::StaleEndpoint(_))
        ));
        assert!(service.get_call(&CallSid::parse("CA6").unwrap()).await.is_none());
    }

    #[tokio::test]
    async fn test_no_endpoint_is_stale() {
        let service = service(PublicEndpoint::unmanaged());
        assert!(matches!(
            service.bootstrap(notification("CA7")).await,
            Err(BootstrapError::StaleEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_loopback_host_is_not_checked() {
        let service = service(PublicEndpoint::unmanaged());
        snapshot_url(&service, "abc.ngrok.io");

        let mut n = notification("CA8");
        n.request_host = Some("127.0.0.1:7860".to_string());
        assert!(service.bootstrap(n).await.is_ok());
    }

    #[tokio::test]
    async fn test_outbound_notification_starts_from_dialing() {
        let service = service(PublicEndpoint::unmanaged());
        snapshot_url(&service, "abc.ngrok.io");

        let mut n = notification("CA9");
        n.direction = Some("outbound-api".to_string());
        let outcome = service.bootstrap(n).await.unwrap();
        assert!(outcome
            .document
            .contains("<Parameter name=\"direction\" value=\"outbound\"/>"));
    }

    #[test]
    fn test_host_without_port() {
        assert_eq!(host_without_port("abc.ngrok.io"), "abc.ngrok.io");
        assert_eq!(host_without_port("abc.ngrok.io:443"), "abc.ngrok.io");
        assert_eq!(host_without_port("[::1]:7860"), "::1");
        assert!(is_loopback("localhost"));
        assert!(!is_loopback("abc.ngrok.io"));
    }
}
