//! Outbound call placement

use super::{CallService, OutboundCallError};
use crate::domain::call::{CallPhase, CallSession, CallSessionView};
use crate::domain::provider::{OutboundCallRequest, ProviderError};
use crate::domain::shared::value_objects::PhoneNumber;
use tracing::{info, warn};

impl CallService {
    /// Ask the provider to call `to` from `from`
    ///
    /// Both numbers are validated before any provider request. The provider
    /// fetches the call-control document from our bootstrap endpoint once
    /// the callee answers, so the call then follows the inbound path.
    pub async fn place_call(
        &self,
        to: &str,
        from: &str,
    ) -> Result<CallSessionView, OutboundCallError> {
        let to = PhoneNumber::parse(to).map_err(OutboundCallError::InvalidNumber)?;
        let from = PhoneNumber::parse(from).map_err(OutboundCallError::InvalidNumber)?;

        let snapshot = self
            .endpoint
            .routable()
            .map_err(OutboundCallError::NoEndpoint)?;

        let request = OutboundCallRequest {
            to: to.clone(),
            from: from.clone(),
            bootstrap_url: snapshot.bootstrap_url(),
            status_callback_url: snapshot.status_url(),
        };

        let placed = self.provider.place_call(&request).await.map_err(|e| {
            warn!("Provider refused call from {} to {}: {}", from, to, e);
            OutboundCallError::from(e)
        })?;

        let session_ref = match self
            .sessions
            .insert_new(CallSession::new_outbound(placed.call_sid.clone(), &from, &to))
            .await
        {
            Some(session_ref) => {
                self.watch_stream_deadline(
                    placed.call_sid.clone(),
                    session_ref.clone(),
                    CallPhase::Dialing,
                );
                session_ref
            }
            None => {
                // The provider's notification won the race and created it
                info!(
                    "Call {} was announced before placement returned",
                    placed.call_sid
                );
                self.sessions
                    .get(&placed.call_sid)
                    .await
                    .ok_or_else(|| {
                        ProviderError::InvalidResponse(format!(
                            "call {} vanished while being recorded",
                            placed.call_sid
                        ))
                    })?
            }
        };

        let (view, events) = {
            let mut session = session_ref.lock().await;
            (session.view(), session.take_events())
        };
        self.events.publish_all(events);

        info!(
            "Outbound call {} to {} placed ({})",
            placed.call_sid, to, placed.status
        );
        Ok(view)
    }
}
