//! Call session aggregate root

use crate::domain::call::entity::MediaStreamHandle;
use crate::domain::call::event::{CallEvent, CallEventKind};
use crate::domain::call::value_object::{CallDirection, CallPhase, EndReason};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallSid, PhoneNumber, StreamSid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One phone call from ring to hangup
///
/// The session enforces the lifecycle state machine and owns the media
/// stream handle once one is attached. Ending the session closes the handle.
#[derive(Debug)]
pub struct CallSession {
    call_sid: CallSid,
    direction: CallDirection,
    phase: CallPhase,
    from: String,
    to: String,
    created_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    /// Document returned on bootstrap, replayed for duplicate notifications
    control_document: Option<String>,
    stream: Option<MediaStreamHandle>,
    events: Vec<CallEvent>,
}

impl CallSession {
    /// Session for a call the provider just announced to us
    pub fn new_inbound(call_sid: CallSid, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(call_sid, CallDirection::Inbound, CallPhase::Ringing, from.into(), to.into())
    }

    /// Session for a call the provider accepted to place on our behalf
    pub fn new_outbound(call_sid: CallSid, from: &PhoneNumber, to: &PhoneNumber) -> Self {
        Self::new(
            call_sid,
            CallDirection::Outbound,
            CallPhase::Dialing,
            from.to_string(),
            to.to_string(),
        )
    }

    /// Session for a call first seen through a provider notification
    ///
    /// Outbound calls can be announced before the placement request returns,
    /// so the provider's direction decides the starting phase.
    pub fn announced(
        call_sid: CallSid,
        direction: CallDirection,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        let phase = match direction {
            CallDirection::Inbound => CallPhase::Ringing,
            CallDirection::Outbound => CallPhase::Dialing,
        };
        Self::new(call_sid, direction, phase, from.into(), to.into())
    }

    fn new(
        call_sid: CallSid,
        direction: CallDirection,
        phase: CallPhase,
        from: String,
        to: String,
    ) -> Self {
        let mut session = Self {
            call_sid,
            direction,
            phase,
            from,
            to,
            created_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            control_document: None,
            stream: None,
            events: Vec::new(),
        };

        session.record_event(CallEventKind::Created {
            direction,
            from: session.from.clone(),
            to: session.to.clone(),
        });

        session
    }

    /// Record the call-control document handed to the provider
    pub fn bootstrap(&mut self, document: String) -> Result<()> {
        self.transition_to(CallPhase::Bootstrapped)?;
        self.control_document = Some(document);
        self.record_event(CallEventKind::Bootstrapped);
        Ok(())
    }

    /// Attach the media stream; at most one per session
    pub fn attach_stream(&mut self, handle: MediaStreamHandle) -> Result<()> {
        if let Some(existing) = &self.stream {
            return Err(DomainError::Conflict(format!(
                "call {} already has media stream {}",
                self.call_sid,
                existing.stream_sid()
            )));
        }

        self.transition_to(CallPhase::Active)?;
        self.answered_at = Some(Utc::now());
        self.record_event(CallEventKind::StreamAttached {
            stream_sid: handle.stream_sid().clone(),
        });
        self.stream = Some(handle);
        Ok(())
    }

    /// End the call and close its media stream, if any
    pub fn end(&mut self, reason: EndReason) -> Result<()> {
        self.transition_to(CallPhase::Ended(reason.clone()))?;
        let ended_at = Utc::now();
        self.ended_at = Some(ended_at);

        if let Some(stream) = self.stream.take() {
            stream.close();
        }

        let duration_seconds = self
            .answered_at
            .map(|answered| (ended_at - answered).num_seconds());

        self.record_event(CallEventKind::Ended {
            reason,
            duration_seconds,
        });

        Ok(())
    }

    /// Whether `stream_sid` is the stream currently attached
    pub fn owns_stream(&self, stream_sid: &StreamSid) -> bool {
        self.stream
            .as_ref()
            .map(|s| s.stream_sid() == stream_sid)
            .unwrap_or(false)
    }

    /// Transition to a new phase
    fn transition_to(&mut self, next: CallPhase) -> Result<()> {
        if !self.phase.can_transition_to(&next) {
            return Err(DomainError::InvalidStateTransition(format!(
                "call {}: cannot transition from {} to {}",
                self.call_sid, self.phase, next
            )));
        }

        self.phase = next;
        Ok(())
    }

    fn record_event(&mut self, kind: CallEventKind) {
        self.events.push(CallEvent::new(self.call_sid.clone(), kind));
    }

    /// Take all pending events
    pub fn take_events(&mut self) -> Vec<CallEvent> {
        std::mem::take(&mut self.events)
    }

    // Getters
    pub fn call_sid(&self) -> &CallSid {
        &self.call_sid
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn phase(&self) -> &CallPhase {
        &self.phase
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn control_document(&self) -> Option<&str> {
        self.control_document.as_deref()
    }

    pub fn stream_sid(&self) -> Option<&StreamSid> {
        self.stream.as_ref().map(|s| s.stream_sid())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Serializable snapshot for the operator API
    pub fn view(&self) -> CallSessionView {
        CallSessionView {
            call_sid: self.call_sid.clone(),
            direction: self.direction,
            phase: self.phase.name().to_string(),
            end_reason: match &self.phase {
                CallPhase::Ended(reason) => Some(reason.as_str().to_string()),
                _ => None,
            },
            from: self.from.clone(),
            to: self.to.clone(),
            stream_sid: self.stream_sid().cloned(),
            created_at: self.created_at,
            answered_at: self.answered_at,
            ended_at: self.ended_at,
        }
    }
}

/// Point-in-time copy of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSessionView {
    pub call_sid: CallSid,
    pub direction: CallDirection,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_sid: Option<StreamSid>,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(value: &str) -> CallSid {
        CallSid::parse(value).unwrap()
    }

    #[test]
    fn test_inbound_lifecycle() {
        let mut call = CallSession::new_inbound(sid("CA100"), "+15550001111", "+15550002222");
        assert_eq!(call.phase(), &CallPhase::Ringing);
        assert_eq!(call.direction(), CallDirection::Inbound);

        call.bootstrap("<Response/>".to_string()).unwrap();
        assert_eq!(call.phase(), &CallPhase::Bootstrapped);
        assert_eq!(call.control_document(), Some("<Response/>"));

        let (handle, rx) = MediaStreamHandle::new(StreamSid::new("MZ100"));
        call.attach_stream(handle).unwrap();
        assert_eq!(call.phase(), &CallPhase::Active);
        assert!(call.owns_stream(&StreamSid::new("MZ100")));

        call.end(EndReason::StreamClosed).unwrap();
        assert!(call.phase().is_terminal());
        assert_eq!(call.stream_sid(), None);
        assert!(*rx.borrow(), "ending the call must close the stream handle");

        let events = call.take_events();
        assert_eq!(events.len(), 4); // Created, Bootstrapped, StreamAttached, Ended
    }

    #[test]
    fn test_outbound_starts_dialing() {
        let from = PhoneNumber::parse("+16025550100").unwrap();
        let to = PhoneNumber::parse("+15551234567").unwrap();
        let mut call = CallSession::new_outbound(sid("CA200"), &from, &to);
        assert_eq!(call.phase(), &CallPhase::Dialing);
        assert_eq!(call.direction(), CallDirection::Outbound);

        call.bootstrap("<Response/>".to_string()).unwrap();
        assert_eq!(call.phase(), &CallPhase::Bootstrapped);
    }

    #[test]
    fn test_announced_outbound_starts_dialing() {
        let call = CallSession::announced(sid("CA250"), CallDirection::Outbound, "a", "b");
        assert_eq!(call.phase(), &CallPhase::Dialing);

        let call = CallSession::announced(sid("CA251"), CallDirection::Inbound, "a", "b");
        assert_eq!(call.phase(), &CallPhase::Ringing);
    }

    #[test]
    fn test_second_stream_rejected() {
        let mut call = CallSession::new_inbound(sid("CA300"), "a", "b");
        call.bootstrap("doc".to_string()).unwrap();

        let (first, first_rx) = MediaStreamHandle::new(StreamSid::new("MZ1"));
        call.attach_stream(first).unwrap();

        let (second, _second_rx) = MediaStreamHandle::new(StreamSid::new("MZ2"));
        let err = call.attach_stream(second).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        assert!(call.owns_stream(&StreamSid::new("MZ1")));
        assert!(!*first_rx.borrow(), "first stream must stay open");
    }

    #[test]
    fn test_attach_requires_bootstrap() {
        let mut call = CallSession::new_inbound(sid("CA400"), "a", "b");
        let (handle, _rx) = MediaStreamHandle::new(StreamSid::new("MZ1"));
        assert!(matches!(
            call.attach_stream(handle),
            Err(DomainError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn test_cannot_attach_after_end() {
        let mut call = CallSession::new_inbound(sid("CA500"), "a", "b");
        call.bootstrap("doc".to_string()).unwrap();
        call.end(EndReason::Hangup).unwrap();

        let (handle, _rx) = MediaStreamHandle::new(StreamSid::new("MZ1"));
        assert!(call.attach_stream(handle).is_err());
        assert!(call.end(EndReason::Hangup).is_err());
        assert!(call.bootstrap("doc".to_string()).is_err());
    }
}
