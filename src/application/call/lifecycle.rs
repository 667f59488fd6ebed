//! Hangup, purge and queries

use super::CallService;
use crate::application::events::EventBroadcaster;
use crate::application::session_table::{SessionRef, SessionTable};
use crate::domain::call::{
    CallEvent, CallEventKind, CallPhase, CallSession, CallSessionView, EndReason,
};
use crate::domain::provider::TelephonyProvider;
use crate::domain::shared::value_objects::CallSid;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a status callback did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The call was live and is now ended
    Ended,
    /// Progress status (`ringing`, `in-progress`, ...), nothing to do
    Progress,
    /// Call already ended or never seen by this process
    Ignored,
}

/// Map a provider `CallStatus` to an end reason, if it is terminal
fn terminal_reason(status: &str) -> Option<EndReason> {
    match status {
        "completed" => Some(EndReason::Hangup),
        "busy" | "failed" | "no-answer" | "canceled" => {
            Some(EndReason::NotConnected(status.to_string()))
        }
        _ => None,
    }
}

impl CallService {
    /// End a live call, close its stream and schedule the purge
    ///
    /// Calls ended from our side are hung up at the provider too.
    /// Returns `false` when the call is unknown or already ended.
    pub async fn end_call(&self, call_sid: &CallSid, reason: EndReason) -> bool {
        let Some(session_ref) = self.sessions.get(call_sid).await else {
            return false;
        };
        self.closer().end(call_sid, session_ref, reason, |_| true).await
    }

    /// End the call if it is still in `waiting` once the stream deadline passes
    ///
    /// Without this a call whose media stream never connects would stay in
    /// the table forever when the provider sends no status callback.
    pub(super) fn watch_stream_deadline(
        &self,
        call_sid: CallSid,
        session_ref: SessionRef,
        waiting: CallPhase,
    ) {
        let closer = self.closer();
        let deadline = self.config.stream_deadline;
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let ended = closer
                .end(&call_sid, session_ref, EndReason::NoStream, |session| {
                    session.phase() == &waiting
                })
                .await;
            if ended {
                warn!("Call {} got no media stream within {:?}", call_sid, deadline);
            }
        });
    }

    /// Apply a provider status callback
    pub async fn handle_status(&self, call_sid: &CallSid, status: &str) -> StatusOutcome {
        match terminal_reason(status) {
            Some(reason) => {
                if self.end_call(call_sid, reason).await {
                    StatusOutcome::Ended
                } else {
                    debug!("Status {} for unknown or ended call {}", status, call_sid);
                    StatusOutcome::Ignored
                }
            }
            None => {
                debug!("Call {} status: {}", call_sid, status);
                StatusOutcome::Progress
            }
        }
    }

    pub async fn get_call(&self, call_sid: &CallSid) -> Option<CallSessionView> {
        let session = self.sessions.get(call_sid).await?;
        let view = session.lock().await.view();
        Some(view)
    }

    /// Every session in the table, ended ones included until purged
    pub async fn sessions(&self) -> Vec<CallSessionView> {
        self.sessions.views().await
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    /// End every call, hang them up at the provider and empty the table
    pub async fn shutdown(&self) {
        let sessions = self.sessions.drain().await;
        if sessions.is_empty() {
            return;
        }

        info!("Ending {} call(s) for shutdown", sessions.len());
        let mut live = Vec::new();
        for session_ref in sessions {
            let mut session = session_ref.lock().await;
            if !session.phase().is_terminal() {
                match session.end(EndReason::Shutdown) {
                    Ok(()) => live.push(session.call_sid().clone()),
                    Err(e) => warn!("Failed to end call {}: {}", session.call_sid(), e),
                }
            }
            let events = session.take_events();
            drop(session);
            self.events.publish_all(events);
        }

        let provider = &self.provider;
        join_all(live.iter().map(|call_sid| hang_up(provider.as_ref(), call_sid))).await;
    }

    fn closer(&self) -> CallCloser {
        CallCloser {
            sessions: self.sessions.clone(),
            events: self.events.clone(),
            provider: self.provider.clone(),
            grace_window: self.config.grace_window,
        }
    }
}

/// What ending a call needs, owned so timers can end calls too
#[derive(Clone)]
struct CallCloser {
    sessions: Arc<SessionTable>,
    events: EventBroadcaster,
    provider: Arc<dyn TelephonyProvider>,
    grace_window: Duration,
}

impl CallCloser {
    /// End the session if it is live and `should_end` agrees
    async fn end<F>(
        &self,
        call_sid: &CallSid,
        session_ref: SessionRef,
        reason: EndReason,
        should_end: F,
    ) -> bool
    where
        F: FnOnce(&CallSession) -> bool,
    {
        let events = {
            let mut session = session_ref.lock().await;
            if session.phase().is_terminal() || !should_end(&*session) {
                return false;
            }
            if let Err(e) = session.end(reason.clone()) {
                warn!("Failed to end call {}: {}", call_sid, e);
                return false;
            }
            session.take_events()
        };

        self.events.publish_all(events);
        info!("Call {} ended: {}", call_sid, reason.as_str());

        if !reason.came_from_provider() {
            hang_up(self.provider.as_ref(), call_sid).await;
        }

        spawn_purge(
            self.sessions.clone(),
            self.events.clone(),
            call_sid.clone(),
            session_ref,
            self.grace_window,
        );
        true
    }
}

async fn hang_up(provider: &dyn TelephonyProvider, call_sid: &CallSid) {
    if let Err(e) = provider.hangup_call(call_sid).await {
        warn!("Failed to hang up call {} at the provider: {}", call_sid, e);
    }
}

/// Remove the session once the grace window has passed
fn spawn_purge(
    sessions: Arc<SessionTable>,
    events: EventBroadcaster,
    call_sid: CallSid,
    session_ref: SessionRef,
    grace_window: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(grace_window).await;
        if sessions.remove_if_same(&call_sid, &session_ref).await {
            debug!("Call {} purged", call_sid);
            events.publish(CallEvent::new(call_sid, CallEventKind::Purged));
        }
    });
}
