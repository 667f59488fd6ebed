//! Active call session table
//!
//! The only state shared between concurrent calls. The outer map lock is
//! held just long enough to look up, insert or remove an entry; each session
//! has its own mutex that orders bootstrap, stream attach and hangup for that
//! call. Never take the map lock while holding a session lock.

use crate::domain::call::{CallSession, CallSessionView};
use crate::domain::shared::value_objects::CallSid;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub type SessionRef = Arc<Mutex<CallSession>>;

#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<CallSid, SessionRef>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, call_sid: &CallSid) -> Option<SessionRef> {
        self.sessions.read().await.get(call_sid).cloned()
    }

    /// Existing session for `call_sid`, or a new one built by `create`
    ///
    /// The flag is `true` when the session was created by this call.
    pub async fn get_or_insert_with<F>(&self, call_sid: &CallSid, create: F) -> (SessionRef, bool)
    where
        F: FnOnce() -> CallSession,
    {
        if let Some(existing) = self.get(call_sid).await {
            return (existing, false);
        }

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(call_sid) {
            return (existing.clone(), false);
        }
        let session = Arc::new(Mutex::new(create()));
        sessions.insert(call_sid.clone(), session.clone());
        (session, true)
    }

    /// Insert a session that must not exist yet
    pub async fn insert_new(&self, session: CallSession) -> Option<SessionRef> {
        let call_sid = session.call_sid().clone();
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&call_sid) {
            return None;
        }
        let entry = Arc::new(Mutex::new(session));
        sessions.insert(call_sid, entry.clone());
        Some(entry)
    }

    /// Remove `call_sid` only if it still maps to `expected`
    pub async fn remove_if_same(&self, call_sid: &CallSid, expected: &SessionRef) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(call_sid) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                sessions.remove(call_sid);
                true
            }
            _ => false,
        }
    }

    /// Remove every session, for shutdown
    pub async fn drain(&self) -> Vec<SessionRef> {
        self.sessions.write().await.drain().map(|(_, s)| s).collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Views of every session, ordered by creation time
    pub async fn views(&self) -> Vec<CallSessionView> {
        let entries: Vec<SessionRef> = self.sessions.read().await.values().cloned().collect();

        let mut views = Vec::with_capacity(entries.len());
        for entry in entries {
            views.push(entry.lock().await.view());
        }
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        views
    }
}
