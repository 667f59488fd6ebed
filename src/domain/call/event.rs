//! Call domain events

use crate::domain::call::value_object::{CallDirection, EndReason};
use crate::domain::shared::events::{DomainEvent, EventMetadata};
use crate::domain::shared::value_objects::{CallSid, StreamSid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle event recorded by a [`CallSession`](super::CallSession)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEvent {
    pub metadata: EventMetadata,
    pub call_sid: CallSid,
    #[serde(flatten)]
    pub kind: CallEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEventKind {
    Created {
        direction: CallDirection,
        from: String,
        to: String,
    },
    Bootstrapped,
    StreamAttached {
        stream_sid: StreamSid,
    },
    Ended {
        reason: EndReason,
        duration_seconds: Option<i64>,
    },
    Purged,
}

impl CallEvent {
    pub fn new(call_sid: CallSid, kind: CallEventKind) -> Self {
        Self {
            metadata: EventMetadata::now(),
            call_sid,
            kind,
        }
    }
}

impl DomainEvent for CallEvent {
    fn event_type(&self) -> &'static str {
        match self.kind {
            CallEventKind::Created { .. } => "call.created",
            CallEventKind::Bootstrapped => "call.bootstrapped",
            CallEventKind::StreamAttached { .. } => "call.stream_attached",
            CallEventKind::Ended { .. } => "call.ended",
            CallEventKind::Purged => "call.purged",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata.occurred_at
    }
}
