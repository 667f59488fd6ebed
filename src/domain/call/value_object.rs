//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Call direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// Caller dialed our provider number
    Inbound,
    /// We asked the provider to place the call
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }

    /// Map the provider's `Direction` webhook field
    ///
    /// Twilio reports `inbound`, `outbound-api` and `outbound-dial`.
    pub fn from_provider(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.starts_with("outbound") => CallDirection::Outbound,
            _ => CallDirection::Inbound,
        }
    }
}

/// Lifecycle phase of a call session
///
/// ```text
/// inbound:  Ringing -> Bootstrapped -> Active -> Ended
/// outbound: Dialing -> Bootstrapped -> Active -> Ended
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum CallPhase {
    /// Outbound call accepted by the provider, not yet answered
    Dialing,
    /// Inbound notification received
    Ringing,
    /// Call-control document handed to the provider
    Bootstrapped,
    /// Media stream attached and forwarding
    Active,
    /// Terminal
    Ended(EndReason),
}

impl CallPhase {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, next: &CallPhase) -> bool {
        use CallPhase::*;

        match (self, next) {
            (Dialing, Bootstrapped) => true,
            (Ringing, Bootstrapped) => true,
            (Bootstrapped, Active) => true,

            // Any live phase may end
            (Dialing | Ringing | Bootstrapped | Active, Ended(_)) => true,

            (Ended(_), _) => false,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallPhase::Ended(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallPhase::Dialing => "dialing",
            CallPhase::Ringing => "ringing",
            CallPhase::Bootstrapped => "bootstrapped",
            CallPhase::Active => "active",
            CallPhase::Ended(_) => "ended",
        }
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallPhase::Ended(reason) => write!(f, "ended({})", reason.as_str()),
            other => f.write_str(other.name()),
        }
    }
}

/// Reason for call ending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Provider reported the call completed
    Hangup,
    /// Media stream stopped or the socket closed
    StreamClosed,
    /// The AI pipeline finished or asked to hang up
    PipelineFinished,
    /// The AI pipeline could not be started or failed mid-call
    PipelineFailed,
    /// The pipeline did not drain audio fast enough
    Backpressure,
    /// Provider reported busy / no-answer / failed / canceled
    NotConnected(String),
    /// No media stream arrived in time after the call was set up
    NoStream,
    /// Service is shutting down
    Shutdown,
}

impl EndReason {
    pub fn as_str(&self) -> &str {
        match self {
            EndReason::Hangup => "hangup",
            EndReason::StreamClosed => "stream_closed",
            EndReason::PipelineFinished => "pipeline_finished",
            EndReason::PipelineFailed => "pipeline_failed",
            EndReason::Backpressure => "backpressure",
            EndReason::NotConnected(status) => status,
            EndReason::NoStream => "no_stream",
            EndReason::Shutdown => "shutdown",
        }
    }

    /// Whether the provider already knows the call is over
    ///
    /// Calls ended from our side must also be hung up at the provider, or the
    /// caller is left listening to the `<Pause>` that follows `<Connect>`.
    pub fn came_from_provider(&self) -> bool {
        matches!(
            self,
            EndReason::Hangup | EndReason::StreamClosed | EndReason::NotConnected(_)
        )
    }
}
