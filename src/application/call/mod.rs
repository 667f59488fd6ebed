//! Call use cases
//!
//! [`CallService`] owns the session table and drives every call through
//! bootstrap, media attach and hangup. The interface layer turns provider
//! webhooks and sockets into calls on this service.

mod bootstrap;
mod lifecycle;
mod media;
mod outbound;

pub use bootstrap::{BootstrapOutcome, CallNotification};
pub use lifecycle::StatusOutcome;
pub use media::{AttachedStream, StreamStart};

use crate::application::events::EventBroadcaster;
use crate::application::session_table::SessionTable;
use crate::config::Settings;
use crate::domain::endpoint::PublicEndpoint;
use crate::domain::pipeline::{ConversationPipeline, PipelineError};
use crate::domain::provider::{ProviderError, TelephonyProvider};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{CallSid, StreamSid};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why a call notification could not be answered with a media stream
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("call notification has no CallSid")]
    MissingCallSid,

    #[error("invalid CallSid: {0}")]
    InvalidCallSid(DomainError),

    #[error("public endpoint is stale: {0}")]
    StaleEndpoint(String),

    #[error("call {0} has already ended")]
    CallEnded(CallSid),

    #[error("bootstrap did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Why a media stream was refused
#[derive(Error, Debug)]
pub enum AttachError {
    #[error("no session for call {0}")]
    UnknownCall(CallSid),

    #[error("call {call_sid} is {phase}, not ready for a media stream")]
    NotReady { call_sid: CallSid, phase: String },

    #[error("call {call_sid} already has media stream {existing}")]
    StreamAlreadyAttached {
        call_sid: CallSid,
        existing: StreamSid,
    },

    #[error("pipeline failed to start for call {call_sid}: {source}")]
    Pipeline {
        call_sid: CallSid,
        #[source]
        source: PipelineError,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl AttachError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            AttachError::UnknownCall(_) => "unknown_call",
            AttachError::NotReady { .. } => "not_ready",
            AttachError::StreamAlreadyAttached { .. } => "duplicate_stream",
            AttachError::Pipeline { .. } => "pipeline",
            AttachError::Domain(_) => "invalid_state",
        }
    }
}

#[derive(Error, Debug)]
pub enum OutboundCallError {
    #[error("invalid phone number: {0}")]
    InvalidNumber(DomainError),

    #[error("no routable public endpoint: {0}")]
    NoEndpoint(DomainError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Tunables for [`CallService`]
#[derive(Debug, Clone)]
pub struct CallServiceConfig {
    /// How long an ended call stays in the table
    pub grace_window: Duration,
    pub bootstrap_deadline: Duration,
    /// How long a set-up call may wait for its media stream
    pub stream_deadline: Duration,
    pub frame_buffer: usize,
    pub pause_secs: u32,
    /// Agent identity passed to the media session
    pub agent: String,
}

impl Default for CallServiceConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for CallServiceConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            grace_window: settings.session.grace_window(),
            bootstrap_deadline: settings.session.bootstrap_deadline(),
            stream_deadline: settings.session.stream_deadline(),
            frame_buffer: settings.session.frame_buffer,
            pause_secs: settings.session.pause_secs,
            agent: settings.pipeline.agent.clone(),
        }
    }
}

pub struct CallService {
    sessions: Arc<SessionTable>,
    endpoint: PublicEndpoint,
    provider: Arc<dyn TelephonyProvider>,
    pipeline: Arc<dyn ConversationPipeline>,
    events: EventBroadcaster,
    config: CallServiceConfig,
}

impl CallService {
    pub fn new(
        endpoint: PublicEndpoint,
        provider: Arc<dyn TelephonyProvider>,
        pipeline: Arc<dyn ConversationPipeline>,
        events: EventBroadcaster,
        config: CallServiceConfig,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionTable::new()),
            endpoint,
            provider,
            pipeline,
            events,
            config,
        }
    }

    pub fn endpoint(&self) -> &PublicEndpoint {
        &self.endpoint
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn config(&self) -> &CallServiceConfig {
        &self.config
    }

    pub fn pipeline_name(&self) -> &'static str {
        self.pipeline.name()
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::domain::endpoint::normalize_public_url;
    use crate::domain::provider::MockTelephonyProvider;
    use crate::infrastructure::pipeline::EchoPipeline;

    /// Service whose provider accepts any hangup
    pub fn service(endpoint: PublicEndpoint) -> CallService {
        let mut provider = MockTelephonyProvider::new();
        provider.expect_hangup_call().returning(|_| Ok(()));
        service_with_provider(endpoint, provider)
    }

    pub fn service_with_provider(
        endpoint: PublicEndpoint,
        provider: MockTelephonyProvider,
    ) -> CallService {
        CallService::new(
            endpoint,
            Arc::new(provider),
            Arc::new(EchoPipeline::new()),
            EventBroadcaster::default(),
            CallServiceConfig::default(),
        )
    }

    /// Bind the service's endpoint to `host`
    pub fn snapshot_url(service: &CallService, host: &str) {
        let snapshot = service
            .endpoint()
            .rotate(normalize_public_url(host).unwrap());
        service.endpoint().mark_registered(snapshot.version());
    }

    /// Run an inbound notification for `call_sid` through bootstrap
    pub async fn bootstrapped(service: &CallService, call_sid: &str) -> CallSid {
        let host = service.endpoint().current().unwrap().authority();
        service
            .bootstrap(CallNotification {
                call_sid: Some(call_sid.to_string()),
                from: Some("+15550001111".to_string()),
                to: Some("+15550002222".to_string()),
                direction: Some("inbound".to_string()),
                request_host: Some(host),
            })
            .await
            .unwrap()
            .call_sid
    }
}
