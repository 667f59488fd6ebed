//! Media stream attach and release

use super::{AttachError, CallService};
use crate::domain::call::{CallPhase, EndReason, MediaStreamHandle};
use crate::domain::pipeline::{PipelineContext, PipelineSession};
use crate::domain::shared::value_objects::{CallSid, StreamSid};
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Correlation data from the stream's `start` message
#[derive(Debug, Clone)]
pub struct StreamStart {
    pub call_sid: CallSid,
    pub stream_sid: StreamSid,
    pub parameters: HashMap<String, String>,
    pub encoding: String,
    pub sample_rate: u32,
}

/// A media stream bound to its call and a running pipeline session
pub struct AttachedStream {
    pub call_sid: CallSid,
    pub stream_sid: StreamSid,
    pub pipeline: PipelineSession,
    /// Flips to `true` when the call ends for any reason
    pub shutdown: watch::Receiver<bool>,
}

impl CallService {
    /// Bind a provider media stream to its bootstrapped call
    ///
    /// Rejections leave the session untouched. On success the call is
    /// `Active` and a pipeline session is running for it.
    pub async fn attach_stream(&self, start: StreamStart) -> Result<AttachedStream, AttachError> {
        let session_ref = self
            .sessions
            .get(&start.call_sid)
            .await
            .ok_or_else(|| AttachError::UnknownCall(start.call_sid.clone()))?;

        let (context, shutdown) = {
            let mut session = session_ref.lock().await;

            if let Some(existing) = session.stream_sid() {
                return Err(AttachError::StreamAlreadyAttached {
                    call_sid: start.call_sid.clone(),
                    existing: existing.clone(),
                });
            }
            if session.phase() != &CallPhase::Bootstrapped {
                return Err(AttachError::NotReady {
                    call_sid: start.call_sid.clone(),
                    phase: session.phase().to_string(),
                });
            }

            let (handle, shutdown) = MediaStreamHandle::new(start.stream_sid.clone());
            session.attach_stream(handle)?;

            let context = PipelineContext {
                call_sid: start.call_sid.clone(),
                stream_sid: start.stream_sid.clone(),
                direction: session.direction(),
                from: session.from().to_string(),
                to: session.to().to_string(),
                parameters: start.parameters,
                encoding: start.encoding,
                sample_rate: start.sample_rate,
            };

            let events = session.take_events();
            drop(session);
            self.events.publish_all(events);
            (context, shutdown)
        };

        info!(
            "Media stream {} attached to call {}",
            start.stream_sid, start.call_sid
        );

        match self.pipeline.start(context, self.config.frame_buffer).await {
            Ok(pipeline) => Ok(AttachedStream {
                call_sid: start.call_sid,
                stream_sid: start.stream_sid,
                pipeline,
                shutdown,
            }),
            Err(e) => {
                error!(
                    "Pipeline {} failed to start for call {}: {}",
                    self.pipeline.name(),
                    start.call_sid,
                    e
                );
                self.end_call(&start.call_sid, EndReason::PipelineFailed)
                    .await;
                Err(AttachError::Pipeline {
                    call_sid: start.call_sid,
                    source: e,
                })
            }
        }
    }

    /// The forwarding loop for `stream_sid` stopped
    ///
    /// Ends the call only if that stream is still the one attached to it.
    pub async fn stream_closed(
        &self,
        call_sid: &CallSid,
        stream_sid: &StreamSid,
        reason: EndReason,
    ) -> bool {
        let Some(session_ref) = self.sessions.get(call_sid).await else {
            return false;
        };

        {
            let session = session_ref.lock().await;
            if !session.owns_stream(stream_sid) {
                if !session.phase().is_terminal() {
                    warn!(
                        "Stream {} closed but call {} is bound to {:?}",
                        stream_sid,
                        call_sid,
                        session.stream_sid()
                    );
                }
                return false;
            }
        }

        self.end_call(call_sid, reason).await
    }
}
