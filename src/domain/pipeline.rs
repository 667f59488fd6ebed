//! Conversational AI pipeline port
//!
//! The speech/LLM pipeline runs outside this crate. A call gets one
//! [`PipelineSession`]: a bounded input channel for caller audio and an
//! output channel for bot audio and control. Dropping the session releases
//! the pipeline.

use crate::domain::call::value_object::CallDirection;
use crate::domain::shared::value_objects::{CallSid, StreamSid};
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline connection failed: {0}")]
    Connect(String),

    #[error("pipeline rejected the session: {0}")]
    Rejected(String),
}

/// Who the pipeline is talking to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineContext {
    pub call_sid: CallSid,
    pub stream_sid: StreamSid,
    pub direction: CallDirection,
    pub from: String,
    pub to: String,
    /// Pass-through parameters from the call-control document
    pub parameters: HashMap<String, String>,
    /// Audio encoding announced by the provider, e.g. `audio/x-mulaw`
    pub encoding: String,
    pub sample_rate: u32,
}

/// One chunk of caller audio, as encoded on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub payload: Bytes,
    /// Provider chunk sequence
    pub chunk: u64,
    /// Milliseconds since the stream started
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineInput {
    Audio(AudioFrame),
    Dtmf(String),
    /// Provider finished playing the bot audio tagged with this mark
    MarkPlayed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutput {
    Audio(Bytes),
    /// Drop queued bot audio (barge-in)
    Clear,
    Mark(String),
    /// Pipeline wants the call to end
    Hangup,
}

/// Running pipeline instance bound to one call
pub struct PipelineSession {
    pub input: mpsc::Sender<PipelineInput>,
    pub output: mpsc::Receiver<PipelineOutput>,
    worker: WorkerGuard,
}

/// Aborts the pipeline worker task when dropped
#[derive(Debug, Default)]
pub struct WorkerGuard(Option<JoinHandle<()>>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if let Some(worker) = self.0.take() {
            worker.abort();
        }
    }
}

impl PipelineSession {
    pub fn new(
        input: mpsc::Sender<PipelineInput>,
        output: mpsc::Receiver<PipelineOutput>,
        worker: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            input,
            output,
            worker: WorkerGuard(worker),
        }
    }

    /// Split into channels and the worker guard; the worker lives as long as
    /// the guard does
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Sender<PipelineInput>,
        mpsc::Receiver<PipelineOutput>,
        WorkerGuard,
    ) {
        (self.input, self.output, self.worker)
    }
}

#[async_trait::async_trait]
pub trait ConversationPipeline: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start a pipeline session whose input channel holds `buffer` items
    async fn start(
        &self,
        context: PipelineContext,
        buffer: usize,
    ) -> Result<PipelineSession, PipelineError>;
}
