//! Loopback pipeline
//!
//! Plays the caller's audio straight back. Useful for checking the phone
//! number, tunnel and webhook wiring without an AI provider.

use crate::domain::pipeline::{
    ConversationPipeline, PipelineContext, PipelineError, PipelineInput, PipelineOutput,
    PipelineSession,
};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct EchoPipeline;

impl EchoPipeline {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ConversationPipeline for EchoPipeline {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn start(
        &self,
        context: PipelineContext,
        buffer: usize,
    ) -> Result<PipelineSession, PipelineError> {
        let (input_tx, mut input_rx) = mpsc::channel(buffer);
        let (output_tx, output_rx) = mpsc::channel(buffer);

        let call_sid = context.call_sid.clone();
        let worker = tokio::spawn(async move {
            while let Some(input) = input_rx.recv().await {
                let output = match input {
                    PipelineInput::Audio(frame) => PipelineOutput::Audio(frame.payload),
                    PipelineInput::Dtmf(digit) => PipelineOutput::Mark(format!("dtmf-{}", digit)),
                    PipelineInput::MarkPlayed(_) => continue,
                };
                if output_tx.send(output).await.is_err() {
                    break;
                }
            }
            debug!("Echo pipeline for {} finished", call_sid);
        });

        Ok(PipelineSession::new(input_tx, output_rx, Some(worker)))
    }
}
