//! Conversation pipeline adapters

pub mod echo;
pub mod websocket;

pub use echo::EchoPipeline;
pub use websocket::{WebSocketPipeline, WebSocketPipelineConfig};

use crate::config::{ConfigError, PipelineKind, PipelineSettings};
use crate::domain::pipeline::ConversationPipeline;
use std::sync::Arc;
use std::time::Duration;

/// Build the pipeline adapter selected by `settings`
pub fn build_pipeline(
    settings: &PipelineSettings,
) -> Result<Arc<dyn ConversationPipeline>, ConfigError> {
    match settings.kind {
        PipelineKind::Echo => Ok(Arc::new(EchoPipeline::new())),
        PipelineKind::Websocket => {
            let url = settings
                .url
                .clone()
                .ok_or(ConfigError::Missing("pipeline.url"))?;
            let api_key = settings
                .api_key
                .clone()
                .ok_or(ConfigError::Missing("pipeline.api_key (GOOGLE_API_KEY)"))?;

            Ok(Arc::new(WebSocketPipeline::new(WebSocketPipelineConfig {
                url,
                api_key,
                agent: settings.agent.clone(),
                connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            })))
        }
    }
}
