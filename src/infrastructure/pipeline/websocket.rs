//! External pipeline over WebSocket
//!
//! Each call opens one WebSocket to the pipeline service, authenticated with
//! a bearer key. JSON events flow both ways:
//!
//! - to the pipeline: `start` (call context), `media`, `dtmf`, `mark`
//! - from the pipeline: `media`, `clear`, `mark`, `hangup`
//!
//! Audio payloads are base64 in the encoding the provider announced.
//! Binary frames from the pipeline are taken as raw audio.

use crate::domain::pipeline::{
    ConversationPipeline, PipelineContext, PipelineError, PipelineInput, PipelineOutput,
    PipelineSession,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WebSocketPipelineConfig {
    pub url: String,
    pub api_key: String,
    pub agent: String,
    pub connect_timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ClientEvent {
    Start {
        call_sid: String,
        stream_sid: String,
        direction: String,
        from: String,
        to: String,
        agent: String,
        parameters: HashMap<String, String>,
        encoding: String,
        sample_rate: u32,
    },
    Media {
        payload: String,
        chunk: u64,
        timestamp: u64,
    },
    Dtmf {
        digit: String,
    },
    Mark {
        name: String,
    },
}

impl From<PipelineInput> for ClientEvent {
    fn from(input: PipelineInput) -> Self {
        match input {
            PipelineInput::Audio(frame) => ClientEvent::Media {
                payload: STANDARD.encode(&frame.payload),
                chunk: frame.chunk,
                timestamp: frame.timestamp_ms,
            },
            PipelineInput::Dtmf(digit) => ClientEvent::Dtmf { digit },
            PipelineInput::MarkPlayed(name) => ClientEvent::Mark { name },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ServerEvent {
    Media { payload: String },
    Clear,
    Mark { name: String },
    Hangup,
    #[serde(other)]
    Other,
}

pub struct WebSocketPipeline {
    config: WebSocketPipelineConfig,
}

impl WebSocketPipeline {
    pub fn new(config: WebSocketPipelineConfig) -> Self {
        Self { config }
    }
}

fn encode(event: &ClientEvent) -> Result<Message, PipelineError> {
    serde_json::to_string(event)
        .map(Message::Text)
        .map_err(|e| PipelineError::Rejected(e.to_string()))
}

fn decode(text: &str) -> Option<PipelineOutput> {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(ServerEvent::Media { payload }) => match STANDARD.decode(payload) {
            Ok(audio) => Some(PipelineOutput::Audio(Bytes::from(audio))),
            Err(e) => {
                warn!("Dropping pipeline audio with invalid base64: {}", e);
                None
            }
        },
        Ok(ServerEvent::Clear) => Some(PipelineOutput::Clear),
        Ok(ServerEvent::Mark { name }) => Some(PipelineOutput::Mark(name)),
        Ok(ServerEvent::Hangup) => Some(PipelineOutput::Hangup),
        Ok(ServerEvent::Other) => None,
        Err(e) => {
            warn!("Ignoring malformed pipeline message: {}", e);
            None
        }
    }
}

#[async_trait::async_trait]
impl ConversationPipeline for WebSocketPipeline {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn start(
        &self,
        context: PipelineContext,
        buffer: usize,
    ) -> Result<PipelineSession, PipelineError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| PipelineError::Connect(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| PipelineError::Connect(format!("invalid api key: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _) = timeout(self.config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                PipelineError::Connect(format!("timed out connecting to {}", self.config.url))
            })?
            .map_err(|e| PipelineError::Connect(e.to_string()))?;

        let (mut sink, mut stream) = socket.split();

        let call_sid = context.call_sid.clone();
        let start = ClientEvent::Start {
            call_sid: context.call_sid.to_string(),
            stream_sid: context.stream_sid.to_string(),
            direction: context.direction.as_str().to_string(),
            from: context.from,
            to: context.to,
            agent: self.config.agent.clone(),
            parameters: context.parameters,
            encoding: context.encoding,
            sample_rate: context.sample_rate,
        };
        sink.send(encode(&start)?)
            .await
            .map_err(|e| PipelineError::Rejected(e.to_string()))?;

        info!("Pipeline session opened for {}", call_sid);

        let (input_tx, mut input_rx) = mpsc::channel::<PipelineInput>(buffer);
        let (output_tx, output_rx) = mpsc::channel::<PipelineOutput>(buffer);

        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    input = input_rx.recv() => {
                        let Some(input) = input else {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        };
                        let message = match encode(&ClientEvent::from(input)) {
                            Ok(message) => message,
                            Err(e) => {
                                warn!("Failed to encode pipeline input: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(message).await {
                            warn!("Pipeline connection for {} failed: {}", call_sid, e);
                            break;
                        }
                    }

                    message = stream.next() => {
                        let output = match message {
                            Some(Ok(Message::Text(text))) => decode(&text),
                            Some(Ok(Message::Binary(audio))) => {
                                Some(PipelineOutput::Audio(Bytes::from(audio)))
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => None,
                            Some(Err(e)) => {
                                warn!("Pipeline connection for {} failed: {}", call_sid, e);
                                break;
                            }
                        };
                        if let Some(output) = output {
                            if output_tx.send(output).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            debug!("Pipeline session for {} closed", call_sid);
        });

        Ok(PipelineSession::new(input_tx, output_rx, Some(worker)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::CallDirection;
    use crate::domain::pipeline::AudioFrame;
    use crate::domain::shared::value_objects::{CallSid, StreamSid};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    fn context() -> PipelineContext {
        let mut parameters = HashMap::new();
        parameters.insert("agent".to_string(), "receptionist".to_string());
        PipelineContext {
            call_sid: CallSid::parse("CA1").unwrap(),
            stream_sid: StreamSid::new("MZ1"),
            direction: CallDirection::Inbound,
            from: "+15550001111".to_string(),
            to: "+15550002222".to_string(),
            parameters,
            encoding: "audio/x-mulaw".to_string(),
            sample_rate: 8000,
        }
    }

    fn config(url: String) -> WebSocketPipelineConfig {
        WebSocketPipelineConfig {
            url,
            api_key: "test-key".to_string(),
            agent: "receptionist".to_string(),
            connect_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let auth_header = Arc::new(Mutex::new(None::<String>));

        let seen = auth_header.clone();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_hdr_async(
                tcp,
                |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    *seen.lock().unwrap() = req
                        .headers()
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    Ok(resp)
                },
            )
            .await
            .unwrap();

            let start = ws.next().await.unwrap().unwrap().into_text().unwrap();
            let start: serde_json::Value = serde_json::from_str(&start).unwrap();
            assert_eq!(start["event"], "start");
            assert_eq!(start["call_sid"], "CA1");
            assert_eq!(start["parameters"]["agent"], "receptionist");

            let media = ws.next().await.unwrap().unwrap().into_text().unwrap();
            let media: serde_json::Value = serde_json::from_str(&media).unwrap();
            assert_eq!(media["event"], "media");
            assert_eq!(media["payload"], "AAEC");

            ws.send(Message::Text(r#"{"event":"media","payload":"AwQF"}"#.to_string()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"event":"clear"}"#.to_string()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"event":"hangup"}"#.to_string()))
                .await
                .unwrap();
        });

        let pipeline = WebSocketPipeline::new(config(format!("ws://{}/pipeline", addr)));
        let mut session = pipeline.start(context(), 8).await.unwrap();

        session
            .input
            .send(PipelineInput::Audio(AudioFrame {
                payload: Bytes::from_static(&[0, 1, 2]),
                chunk: 1,
                timestamp_ms: 20,
            }))
            .await
            .unwrap();

        assert_eq!(
            session.output.recv().await,
            Some(PipelineOutput::Audio(Bytes::from_static(&[3, 4, 5])))
        );
        assert_eq!(session.output.recv().await, Some(PipelineOutput::Clear));
        assert_eq!(session.output.recv().await, Some(PipelineOutput::Hangup));

        server.await.unwrap();
        assert_eq!(
            auth_header.lock().unwrap().as_deref(),
            Some("Bearer test-key")
        );
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let pipeline = WebSocketPipeline::new(config("ws://127.0.0.1:9/pipeline".to_string()));
        assert!(matches!(
            pipeline.start(context(), 8).await,
            Err(PipelineError::Connect(_))
        ));
    }

    #[test]
    fn test_decode_ignores_unknown_events() {
        assert_eq!(decode(r#"{"event":"transcript","text":"hi"}"#), None);
        assert_eq!(decode("not json"), None);
        assert_eq!(
            decode(r#"{"event":"mark","name":"m1"}"#),
            Some(PipelineOutput::Mark("m1".to_string()))
        );
    }
}
