//! Media stream WebSocket (`GET /ws`)
//!
//! The provider opens one socket per call. Its `start` message carries the
//! CallSid that ties the socket to a bootstrapped session; from then on the
//! socket and the pipeline session are pumped in both directions until one
//! side stops or the call is ended from elsewhere.

use super::metrics_handler::record_stream_rejected;
use super::router::AppState;
use crate::application::call::{AttachedStream, StreamStart};
use crate::domain::call::EndReason;
use crate::domain::pipeline::{AudioFrame, PipelineInput, PipelineOutput};
use crate::domain::shared::value_objects::{CallSid, StreamSid};
use crate::infrastructure::twilio::{InboundMessage, OutboundMessage};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

type SocketSender = SplitSink<WebSocket, Message>;
type SocketReceiver = SplitStream<WebSocket>;

/// WebSocket handler
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_media_socket(socket, state))
}

async fn handle_media_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let attach_timeout = state.settings.session.attach_timeout();
    let start = match timeout(attach_timeout, wait_for_start(&mut receiver)).await {
        Ok(Ok(start)) => start,
        Ok(Err(reason)) => {
            warn!("Media stream rejected before start: {}", reason);
            record_stream_rejected("bad_start");
            close(&mut sender, close_code::PROTOCOL, reason).await;
            return;
        }
        Err(_) => {
            warn!("Media stream sent no start within {:?}", attach_timeout);
            record_stream_rejected("start_timeout");
            close(&mut sender, close_code::POLICY, "no start message").await;
            return;
        }
    };

    let attached = match state.calls.attach_stream(start).await {
        Ok(attached) => attached,
        Err(e) => {
            warn!("Media stream rejected: {}", e);
            record_stream_rejected(e.kind());
            close(&mut sender, close_code::POLICY, e.kind()).await;
            return;
        }
    };

    let call_sid = attached.call_sid.clone();
    let stream_sid = attached.stream_sid.clone();
    let backpressure = state.settings.session.backpressure_timeout();

    let reason = forward(&mut sender, &mut receiver, attached, backpressure).await;
    info!(
        "Media stream {} for call {} finished: {}",
        stream_sid,
        call_sid,
        reason.as_str()
    );

    state.calls.stream_closed(&call_sid, &stream_sid, reason).await;
    close(&mut sender, close_code::NORMAL, "call ended").await;
}

/// Read frames until the `start` message arrives
async fn wait_for_start(receiver: &mut SocketReceiver) -> Result<StreamStart, &'static str> {
    while let Some(message) = receiver.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => return Err("socket closed"),
            Ok(_) => continue,
        };

        match serde_json::from_str::<InboundMessage>(&text) {
            Ok(InboundMessage::Connected { protocol }) => {
                debug!("Media stream connected ({:?})", protocol);
            }
            Ok(InboundMessage::Start { stream_sid, start }) => {
                let call_sid = CallSid::parse(&start.call_sid).map_err(|_| "invalid callSid")?;
                if stream_sid.trim().is_empty() {
                    return Err("missing streamSid");
                }
                return Ok(StreamStart {
                    call_sid,
                    stream_sid: StreamSid::new(stream_sid),
                    parameters: start.custom_parameters,
                    encoding: start.media_format.encoding,
                    sample_rate: start.media_format.sample_rate,
                });
            }
            Ok(other) => debug!("Ignoring {:?} before start", other),
            Err(e) => {
                debug!("Garbled media stream frame: {}", e);
                return Err("garbled frame");
            }
        }
    }
    Err("socket closed")
}

/// Pump frames until the call is over; returns why it ended
async fn forward(
    sender: &mut SocketSender,
    receiver: &mut SocketReceiver,
    attached: AttachedStream,
    backpressure: Duration,
) -> EndReason {
    let AttachedStream {
        stream_sid,
        pipeline,
        mut shutdown,
        ..
    } = attached;
    let (input, mut output, _worker) = pipeline.into_parts();
    let sid = stream_sid.as_str().to_string();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Stream {} closed by call hangup", sid);
                    return EndReason::Hangup;
                }
            }

            outbound = output.recv() => {
                let message = match outbound {
                    Some(PipelineOutput::Audio(audio)) => OutboundMessage::media(&sid, &audio),
                    Some(PipelineOutput::Clear) => OutboundMessage::clear(&sid),
                    Some(PipelineOutput::Mark(name)) => OutboundMessage::mark(&sid, name),
                    Some(PipelineOutput::Hangup) | None => return EndReason::PipelineFinished,
                };
                if sender.send(Message::Text(message.to_json())).await.is_err() {
                    return EndReason::StreamClosed;
                }
            }

            inbound = receiver.next() => {
                let text = match inbound {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        return EndReason::StreamClosed;
                    }
                    Some(Ok(_)) => continue,
                };

                let input_frame = match serde_json::from_str::<InboundMessage>(&text) {
                    Ok(InboundMessage::Media { media, .. }) => {
                        if !media.is_inbound_track() {
                            continue;
                        }
                        match media.decode() {
                            Ok(payload) => PipelineInput::Audio(AudioFrame {
                                payload,
                                chunk: media.chunk_number(),
                                timestamp_ms: media.timestamp_ms(),
                            }),
                            Err(e) => {
                                warn!("Stream {}: undecodable media payload: {}", sid, e);
                                continue;
                            }
                        }
                    }
                    Ok(InboundMessage::Dtmf { dtmf, .. }) => PipelineInput::Dtmf(dtmf.digit),
                    Ok(InboundMessage::Mark { mark, .. }) => PipelineInput::MarkPlayed(mark.name),
                    Ok(InboundMessage::Stop { .. }) => return EndReason::StreamClosed,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Stream {}: garbled frame: {}", sid, e);
                        continue;
                    }
                };

                if let Some(reason) = deliver(&input, input_frame, backpressure).await {
                    return reason;
                }
            }
        }
    }
}

/// Hand one frame to the pipeline, waiting at most `backpressure`
async fn deliver(
    input: &mpsc::Sender<PipelineInput>,
    frame: PipelineInput,
    backpressure: Duration,
) -> Option<EndReason> {
    match input.send_timeout(frame, backpressure).await {
        Ok(()) => None,
        Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
            error!("Pipeline did not accept audio within {:?}", backpressure);
            Some(EndReason::Backpressure)
        }
        Err(mpsc::error::SendTimeoutError::Closed(_)) => Some(EndReason::PipelineFinished),
    }
}

async fn close(sender: &mut SocketSender, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}
