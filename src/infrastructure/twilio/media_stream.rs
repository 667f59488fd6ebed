//! Media stream wire messages
//!
//! JSON text frames exchanged with the provider on the media WebSocket.
//! Audio is 8 kHz mu-law, base64-encoded in `media.payload`. Counters
//! (`sequenceNumber`, `chunk`, `timestamp`) arrive as strings.

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Provider -> service
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundMessage {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartPayload,
    },
    Media {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        mark: MarkPayload,
    },
    Dtmf {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        dtmf: DtmfPayload,
    },
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StartPayload {
    #[serde(rename = "callSid")]
    pub call_sid: String,
    #[serde(rename = "accountSid", default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: HashMap<String, String>,
    #[serde(rename = "mediaFormat", default)]
    pub media_format: MediaFormat,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaFormat {
    pub encoding: String,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u32,
}

fn default_channels() -> u32 {
    1
}

impl Default for MediaFormat {
    fn default() -> Self {
        Self {
            encoding: "audio/x-mulaw".to_string(),
            sample_rate: 8000,
            channels: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub payload: String,
}

impl MediaPayload {
    pub fn decode(&self) -> Result<Bytes, base64::DecodeError> {
        STANDARD.decode(&self.payload).map(Bytes::from)
    }

    pub fn chunk_number(&self) -> u64 {
        parse_counter(self.chunk.as_deref())
    }

    pub fn timestamp_ms(&self) -> u64 {
        parse_counter(self.timestamp.as_deref())
    }

    /// Only caller audio is forwarded; outbound-track echoes are ignored
    pub fn is_inbound_track(&self) -> bool {
        match self.track.as_deref() {
            None => true,
            Some(track) => track.starts_with("inbound"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DtmfPayload {
    pub digit: String,
    #[serde(default)]
    pub track: Option<String>,
}

fn parse_counter(value: Option<&str>) -> u64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// Service -> provider
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMessage {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundMessage {
    pub fn media(stream_sid: &str, audio: &[u8]) -> Self {
        OutboundMessage::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: STANDARD.encode(audio),
            },
        }
    }

    pub fn mark(stream_sid: &str, name: impl Into<String>) -> Self {
        OutboundMessage::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkPayload { name: name.into() },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        OutboundMessage::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        // Plain string/struct fields always serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let raw = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "accountSid": "AC123",
                "streamSid": "MZ123",
                "callSid": "CA123",
                "tracks": ["inbound"],
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
                "customParameters": {"agent": "receptionist", "call_sid": "CA123"}
            },
            "streamSid": "MZ123"
        }"#;

        match serde_json::from_str::<InboundMessage>(raw).unwrap() {
            InboundMessage::Start { stream_sid, start } => {
                assert_eq!(stream_sid, "MZ123");
                assert_eq!(start.call_sid, "CA123");
                assert_eq!(start.media_format.sample_rate, 8000);
                assert_eq!(start.custom_parameters["agent"], "receptionist");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_media_and_decode() {
        let raw = r#"{"event":"media","sequenceNumber":"3","streamSid":"MZ1",
            "media":{"track":"inbound","chunk":"2","timestamp":"40","payload":"AAEC"}}"#;

        match serde_json::from_str::<InboundMessage>(raw).unwrap() {
            InboundMessage::Media { media, .. } => {
                assert_eq!(media.decode().unwrap().as_ref(), &[0u8, 1, 2]);
                assert_eq!(media.chunk_number(), 2);
                assert_eq!(media.timestamp_ms(), 40);
                assert!(media.is_inbound_track());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_connected_stop_and_unknown() {
        let connected: InboundMessage =
            serde_json::from_str(r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#)
                .unwrap();
        assert!(matches!(connected, InboundMessage::Connected { .. }));

        let stop: InboundMessage = serde_json::from_str(
            r#"{"event":"stop","sequenceNumber":"5","streamSid":"MZ1","stop":{"callSid":"CA1"}}"#,
        )
        .unwrap();
        assert!(matches!(stop, InboundMessage::Stop { .. }));

        let unknown: InboundMessage =
            serde_json::from_str(r#"{"event":"something-new","x":1}"#).unwrap();
        assert_eq!(unknown, InboundMessage::Unknown);
    }

    #[test]
    fn test_outbound_serialization() {
        let media = OutboundMessage::media("MZ1", &[0, 1, 2]).to_json();
        let value: serde_json::Value = serde_json::from_str(&media).unwrap();
        assert_eq!(value["event"], "media");
        assert_eq!(value["streamSid"], "MZ1");
        assert_eq!(value["media"]["payload"], "AAEC");

        let clear: serde_json::Value =
            serde_json::from_str(&OutboundMessage::clear("MZ1").to_json()).unwrap();
        assert_eq!(clear["event"], "clear");

        let mark: serde_json::Value =
            serde_json::from_str(&OutboundMessage::mark("MZ1", "utt-1").to_json()).unwrap();
        assert_eq!(mark["mark"]["name"], "utt-1");
    }
}
