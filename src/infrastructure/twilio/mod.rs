//! Twilio integration: REST client, call-control documents, webhook
//! signatures and the media stream wire format

pub mod client;
pub mod media_stream;
pub mod signature;
pub mod twiml;

pub use client::TwilioClient;
pub use media_stream::{InboundMessage, OutboundMessage};
pub use twiml::{empty_document, fallback_document, StreamDocument};
