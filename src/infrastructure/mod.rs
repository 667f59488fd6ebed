//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - The Twilio REST client and wire formats
//! - Tunnel drivers (fixed host, ngrok agent)
//! - Conversation pipeline adapters

pub mod pipeline;
pub mod tunnel;
pub mod twilio;
