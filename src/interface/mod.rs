//! Interface layer - External interfaces
//!
//! This layer handles:
//! - Provider webhooks and the media stream WebSocket
//! - The operator REST API and event stream
//! - The command line

pub mod api;
pub mod cli;
pub mod server;
