//! voxbridge - Bridge phone calls to a conversational AI pipeline
//!
//! Answers Twilio call notifications with a media-stream document, binds the
//! resulting media WebSocket to its call and relays audio to an external
//! speech/LLM pipeline. Layered the Domain-Driven Design way: domain model,
//! application services, infrastructure adapters and interfaces.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
