//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - The call session aggregate and its lifecycle state machine
//! - The versioned public endpoint
//! - Ports for the telephony provider and the AI pipeline

pub mod call;
pub mod endpoint;
pub mod pipeline;
pub mod provider;
pub mod shared;

// Re-export commonly used types
pub use shared::{DomainError, Result};
