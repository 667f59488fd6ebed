//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects to fulfill use cases:
//! - Answering call notifications and binding media streams
//! - Keeping the provider webhook pointed at the public endpoint
//! - Publishing call lifecycle events

pub mod call;
pub mod events;
pub mod registration;
pub mod session_table;
pub mod supervisor;

pub use call::{CallService, CallServiceConfig};
pub use events::EventBroadcaster;
pub use registration::{PhoneNumberTarget, WebhookRegistrar};
pub use supervisor::{EndpointSupervisor, SupervisorError};
