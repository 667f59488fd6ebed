//! Call bounded context - manages the lifecycle of bridged calls

pub mod aggregate;
pub mod entity;
pub mod event;
pub mod value_object;

pub use aggregate::{CallSession, CallSessionView};
pub use entity::MediaStreamHandle;
pub use event::{CallEvent, CallEventKind};
pub use value_object::{CallDirection, CallPhase, EndReason};
