//! API interface implementations

pub mod calls_handler;
pub mod dto;
pub mod media_handler;
pub mod metrics_handler;
pub mod router;
pub mod webhook_handler;
pub mod ws_handler;

pub use metrics_handler::{init_metrics, spawn_event_metrics};
pub use router::{build_router, AppState};
pub use webhook_handler::{ROUTING_HEADER, ROUTING_STALE};
