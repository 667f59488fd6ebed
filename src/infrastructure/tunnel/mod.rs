//! Public tunnel drivers
//!
//! A tunnel produces the public base URL the provider reaches this process
//! at. The URL may change over the process lifetime (agent restart, free
//! plan reconnect), so callers poll [`Tunnel::current_url`].

pub mod fixed;
pub mod ngrok;

use thiserror::Error;
use url::Url;

pub use fixed::FixedTunnel;
pub use ngrok::{NgrokConfig, NgrokTunnel};

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("failed to start tunnel agent: {0}")]
    Spawn(String),

    #[error("tunnel agent exited: {0}")]
    Exited(String),

    #[error("tunnel did not come up within {0} seconds")]
    Timeout(u64),

    #[error("tunnel agent API error: {0}")]
    Agent(String),

    #[error("invalid tunnel URL: {0}")]
    InvalidUrl(String),
}

#[async_trait::async_trait]
pub trait Tunnel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bring the tunnel up and return its public base URL
    async fn start(&mut self) -> Result<Url, TunnelError>;

    /// Public base URL as currently reported by the tunnel
    async fn current_url(&self) -> Result<Url, TunnelError>;
}
