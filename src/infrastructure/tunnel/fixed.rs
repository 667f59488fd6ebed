//! Statically configured public host

use super::{Tunnel, TunnelError};
use crate::domain::endpoint::normalize_public_url;
use url::Url;

/// Public host managed outside this process (an already running ngrok,
/// a reverse proxy, a cloud load balancer)
pub struct FixedTunnel {
    url: Url,
}

impl FixedTunnel {
    pub fn new(public_host: &str) -> Result<Self, TunnelError> {
        let url = normalize_public_url(public_host)
            .map_err(|e| TunnelError::InvalidUrl(e.to_string()))?;
        Ok(Self { url })
    }
}

#[async_trait::async_trait]
impl Tunnel for FixedTunnel {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn start(&mut self) -> Result<Url, TunnelError> {
        Ok(self.url.clone())
    }

    async fn current_url(&self) -> Result<Url, TunnelError> {
        Ok(self.url.clone())
    }
}
