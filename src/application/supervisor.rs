//! Public endpoint supervision
//!
//! Brings the tunnel up, publishes its URL as an endpoint snapshot and keeps
//! the provider webhook pointed at it. The tunnel URL is polled; each new
//! URL becomes a new snapshot version and is re-registered once. Until the
//! registration succeeds the endpoint reports itself stale, so bootstrap
//! requests and outbound calls fail fast instead of routing to a dead host.

use crate::application::registration::WebhookRegistrar;
use crate::domain::endpoint::{normalize_public_url, EndpointSnapshot, PublicEndpoint, RegistrationState};
use crate::domain::provider::ProviderError;
use crate::infrastructure::tunnel::{Tunnel, TunnelError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};
use url::Url;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error("webhook registration failed: {0}")]
    Registration(#[from] ProviderError),
}

pub struct EndpointSupervisor {
    tunnel: Box<dyn Tunnel>,
    endpoint: PublicEndpoint,
    registrar: Option<WebhookRegistrar>,
    poll_interval: Duration,
    /// Snapshot version whose registration last failed
    failed_version: Option<u64>,
}

impl EndpointSupervisor {
    pub fn new(
        tunnel: Box<dyn Tunnel>,
        endpoint: PublicEndpoint,
        registrar: Option<WebhookRegistrar>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            tunnel,
            endpoint,
            registrar,
            poll_interval,
            failed_version: None,
        }
    }

    pub fn endpoint(&self) -> &PublicEndpoint {
        &self.endpoint
    }

    /// Start the tunnel and register the first snapshot
    ///
    /// Any failure here is fatal for startup.
    pub async fn bring_up(&mut self) -> Result<Arc<EndpointSnapshot>, SupervisorError> {
        info!("Starting {} tunnel", self.tunnel.name());
        let url = self.tunnel.start().await?;
        let snapshot = self.publish(url)?;
        info!("Public endpoint v{}: {}", snapshot.version(), snapshot.base());

        if let Some(registrar) = &self.registrar {
            registrar.register(&snapshot).await?;
            self.endpoint.mark_registered(snapshot.version());
        }
        Ok(snapshot)
    }

    /// Poll the tunnel once; rotate and re-register if its URL moved
    pub async fn check_once(&mut self) -> Result<Arc<EndpointSnapshot>, SupervisorError> {
        let url = self.tunnel.current_url().await?;
        let snapshot = self.publish(url)?;

        let Some(registrar) = &self.registrar else {
            return Ok(snapshot);
        };

        let up_to_date = self.endpoint.registration()
            == RegistrationState::Registered(snapshot.version());
        if up_to_date || self.failed_version == Some(snapshot.version()) {
            return Ok(snapshot);
        }

        warn!(
            "Public endpoint moved to {} (v{}), re-registering webhook",
            snapshot.base(),
            snapshot.version()
        );
        match registrar.register(&snapshot).await {
            Ok(_) => {
                self.endpoint.mark_registered(snapshot.version());
                self.failed_version = None;
                Ok(snapshot)
            }
            Err(e) => {
                self.failed_version = Some(snapshot.version());
                Err(e.into())
            }
        }
    }

    /// Keep checking until `shutdown` flips
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately; bring_up already covered it
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check_once().await {
                        error!("Endpoint check failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Endpoint supervisor stopped");
    }

    fn publish(&self, url: Url) -> Result<Arc<EndpointSnapshot>, SupervisorError> {
        let url = normalize_public_url(url.as_str())
            .map_err(|e| TunnelError::InvalidUrl(e.to_string()))?;
        Ok(self.endpoint.rotate(url))
    }
}
