//! Process composition: wire settings into the service and run it

use crate::application::call::{CallService, CallServiceConfig};
use crate::application::events::EventBroadcaster;
use crate::application::registration::{PhoneNumberTarget, WebhookRegistrar};
use crate::application::supervisor::{EndpointSupervisor, SupervisorError};
use crate::config::{persist_proxy_host, ConfigError, Settings, StartupMode, TunnelMode};
use crate::domain::endpoint::PublicEndpoint;
use crate::domain::provider::{ProviderError, TelephonyProvider};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::PhoneNumber;
use crate::infrastructure::pipeline::build_pipeline;
use crate::infrastructure::tunnel::{FixedTunnel, NgrokConfig, NgrokTunnel, Tunnel, TunnelError};
use crate::infrastructure::twilio::TwilioClient;
use crate::interface::api::{build_router, init_metrics, spawn_event_metrics, AppState};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid phone number: {0}")]
    InvalidNumber(DomainError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<SupervisorError> for RunError {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::Tunnel(e) => RunError::Tunnel(e),
            SupervisorError::Registration(e) => RunError::Provider(e),
        }
    }
}

impl RunError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Config(_) | RunError::InvalidNumber(_) => 2,
            RunError::Tunnel(_) => 3,
            RunError::Provider(_) => 4,
            RunError::Other(_) => 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    /// Keep running the service after the webhook is configured
    pub serve: bool,
    /// Dotenv file to record the public host in
    pub write_env: Option<PathBuf>,
}

/// Run behind a public host someone else keeps pointed at us
pub async fn serve(settings: Settings) -> Result<(), RunError> {
    settings.validate(StartupMode::Serve)?;

    let provider = twilio_client(&settings)?;
    let tunnel = FixedTunnel::new(public_host(&settings)?)?;
    let endpoint = PublicEndpoint::unmanaged();
    let mut supervisor = EndpointSupervisor::new(
        Box::new(tunnel),
        endpoint.clone(),
        None,
        poll_interval(&settings),
    );
    supervisor.bring_up().await?;

    run_service(settings, endpoint, provider, supervisor).await
}

/// Bring up the tunnel, register the webhook, then (optionally) serve
pub async fn setup(settings: Settings, options: SetupOptions) -> Result<(), RunError> {
    settings.validate(StartupMode::Setup)?;

    let provider = twilio_client(&settings)?;
    let registrar = WebhookRegistrar::new(
        provider.clone(),
        phone_target(&settings)?,
        settings.twilio.set_fallback,
    );
    let endpoint = PublicEndpoint::managed();
    let mut supervisor = EndpointSupervisor::new(
        build_tunnel(&settings)?,
        endpoint.clone(),
        Some(registrar),
        poll_interval(&settings),
    );
    let snapshot = supervisor.bring_up().await?;

    if let Some(path) = &options.write_env {
        persist_proxy_host(path, &snapshot.authority())
            .with_context(|| format!("failed to update {}", path.display()))?;
        info!("Recorded public host {} in {}", snapshot.authority(), path.display());
    }

    if !options.serve {
        if settings.tunnel.mode == TunnelMode::Ngrok {
            warn!("Exiting stops the ngrok agent; the webhook will point at a dead host");
        }
        info!("Webhook configured for {}", snapshot.base());
        return Ok(());
    }

    run_service(settings, endpoint, provider, supervisor).await
}

async fn run_service(
    settings: Settings,
    endpoint: PublicEndpoint,
    provider: Arc<dyn TelephonyProvider>,
    supervisor: EndpointSupervisor,
) -> Result<(), RunError> {
    info!("Initializing Prometheus metrics exporter");
    let prometheus_handle = init_metrics().context("failed to install metrics recorder")?;

    let pipeline = build_pipeline(&settings.pipeline)?;
    let events = EventBroadcaster::default();
    spawn_event_metrics(&events);

    let calls = Arc::new(CallService::new(
        endpoint,
        provider,
        pipeline,
        events,
        CallServiceConfig::from(&settings),
    ));
    info!("Call service ready (pipeline: {})", calls.pipeline_name());

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let state = AppState {
        calls: calls.clone(),
        settings: Arc::new(settings),
    };
    let app = build_router(state, prometheus_handle);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor_task = tokio::spawn(supervisor.run(shutdown_rx));

    info!("Listening on {}", addr);

    let shutdown_calls = calls.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down...");
            // Ending the calls lets their media sockets finish
            shutdown_calls.shutdown().await;
        })
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    let _ = supervisor_task.await;
    calls.shutdown().await;
    info!("Stopped");
    Ok(())
}

fn twilio_client(settings: &Settings) -> Result<Arc<dyn TelephonyProvider>, RunError> {
    let twilio = &settings.twilio;
    let account_sid = twilio
        .account_sid
        .as_deref()
        .ok_or(ConfigError::Missing("twilio.account_sid (TWILIO_ACCOUNT_SID)"))?;
    let auth_token = twilio
        .auth_token
        .as_deref()
        .ok_or(ConfigError::Missing("twilio.auth_token (TWILIO_AUTH_TOKEN)"))?;

    let client = TwilioClient::new(
        twilio.api_base.as_str(),
        account_sid,
        auth_token,
        Duration::from_secs(twilio.request_timeout_secs),
    )?;
    Ok(Arc::new(client))
}

fn public_host(settings: &Settings) -> Result<&str, ConfigError> {
    settings
        .tunnel
        .public_host
        .as_deref()
        .ok_or(ConfigError::Missing("tunnel.public_host (PIPECAT_PROXY_HOST)"))
}

fn build_tunnel(settings: &Settings) -> Result<Box<dyn Tunnel>, RunError> {
    let tunnel = &settings.tunnel;
    match tunnel.mode {
        TunnelMode::Fixed => Ok(Box::new(FixedTunnel::new(public_host(settings)?)?)),
        TunnelMode::Ngrok => Ok(Box::new(NgrokTunnel::new(NgrokConfig {
            binary: tunnel.agent_binary.clone(),
            port: settings.server.port,
            authtoken: tunnel.authtoken.clone(),
            region: tunnel.region.clone(),
            agent_api: tunnel.agent_api.clone(),
            startup_timeout: Duration::from_secs(tunnel.startup_timeout_secs),
        }))),
    }
}

fn phone_target(settings: &Settings) -> Result<PhoneNumberTarget, RunError> {
    if let Some(sid) = &settings.twilio.phone_number_sid {
        return Ok(PhoneNumberTarget::Sid(sid.clone()));
    }
    let number = settings.twilio.phone_number.as_deref().ok_or(ConfigError::Missing(
        "twilio.phone_number_sid or twilio.phone_number (--sid / --number)",
    ))?;
    PhoneNumber::parse(number)
        .map(PhoneNumberTarget::Number)
        .map_err(RunError::InvalidNumber)
}

fn poll_interval(settings: &Settings) -> Duration {
    Duration::from_secs(settings.tunnel.poll_interval_secs.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunError::from(ConfigError::Missing("x")).exit_code(), 2);
        assert_eq!(
            RunError::InvalidNumber(DomainError::ValidationError("x".to_string())).exit_code(),
            2
        );
        assert_eq!(RunError::from(TunnelError::Timeout(15)).exit_code(), 3);
        assert_eq!(
            RunError::from(SupervisorError::Registration(ProviderError::NumberNotFound(
                "+16025550100".to_string()
            )))
            .exit_code(),
            4
        );
        assert_eq!(RunError::from(anyhow::anyhow!("bind")).exit_code(), 1);
    }

    #[test]
    fn test_phone_target() {
        let mut settings = Settings::default();
        settings.twilio.phone_number = Some("+16025550100".to_string());
        assert!(matches!(
            phone_target(&settings),
            Ok(PhoneNumberTarget::Number(_))
        ));

        settings.twilio.phone_number_sid = Some("PN1".to_string());
        assert_eq!(
            phone_target(&settings).unwrap(),
            PhoneNumberTarget::Sid("PN1".to_string())
        );

        settings.twilio.phone_number_sid = None;
        settings.twilio.phone_number = Some("6025550100".to_string());
        assert!(matches!(
            phone_target(&settings),
            Err(RunError::InvalidNumber(_))
        ));
    }

    #[tokio::test]
    async fn test_serve_fails_fast_without_credentials() {
        let err = serve(Settings::default()).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
