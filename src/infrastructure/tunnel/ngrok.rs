//! ngrok agent driver
//!
//! Runs `ngrok http <port>` as a child process and discovers the public URL
//! through the agent's local inspection API (`GET /api/tunnels`). The child
//! is killed when the tunnel is dropped.

use super::{Tunnel, TunnelError};
use crate::domain::endpoint::normalize_public_url;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use url::Url;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct NgrokConfig {
    pub binary: String,
    pub port: u16,
    pub authtoken: Option<String>,
    pub region: Option<String>,
    /// Base URL of the agent inspection API
    pub agent_api: String,
    pub startup_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TunnelList {
    #[serde(default)]
    tunnels: Vec<TunnelInfo>,
}

#[derive(Debug, Deserialize)]
struct TunnelInfo {
    public_url: String,
    #[serde(default)]
    proto: String,
}

pub struct NgrokTunnel {
    config: NgrokConfig,
    http: reqwest::Client,
    child: Option<Child>,
}

impl NgrokTunnel {
    pub fn new(config: NgrokConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            child: None,
        }
    }

    fn spawn(&self) -> Result<Child, TunnelError> {
        let mut command = Command::new(&self.config.binary);
        command
            .arg("http")
            .arg(self.config.port.to_string())
            .arg("--log")
            .arg("stdout")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        if let Some(token) = &self.config.authtoken {
            command.env("NGROK_AUTHTOKEN", token);
        }
        if let Some(region) = &self.config.region {
            command.arg("--region").arg(region);
        }

        command
            .spawn()
            .map_err(|e| TunnelError::Spawn(format!("{}: {}", self.config.binary, e)))
    }
}

/// Public HTTPS URL reported by the agent API at `agent_api`
pub(crate) async fn fetch_public_url(
    http: &reqwest::Client,
    agent_api: &str,
) -> Result<Url, TunnelError> {
    let endpoint = format!("{}/api/tunnels", agent_api.trim_end_matches('/'));
    let list: TunnelList = http
        .get(&endpoint)
        .timeout(Duration::from_secs(2))
        .send()
        .await
        .map_err(|e| TunnelError::Agent(e.to_string()))?
        .error_for_status()
        .map_err(|e| TunnelError::Agent(e.to_string()))?
        .json()
        .await
        .map_err(|e| TunnelError::Agent(e.to_string()))?;

    // The provider requires TLS on webhooks, so plain http tunnels are skipped
    let public_url = list
        .tunnels
        .iter()
        .find(|t| t.proto == "https" || t.public_url.starts_with("https://"))
        .map(|t| t.public_url.as_str())
        .ok_or_else(|| TunnelError::Agent("no https tunnel reported yet".to_string()))?;

    normalize_public_url(public_url).map_err(|e| TunnelError::InvalidUrl(e.to_string()))
}

#[async_trait::async_trait]
impl Tunnel for NgrokTunnel {
    fn name(&self) -> &'static str {
        "ngrok"
    }

    async fn start(&mut self) -> Result<Url, TunnelError> {
        info!(
            "Starting ngrok agent for port {} (region: {:?})",
            self.config.port, self.config.region
        );

        let mut child = self.spawn()?;
        let deadline = Instant::now() + self.config.startup_timeout;

        loop {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(TunnelError::Exited(format!(
                    "ngrok exited during startup with {}",
                    status
                )));
            }

            match fetch_public_url(&self.http, &self.config.agent_api).await {
                Ok(url) => {
                    info!("ngrok tunnel established: {}", url);
                    self.child = Some(child);
                    return Ok(url);
                }
                Err(e) => debug!("Waiting for ngrok tunnel: {}", e),
            }

            if Instant::now() >= deadline {
                warn!("ngrok did not report a tunnel in time, stopping agent");
                let _ = child.kill().await;
                return Err(TunnelError::Timeout(self.config.startup_timeout.as_secs()));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn current_url(&self) -> Result<Url, TunnelError> {
        fetch_public_url(&self.http, &self.config.agent_api).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(agent_api: String) -> NgrokConfig {
        NgrokConfig {
            binary: "/nonexistent/voxbridge-test/ngrok".to_string(),
            port: 7860,
            authtoken: Some("token".to_string()),
            region: None,
            agent_api,
            startup_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_prefers_https_tunnel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tunnels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tunnels": [
                    {"name": "command_line (http)", "public_url": "http://abc.ngrok-free.app", "proto": "http"},
                    {"name": "command_line", "public_url": "https://abc.ngrok-free.app", "proto": "https"}
                ]
            })))
            .mount(&server)
            .await;

        let tunnel = NgrokTunnel::new(config(server.uri()));
        let url = tunnel.current_url().await.unwrap();
        assert_eq!(url.as_str(), "https://abc.ngrok-free.app/");
    }

    #[tokio::test]
    async fn test_no_https_tunnel_yet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tunnels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tunnels": []
            })))
            .mount(&server)
            .await;

        let tunnel = NgrokTunnel::new(config(server.uri()));
        assert!(matches!(
            tunnel.current_url().await,
            Err(TunnelError::Agent(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let mut tunnel = NgrokTunnel::new(config("http://127.0.0.1:9".to_string()));
        assert!(matches!(tunnel.start().await, Err(TunnelError::Spawn(_))));
    }
}
