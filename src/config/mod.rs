//! Configuration management
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then `VOXBRIDGE__SECTION__KEY` environment variables, then the provider
//! variable names the deployment scripts have always used
//! (`TWILIO_ACCOUNT_SID`, `NGROK_AUTHTOKEN`, `PIPECAT_PROXY_HOST`, ...).
//! A `.env` file in the working directory is loaded first.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Public host variable shared with the deployment scripts
pub const PROXY_HOST_VAR: &str = "PIPECAT_PROXY_HOST";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub twilio: TwilioSettings,
    pub tunnel: TunnelSettings,
    pub pipeline: PipelineSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7860,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwilioSettings {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub api_base: String,
    /// Incoming phone number to configure, by PN SID...
    pub phone_number_sid: Option<String>,
    /// ...or by E.164 number
    pub phone_number: Option<String>,
    /// Also set the "primary handler fails" webhook
    pub set_fallback: bool,
    /// Verify `X-Twilio-Signature` on webhooks
    pub validate_signatures: bool,
    pub request_timeout_secs: u64,
}

impl Default for TwilioSettings {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            api_base: "https://api.twilio.com".to_string(),
            phone_number_sid: None,
            phone_number: None,
            set_fallback: true,
            validate_signatures: false,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelMode {
    /// Public host is configured (`--proxy` / `PIPECAT_PROXY_HOST`)
    Fixed,
    /// Start the ngrok agent and discover its URL
    Ngrok,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    pub mode: TunnelMode,
    pub public_host: Option<String>,
    pub authtoken: Option<String>,
    pub region: Option<String>,
    pub agent_binary: String,
    /// Local inspection API of the agent
    pub agent_api: String,
    pub startup_timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            mode: TunnelMode::Fixed,
            public_host: None,
            authtoken: None,
            region: None,
            agent_binary: "ngrok".to_string(),
            agent_api: "http://127.0.0.1:4040".to_string(),
            startup_timeout_secs: 15,
            poll_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    /// Loop caller audio back; no AI provider involved
    Echo,
    /// Relay the call to an external pipeline over WebSocket
    Websocket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub kind: PipelineKind,
    pub url: Option<String>,
    pub api_key: Option<String>,
    /// Agent identity passed through to the media session
    pub agent: String,
    pub connect_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            kind: PipelineKind::Websocket,
            url: None,
            api_key: None,
            agent: "receptionist".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// How long an ended call stays queryable
    pub grace_window_secs: u64,
    /// Hard deadline for answering a call notification
    pub bootstrap_deadline_ms: u64,
    /// How long a new media socket may take to send its `start` message
    pub attach_timeout_secs: u64,
    /// How long a bootstrapped or dialing call may go without a media stream
    pub stream_deadline_secs: u64,
    /// Frames buffered towards the pipeline
    pub frame_buffer: usize,
    /// How long to wait for buffer space before giving up on the call
    pub backpressure_timeout_ms: u64,
    /// `<Pause>` after `<Connect>` in the control document
    pub pause_secs: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            grace_window_secs: 30,
            bootstrap_deadline_ms: 5_000,
            attach_timeout_secs: 10,
            stream_deadline_secs: 90,
            frame_buffer: 64,
            backpressure_timeout_ms: 500,
            pause_secs: 40,
        }
    }
}

impl SessionSettings {
    pub fn grace_window(&self) -> Duration {
        Duration::from_secs(self.grace_window_secs)
    }

    pub fn bootstrap_deadline(&self) -> Duration {
        Duration::from_millis(self.bootstrap_deadline_ms)
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_secs(self.attach_timeout_secs)
    }

    pub fn stream_deadline(&self) -> Duration {
        Duration::from_secs(self.stream_deadline_secs)
    }

    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }
}

/// What the process is about to do; decides which settings are required
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Run the service behind an already-configured public host
    Serve,
    /// Start the tunnel, register the webhook, run the service
    Setup,
}

impl Settings {
    /// Load settings from defaults, `path` (or `./voxbridge.toml`) and the
    /// environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("voxbridge").required(false),
        };

        let proxy_host = [PROXY_HOST_VAR, "PROXY_HOST", "NGROK_HOST"]
            .iter()
            .find_map(|name| non_empty_env(name));

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("VOXBRIDGE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("twilio.account_sid", non_empty_env("TWILIO_ACCOUNT_SID"))?
            .set_override_option("twilio.auth_token", non_empty_env("TWILIO_AUTH_TOKEN"))?
            .set_override_option("tunnel.authtoken", non_empty_env("NGROK_AUTHTOKEN"))?
            .set_override_option("tunnel.region", non_empty_env("NGROK_REGION"))?
            .set_override_option("tunnel.public_host", proxy_host)?
            .set_override_option("pipeline.api_key", non_empty_env("GOOGLE_API_KEY"))?
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Fail fast on anything required for `mode`
    pub fn validate(&self, mode: StartupMode) -> Result<(), ConfigError> {
        require(&self.twilio.account_sid, "twilio.account_sid (TWILIO_ACCOUNT_SID)")?;
        require(&self.twilio.auth_token, "twilio.auth_token (TWILIO_AUTH_TOKEN)")?;

        if self.pipeline.kind == PipelineKind::Websocket {
            require(&self.pipeline.url, "pipeline.url")?;
            require(&self.pipeline.api_key, "pipeline.api_key (GOOGLE_API_KEY)")?;
        }

        match (mode, self.tunnel.mode) {
            (StartupMode::Setup, TunnelMode::Ngrok) => {
                require(&self.tunnel.authtoken, "tunnel.authtoken (NGROK_AUTHTOKEN)")?;
            }
            (StartupMode::Serve, _) | (StartupMode::Setup, TunnelMode::Fixed) => {
                require(&self.tunnel.public_host, "tunnel.public_host (PIPECAT_PROXY_HOST)")?;
            }
        }

        if mode == StartupMode::Setup
            && self.twilio.phone_number_sid.is_none()
            && self.twilio.phone_number.is_none()
        {
            return Err(ConfigError::Missing(
                "twilio.phone_number_sid or twilio.phone_number (--sid / --number)",
            ));
        }

        if self.session.frame_buffer == 0 {
            return Err(ConfigError::Invalid {
                key: "session.frame_buffer",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.session.bootstrap_deadline_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "session.bootstrap_deadline_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.session.stream_deadline_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "session.stream_deadline_secs",
                reason: "must be positive".to_string(),
            });
        }

        Ok(())
    }
}

/// Record `host` as the public host in a dotenv file
///
/// Replaces an existing `PIPECAT_PROXY_HOST=` line or appends one, leaving
/// every other line alone. A missing file is created.
pub fn persist_proxy_host(path: &Path, host: &str) -> std::io::Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let entry = format!("{}={}", PROXY_HOST_VAR, host);
    let prefix = format!("{}=", PROXY_HOST_VAR);
    let mut replaced = false;
    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| {
            if line.trim_start().starts_with(&prefix) {
                replaced = true;
                entry.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(entry);
    }

    let mut content = lines.join("\n");
    content.push('\n');
    std::fs::write(path, content)
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn require(value: &Option<String>, name: &'static str) -> Result<(), ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(ConfigError::Missing(name)),
    }
}
