//! Command line

use crate::config::{Settings, TunnelMode};
use crate::domain::provider::ProviderError;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::PhoneNumber;
use crate::interface::api::dto::{ApiResponse, PlaceCallRequest};
use crate::interface::server::{self, RunError, SetupOptions};
use clap::{Args, Parser, Subcommand};
use reqwest::StatusCode;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "voxbridge", version, about = "Bridge phone calls to a conversational AI pipeline")]
pub struct Cli {
    /// Configuration file (defaults to ./voxbridge.toml when present)
    #[arg(long, global = true, env = "VOXBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the service behind an already configured public host
    Serve(ServeArgs),
    /// Start a tunnel, point the phone number's webhook at it and serve
    Setup(SetupArgs),
    /// Ask a running service to place an outbound call
    Call(CallArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Local port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Public host the provider reaches us at, e.g. abc.ngrok.io
    #[arg(long)]
    pub proxy: Option<String>,
}

#[derive(Args, Debug)]
pub struct SetupArgs {
    /// Local port to listen on and tunnel to
    #[arg(long)]
    pub port: Option<u16>,

    /// IncomingPhoneNumber SID (PN...)
    #[arg(long, conflicts_with = "number")]
    pub sid: Option<String>,

    /// Phone number in E.164 format, e.g. +16025550100
    #[arg(long)]
    pub number: Option<String>,

    /// Do not set the "primary handler fails" webhook
    #[arg(long)]
    pub no_fallback: bool,

    /// Configure the webhook and exit
    #[arg(long)]
    pub no_serve: bool,

    /// Record the public host as PIPECAT_PROXY_HOST in this dotenv file
    #[arg(long, num_args = 0..=1, default_missing_value = ".env")]
    pub write_env: Option<PathBuf>,

    /// Use this public host instead of starting ngrok
    #[arg(long)]
    pub proxy: Option<String>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Destination number (E.164)
    #[arg(long)]
    pub to: String,

    /// Caller ID, one of the account's numbers (E.164)
    #[arg(long)]
    pub from: String,

    /// Base URL of the running service
    #[arg(long)]
    pub server: Option<String>,
}

impl ServeArgs {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(proxy) = &self.proxy {
            settings.tunnel.public_host = Some(proxy.clone());
        }
        settings.tunnel.mode = TunnelMode::Fixed;
    }
}

impl SetupArgs {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(sid) = &self.sid {
            settings.twilio.phone_number_sid = Some(sid.clone());
            settings.twilio.phone_number = None;
        }
        if let Some(number) = &self.number {
            settings.twilio.phone_number = Some(number.clone());
            settings.twilio.phone_number_sid = None;
        }
        if self.no_fallback {
            settings.twilio.set_fallback = false;
        }
        match &self.proxy {
            Some(proxy) => {
                settings.tunnel.mode = TunnelMode::Fixed;
                settings.tunnel.public_host = Some(proxy.clone());
            }
            None => settings.tunnel.mode = TunnelMode::Ngrok,
        }
    }

    pub fn options(&self) -> SetupOptions {
        SetupOptions {
            serve: !self.no_serve,
            write_env: self.write_env.clone(),
        }
    }
}

/// Run the parsed command; returns the process exit status
pub async fn run(cli: Cli) -> u8 {
    let result = match Settings::load(cli.config.as_deref()) {
        Ok(mut settings) => match &cli.command {
            Command::Serve(args) => {
                args.apply(&mut settings);
                server::serve(settings).await
            }
            Command::Setup(args) => {
                args.apply(&mut settings);
                server::setup(settings, args.options()).await
            }
            Command::Call(args) => place_call(&settings, args).await,
        },
        Err(e) => Err(RunError::from(e)),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            e.exit_code()
        }
    }
}

async fn place_call(settings: &Settings, args: &CallArgs) -> Result<(), RunError> {
    // Refuse malformed numbers before touching the network
    PhoneNumber::parse(&args.to).map_err(RunError::InvalidNumber)?;
    PhoneNumber::parse(&args.from).map_err(RunError::InvalidNumber)?;

    let server = args
        .server
        .clone()
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", settings.server.port));
    let url = format!("{}/calls", server.trim_end_matches('/'));

    let response = reqwest::Client::new()
        .post(&url)
        .json(&PlaceCallRequest {
            to: args.to.clone(),
            from: args.from.clone(),
        })
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("failed to reach {}: {}", url, e))?;

    let status = response.status();
    let body: ApiResponse<serde_json::Value> = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("unreadable response from {}: {}", url, e))?;

    if status.is_success() {
        let call_sid = body
            .data
            .as_ref()
            .and_then(|data| data.get("call_sid"))
            .and_then(|sid| sid.as_str())
            .unwrap_or("?");
        info!("Call {} placed to {}", call_sid, args.to);
        println!("{}", call_sid);
        return Ok(());
    }

    let message = body.error.unwrap_or_else(|| status.to_string());
    Err(match status {
        StatusCode::UNPROCESSABLE_ENTITY => RunError::InvalidNumber(DomainError::ValidationError(message)),
        StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT | StatusCode::SERVICE_UNAVAILABLE => {
            RunError::Provider(ProviderError::Rejected {
                status: status.as_u16(),
                code: None,
                message,
            })
        }
        _ => RunError::Other(anyhow::anyhow!("service returned {}: {}", status, message)),
    })
}
