use clap::Parser;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;
use voxbridge::interface::cli::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voxbridge=info,tower_http=info")),
        )
        .init();

    info!("Starting voxbridge {}", env!("CARGO_PKG_VERSION"));

    ExitCode::from(cli::run(cli).await)
}
