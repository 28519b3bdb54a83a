//! msg-relay server
//!
//! Run with: cargo run --bin msg-relay -- --config relay.toml
//!
//! Without `--config` the default locations are searched (see
//! [`Config::load_default`]). `RELAY_*` environment variables override file
//! settings and `RUST_LOG` overrides the configured log level.

use anyhow::Context;
use clap::Parser;
use msg_relay::{Config, LoggingReset, RelayServer};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "msg-relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Relay JSON messages from TCP producers to WebSocket subscribers")]
struct Args {
    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP / WebSocket port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override the producer TCP port
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Serve this directory under /audio
    #[arg(long)]
    audio_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load_default(),
    };
    if let Some(port) = args.http_port {
        config.server.http_port = port;
    }
    if let Some(port) = args.tcp_port {
        config.ingest.tcp_port = port;
    }
    if let Some(dir) = args.audio_dir {
        config.server.audio_dir = Some(dir);
    }
    config.validate()?;

    msg_relay::logging::init(&config.logging);
    tracing::info!("Starting msg-relay v{}", env!("CARGO_PKG_VERSION"));

    let server = RelayServer::bind(&config, Arc::new(LoggingReset))
        .await
        .context("binding relay listeners")?;
    tracing::info!("Producers connect to {}", server.producer_addr()?);

    server.run(msg_relay::server::shutdown_signal()).await?;

    tracing::info!("msg-relay stopped");
    Ok(())
}
