use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

mod shutdown;

use anyhow::Context;
use clap::Parser;
use peerlink_backend_lib::{config::Settings, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// WebRTC signaling relay for browser peers
#[derive(Debug, Parser)]
#[command(name = "peerlink-server", version)]
struct Cli {
    /// Configuration file (defaults to ./peerlink.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the configuration
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("failed to load configuration")?;
    if let Some(bind) = cli.bind {
        settings.bind_addr = bind;
    }

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = Arc::new(AppState::new(settings).context("failed to start signaling core")?);

    let addr = state.settings.bind_addr;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "PeerLink signaling server listening");

    let token = state.shutdown.clone();
    tokio::spawn(async move {
        shutdown::wait_for_signal().await;
        token.cancel();
    });

    peerlink_backend_lib::serve(listener, state).await?;
    tracing::info!("server stopped");

    Ok(())
}
