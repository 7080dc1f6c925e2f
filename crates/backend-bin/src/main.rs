// ============================
// crates/backend-bin/src/main.rs
// ============================
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use chatroom_backend::{
    config::{load_settings_from, StorageBackend, CONFIG_FILE},
    ws_router, AppState,
};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Real-time chat room server
#[derive(Parser, Debug)]
#[command(name = "chatroom-server", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "CHATROOM_CONFIG", default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Override the configured listen address
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Keep rooms and messages in memory only
    #[arg(long)]
    memory: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings_from(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    if let Some(bind) = cli.bind {
        settings.bind_addr = bind;
    }
    if cli.memory {
        settings.storage = StorageBackend::Memory;
    }

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.to_ascii_lowercase()));
    if cli.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let addr = settings.bind_addr;
    let state = AppState::from_settings(settings).context("initialising storage")?;
    let app = ws_router::create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
