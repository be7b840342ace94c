//! ctxchat-server: broadcast chat over WebSocket.
//!
//! Accepts WebSocket connections and runs every client through the
//! context-layered chat engine on a single event thread.

mod config;
mod events;
mod server;
mod transport;

use clap::Parser;
use config::ServerConfig;
use ctxchat_core::ProtocolVersion;
use server::ChatServer;
use std::path::PathBuf;
use tracing::{error, info};

/// ctxchat-server — broadcast chat server
#[derive(Parser, Debug)]
#[command(name = "ctxchat-server", version, about = "Broadcast chat server")]
struct Cli {
    /// Listen address
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Wire protocol version (v1, v2, none)
    #[arg(long)]
    protocol: Option<ProtocolVersion>,

    /// Config file path
    #[arg(long, default_value = "~/.ctxchat/config.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Config is read before tracing starts so its debug flag can pick the level.
    let config_path = PathBuf::from(&cli.config);
    let config = ServerConfig::load(
        Some(&config_path),
        cli.host.as_deref(),
        cli.port,
        cli.protocol,
        cli.debug,
    );

    let level = match &config {
        Ok(cfg) if cfg.debug => "debug",
        _ => cli.log_level.as_str(),
    };
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    match &config.source {
        Some(path) => info!(path = %path.display(), "loaded config file"),
        None => info!(path = %config_path.display(), "config file not found, using defaults"),
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        protocol = %config.protocol,
        "starting ctxchat-server"
    );

    let chat_server = ChatServer::new(config);

    let shutdown = async {
        shutdown_signal().await;
        info!("received shutdown signal");
    };
    if let Err(e) = chat_server.run(shutdown).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("ctxchat-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
