//! Necho Node - real-time messenger server.

use anyhow::Context;
use clap::Parser;
use necho_node::api::{create_router, AppState};
use necho_node::config::NodeConfig;
use necho_node::demo;
use necho_node::observability::{init_logging, LogFormat};
use necho_realtime::MemoryStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use validator::Validate;

/// Necho Node - real-time messenger server
#[derive(Parser, Debug)]
#[command(name = "necho-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API listen address
    #[arg(long)]
    api_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Maximum concurrent WebSocket connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Create a demo user and print its token (repeatable)
    #[arg(long = "demo-user")]
    demo_users: Vec<String>,
}

impl Args {
    fn apply(self, mut config: NodeConfig) -> NodeConfig {
        if let Some(addr) = self.api_addr {
            config.api_addr = addr;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        config.demo_users.extend(self.demo_users);
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = NodeConfig::load(args.config.as_deref()).context("loading configuration")?;
    let config = args.apply(config);
    config.validate().context("invalid configuration")?;

    init_logging(&config.log_level, LogFormat::parse(&config.log_format));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Necho node");
    tracing::info!(
        api_addr = %config.api_addr,
        max_connections = config.max_connections,
        "Node configuration"
    );

    let store = Arc::new(MemoryStore::new());
    for account in demo::seed(&store, &config.demo_users, config.demo_chat)? {
        tracing::info!(
            username = %account.user.username,
            user_id = %account.user.id,
            token = %account.token,
            "Demo account"
        );
    }

    let app = create_router(AppState::new(store, config.max_connections));
    let listener = tokio::net::TcpListener::bind(config.api_addr)
        .await
        .with_context(|| format!("binding {}", config.api_addr))?;
    tracing::info!(addr = %config.api_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Necho node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
