//! desktop-gateway
//!
//! Connection front door for the desktop backend.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌────────────────────────────────────────────────────┐
//!                      │                  DESKTOP GATEWAY                   │
//!                      │                                                    │
//!   Client Request     │  ┌─────────┐   ┌──────────┐   ┌─────────────┐      │
//!   ───────────────────┼─▶│   net   │──▶│  server  │──▶│   routing   │──────┼──▶ Upstream
//!                      │  │listener │   │ (axum)   │   │ rule table  │      │
//!                      │  │  + TLS  │   └────┬─────┘   └──────┬──────┘      │
//!                      │  └─────────┘        │ upgrade        │ local       │
//!                      │                     ▼                ▼             │
//!                      │               ┌───────────┐   ┌─────────────┐      │
//!                      │               │ websocket │──▶│ normalizer  │      │
//!                      │               └───────────┘   └──────┬──────┘      │
//!                      │                                      ▼             │
//!   Client Response    │               ┌───────────┐   ┌─────────────┐      │
//!   ◀──────────────────┼───────────────│ responder │◀──│  processor  │      │
//!                      │               └───────────┘   └─────────────┘      │
//!                      └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use desktop_gateway::config::{load_config, GatewayConfig};
use desktop_gateway::lifecycle::signals::shutdown_signal;
use desktop_gateway::observability::{logging, metrics};
use desktop_gateway::{EchoProcessor, ServerContext};

#[derive(Debug, Parser)]
#[command(name = "desktop-gateway", version, about = "Desktop backend connection gateway")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on; overrides `listener.port`.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "desktop-gateway starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let port = cli.port.unwrap_or(config.listener.port);
    tracing::info!(
        host = %config.listener.host,
        port,
        proxy_rules = config.proxy.rules.len(),
        websocket = config.websocket.enabled,
        "Configuration loaded"
    );

    let mut context = ServerContext::init(config, EchoProcessor).await?;
    context.run(port).await?;

    shutdown_signal().await;
    context.destroy().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
