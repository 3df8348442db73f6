//! # pulse-demo
//!
//! Pulse demo server binary — wires configuration, logging, metrics, and
//! the HTTP/SSE/WebSocket server, then runs until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pulse_server::config::ServerConfig;
use pulse_server::server::PulseServer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Pulse demo server.
#[derive(Parser, Debug)]
#[command(
    name = "pulse-demo",
    about = "Streams synthetic sensor readings over SSE and WebSocket for side-by-side comparison"
)]
struct Cli {
    /// Host to bind (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Generator tick period in milliseconds (overrides config).
    #[arg(long)]
    tick_interval_ms: Option<u64>,

    /// Per-tick probability of simulated packet loss (overrides config).
    #[arg(long)]
    loss_probability: Option<f64>,
}

impl Cli {
    /// Layer CLI flags over the loaded configuration.
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(tick) = self.tick_interval_ms {
            config.tick_interval_ms = tick;
        }
        if let Some(loss) = self.loss_probability {
            config.loss_probability = loss;
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing();

    let mut config = ServerConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    args.apply(&mut config);

    let metrics_handle = pulse_server::metrics::install_recorder();
    let server = PulseServer::new(config, metrics_handle);

    let (addr, handle) = server.listen().await.context("failed to start server")?;
    info!("Pulse demo listening on http://{addr}");
    info!("dashboard http://{addr}/  sse http://{addr}/sse  stats http://{addr}/api/stats");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down...");
    server.shutdown();
    let _ = handle.await;
    info!("shutdown complete");
    Ok(())
}
