//! Valkey cache gateway.
//!
//! Exposes a small key/value HTTP API backed by a Redis-protocol store,
//! with pooled connections, retries and a circuit breaker in between.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                    CACHE GATEWAY                     │
//!                      │                                                      │
//!   HTTP request       │  ┌─────────┐   ┌─────────┐   ┌────────────────────┐  │
//!   ───────────────────┼─▶│  http   │──▶│  cache  │──▶│     resilience     │  │
//!                      │  │ server  │   │ facade  │   │ breaker ▸ retries  │  │
//!                      │  └─────────┘   └─────────┘   └─────────┬──────────┘  │
//!                      │                                        │             │
//!                      │                                        ▼             │
//!                      │                 ┌──────────┐   ┌──────────────┐      │
//!                      │                 │ executor │◀──│     pool     │      │   Redis /
//!                      │                 │ deadline │   │ lease ▸ conn │──────┼─▶ Valkey
//!                      │                 └──────────┘   └──────────────┘      │
//!                      │                                                      │
//!                      │  ┌────────────────────────────────────────────────┐  │
//!                      │  │ config │ telemetry │ admin API │ lifecycle     │  │
//!                      │  └────────────────────────────────────────────────┘  │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use valkey_gateway::config;
use valkey_gateway::lifecycle::{signals, startup, Shutdown};
use valkey_gateway::telemetry::{logging, metrics};

#[derive(Parser)]
#[command(name = "valkey-gateway")]
#[command(about = "HTTP cache gateway for Redis/Valkey", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Defaults plus environment overrides when absent.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;

    logging::init(&config.telemetry);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "valkey-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        store = ?config.store.kind,
        pool_max = config.pool.max_size,
        retries = config.retries.max_retries,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    let handle = if config.telemetry.metrics_enabled {
        Some(metrics::init_metrics()?)
    } else {
        None
    };

    let shutdown = Shutdown::new();
    let gateway = startup::start(config, handle, &shutdown).await?;
    gateway.run(shutdown, signals::wait_for_signal()).await?;

    Ok(())
}
