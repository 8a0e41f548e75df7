//! HTTP API Gateway
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────────┐
//!                      │                       API GATEWAY                        │
//!                      │                                                          │
//!   Client Request     │  ┌──────────────┐   ┌─────────────┐   ┌──────────────┐   │
//!   ───────────────────┼─▶│    global    │──▶│   routing   │──▶│ route chain  │   │
//!                      │  │  middleware  │   │ (prefix +   │   │ auth / rate  │   │
//!                      │  │ metrics, log │   │  method)    │   │ limit/cache  │   │
//!                      │  │ sec, cors    │   └─────────────┘   └──────┬───────┘   │
//!                      │  └──────────────┘                            │           │
//!                      │                                              ▼           │
//!                      │                                      ┌──────────────┐    │
//!                      │                                      │load_balancer │    │
//!                      │                                      │   + pool     │    │
//!                      │                                      └──────┬───────┘    │
//!                      │                                             ▼            │
//!   Client Response    │  ┌──────────────┐   ┌─────────────┐   ┌──────────────┐   │
//!   ◀──────────────────┼──│   response   │◀──│ http client │◀──│    proxy     │◀──┼── Backend
//!                      │  │  transform   │   │  (pooled)   │   │  dispatcher  │   │
//!                      │  └──────────────┘   └─────────────┘   └──────────────┘   │
//!                      │                                                          │
//!                      │  ┌────────────────────────────────────────────────────┐  │
//!                      │  │               Cross-Cutting Concerns               │  │
//!                      │  │  config · health checks · observability · store   │  │
//!                      │  │  security (auth, limits, headers) · lifecycle      │  │
//!                      │  └────────────────────────────────────────────────────┘  │
//!                      └──────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use api_gateway::config::{load_config, validation::validate_config, GatewayConfig};
use api_gateway::lifecycle::{signals, Shutdown};
use api_gateway::observability::{logging::init_logging, metrics::try_init_metrics};
use api_gateway::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "api-gateway", version, about = "HTTP API gateway")]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `observability.log_level`.
    #[arg(short, long)]
    log_level: Option<String>,
}

fn load(args: &Args) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.server.bind_address = bind.clone();
    }
    if let Some(level) = &args.log_level {
        config.observability.log_level = level.clone();
    }
    // overrides can invalidate a loaded file
    validate_config(&config).map_err(api_gateway::config::ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match load(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "api-gateway starting");
    tracing::info!(
        bind_address = %config.server.bind_address,
        routes = config.routes.len(),
        request_timeout_secs = config.server.request_timeout_secs,
        rate_limit_algorithm = ?config.rate_limit.algorithm,
        "Configuration loaded"
    );
    if config.routes.is_empty() {
        tracing::warn!("No routes configured; only fixed endpoints will answer");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => try_init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::install(shutdown.clone());

    let server = HttpServer::new(config)?;
    server.run(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
