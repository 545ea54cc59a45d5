//! Gatekeeper
//!
//! HTTP front end that admits or rejects requests using a firewall whose
//! blocklist and thresholds follow a Consul KV record.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!                         │                 GATEKEEPER                    │
//!                         │                                               │
//!   Client Request        │  ┌─────────┐    ┌───────────────┐             │
//!   ──────────────────────┼─▶│  http   │───▶│   security    │──▶ handler  │
//!                         │  │ server  │    │   firewall    │             │
//!   406 on reject ◀───────┼──│         │◀───│ (admit/reject)│             │
//!                         │  └─────────┘    └───────▲───────┘             │
//!                         │                         │ live record          │
//!                         │                 ┌───────┴───────┐             │
//!                         │                 │     watch     │             │
//!                         │                 │ ConfigWatcher │             │
//!                         │                 └───────▲───────┘             │
//!                         │                         │ long-poll            │
//!                         │                 ┌───────┴───────┐             │
//!                         │                 │   kv (Consul) │◀────────────┼──── Consul agent
//!                         │                 └───────────────┘             │
//!                         │                                               │
//!                         │  config · observability · lifecycle           │
//!                         └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use gatekeeper::config::{load_config, GatekeeperConfig};
use gatekeeper::lifecycle;
use gatekeeper::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "gatekeeper", version, about = "KV-driven request firewall")]
struct Args {
    /// Path to the TOML config. Built-in defaults apply when omitted.
    #[arg(short, long, env = "GATEKEEPER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatekeeperConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!("gatekeeper v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        kv_address = %config.kv.address,
        namespace = %config.kv.namespace,
        skip_signature = config.firewall.skip_signature,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    lifecycle::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
