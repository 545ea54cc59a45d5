//! Startup orchestration.
//!
//! # Responsibilities
//! - Connect the KV store and register the firewall record subscription
//! - Start background tasks (watch loop, firewall maintenance)
//! - Bind the listener and serve until a shutdown signal
//!
//! # Design Decisions
//! - Fail fast on bind errors or a malformed firewall record
//! - A missing firewall record runs on defaults until it is written
//! - Subscriptions are registered before the watch loop starts
//! - Background tasks are stopped after the server has drained

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::GatekeeperConfig;
use crate::http::HttpServer;
use crate::kv::{ConsulKv, KvError, KvStore};
use crate::lifecycle::signals::shutdown_signal;
use crate::lifecycle::Shutdown;
use crate::security::Firewall;
use crate::watch::{ConfigWatcher, WatchError, WatcherSettings};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("KV store setup failed: {0}")]
    Store(#[from] KvError),

    #[error("firewall subscription failed: {0}")]
    Watch(#[from] WatchError),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Run the service against the configured Consul agent until SIGINT/SIGTERM.
pub async fn run(config: GatekeeperConfig) -> Result<(), StartupError> {
    let store = ConsulKv::new(
        &config.kv.address,
        Duration::from_secs(config.kv.request_timeout_secs),
    )?;
    tracing::info!(address = %store.base_url(), namespace = %config.kv.namespace, "KV store configured");

    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.listener.bind_address.clone(),
            source,
        })?;

    serve(config, Arc::new(store), listener, shutdown_signal()).await
}

/// Wire every subsystem on top of `store` and serve `listener` until `signal`
/// resolves.
pub async fn serve<F>(
    config: GatekeeperConfig,
    store: Arc<dyn KvStore>,
    listener: TcpListener,
    signal: F,
) -> Result<(), StartupError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let watcher = ConfigWatcher::new(store, WatcherSettings::from(&config.kv));
    let firewall = Firewall::new(&config.firewall);

    firewall.subscribe(&watcher, &config.firewall.config_key).await?;
    tracing::info!(
        key = %config.firewall.config_key,
        max_req_second = firewall.max_req_second(),
        "Firewall subscribed to live record"
    );

    let shutdown = Shutdown::new();
    let maintenance = firewall.spawn_maintenance(shutdown.subscribe());
    let watch_task = watcher.start(shutdown.subscribe());

    let server = HttpServer::new(&config, firewall);
    let served = server.run(listener, signal).await;

    let notified = shutdown.trigger();
    tracing::info!(tasks = notified, "Stopping background tasks");
    if let Err(e) = maintenance.await {
        tracing::warn!(error = %e, "Firewall maintenance task ended abnormally");
    }
    if let Some(task) = watch_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Config watcher task ended abnormally");
        }
    }

    served.map_err(StartupError::Serve)
}
