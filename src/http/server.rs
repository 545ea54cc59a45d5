//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router and wire middleware (tracing, timeout, firewall)
//! - Keep `/health` outside the firewall so health checks are never rate limited
//! - Serve with connect info and graceful shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::GatekeeperConfig;
use crate::http::middleware::{firewall_middleware, FirewallLayerState};
use crate::security::Firewall;

/// HTTP front end guarded by the firewall.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &GatekeeperConfig, firewall: Arc<Firewall>) -> Self {
        Self {
            router: build_router(config, firewall),
        }
    }

    /// Serve `listener` until `signal` resolves, then drain in-flight requests.
    pub async fn run<F>(self, listener: TcpListener, signal: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Router with every route and layer. Exposed for in-process testing.
#[allow(deprecated)]
pub fn build_router(config: &GatekeeperConfig, firewall: Arc<Firewall>) -> Router {
    let gate = FirewallLayerState {
        firewall,
        behind_proxy: config.listener.behind_proxy,
        max_body_bytes: config.listener.max_body_bytes,
    };

    let guarded = Router::new()
        .route("/ping", get(ping).post(ping))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(gate, firewall_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(guarded)
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn ping() -> &'static str {
    "pong"
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}
