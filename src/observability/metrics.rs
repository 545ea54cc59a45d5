//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gatekeeper_admissions_total` (counter): decisions by outcome and reason
//! - `gatekeeper_watch_deliveries_total` (counter): callbacks by kind and outcome
//! - `gatekeeper_store_poll_errors_total` (counter): failed or empty long-polls
//! - `gatekeeper_replay_signatures` (gauge): signatures held for replay checks
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe();
            tracing::info!(address = %addr, "Metrics exporter listening");
        }
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

fn describe() {
    ::metrics::describe_counter!("gatekeeper_admissions_total", "Admission decisions by outcome");
    ::metrics::describe_counter!(
        "gatekeeper_watch_deliveries_total",
        "Config watcher callback invocations"
    );
    ::metrics::describe_counter!(
        "gatekeeper_store_poll_errors_total",
        "Long-poll rounds that failed or returned nothing"
    );
    ::metrics::describe_gauge!("gatekeeper_replay_signatures", "Signatures held for replay detection");
}

/// Record an admission decision; `rejection` is `None` for admitted requests.
pub fn record_admission(rejection: Option<&'static str>) {
    let (outcome, reason) = match rejection {
        Some(reason) => ("rejected", reason),
        None => ("admitted", "none"),
    };
    ::metrics::counter!("gatekeeper_admissions_total", "outcome" => outcome, "reason" => reason)
        .increment(1);
}

/// Record a watcher callback invocation.
pub fn record_watch_delivery(kind: &'static str, success: bool) {
    let outcome = if success { "ok" } else { "error" };
    ::metrics::counter!("gatekeeper_watch_deliveries_total", "kind" => kind, "outcome" => outcome)
        .increment(1);
}

/// Record a failed or empty long-poll round.
pub fn record_store_poll_error(cause: &'static str) {
    ::metrics::counter!("gatekeeper_store_poll_errors_total", "cause" => cause).increment(1);
}

/// Publish the replay cache size.
pub fn record_replay_cache_size(size: usize) {
    ::metrics::gauge!("gatekeeper_replay_signatures").set(size as f64);
}
