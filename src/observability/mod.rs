//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! watch, security, http produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout log aggregation
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Rejection reasons are visible here only, never to the client
//! - Metric updates are fire-and-forget

pub mod logging;
pub mod metrics;
