//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, tracing, timeout)
//!     → /health (answered directly)
//!     → middleware/firewall.rs (client IP, query, buffered body → Firewall::admit)
//!         → 406 Not Acceptable on reject
//!     → handler
//! ```

pub mod middleware;
pub mod server;

pub use server::{build_router, HttpServer};
