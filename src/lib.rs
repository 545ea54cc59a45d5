//! Gatekeeper library: live KV-driven configuration and a request firewall.

pub mod config;
pub mod http;
pub mod kv;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod watch;

pub use config::schema::GatekeeperConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::Firewall;
pub use watch::ConfigWatcher;
