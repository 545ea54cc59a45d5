//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, resolve store address)
//!     → validation.rs (semantic checks)
//!     → GatekeeperConfig (validated, immutable)
//!     → handed to startup, which builds the watcher and firewall
//!
//! Live settings (firewall blocklist and thresholds) do not come from here:
//!     KV store → watch::ConfigWatcher → security::Firewall
//! ```
//!
//! # Design Decisions
//! - Static config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::FirewallConfig;
pub use schema::GatekeeperConfig;
pub use schema::KvConfig;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
