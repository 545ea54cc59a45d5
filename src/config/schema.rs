//! Configuration schema definitions.
//!
//! This module defines the static process configuration for gatekeeper.
//! All types derive Serde traits for deserialization from config files.
//! The live firewall record (blocklist, request threshold) is not part of
//! this file; it is delivered at runtime through the config watcher.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the gatekeeper process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatekeeperConfig {
    /// Listener configuration (bind address, proxy headers).
    pub listener: ListenerConfig,

    /// Key/value store connection and long-poll settings.
    pub kv: KvConfig,

    /// Request firewall settings.
    pub firewall: FirewallConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Trust `X-Forwarded-For` / `X-Real-IP` when resolving the client IP.
    pub behind_proxy: bool,

    /// Largest request body buffered for inspection, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            behind_proxy: true,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Key/value store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KvConfig {
    /// Store agent address (e.g., "127.0.0.1:8500" or "http://consul:8500").
    /// Empty means "resolve from `CONSUL_AGENT_IP`".
    pub address: String,

    /// Namespace prefix every watched key lives under.
    pub namespace: String,

    /// Long-poll wait time in seconds.
    pub wait_secs: u64,

    /// Fixed delay before retrying a failed or empty poll, in milliseconds.
    pub retry_delay_ms: u64,

    /// Timeout for non-blocking store requests, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8500".to_string(),
            namespace: "Acm".to_string(),
            wait_secs: 60,
            retry_delay_ms: 1000,
            request_timeout_secs: 10,
        }
    }
}

/// Request firewall configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// Key (relative to the KV namespace) holding the live firewall record.
    pub config_key: String,

    /// Skip timestamp, signature and replay checks (development mode).
    pub skip_signature: bool,

    /// Maximum age of a client timestamp, in seconds.
    pub max_clock_skew_secs: i64,

    /// Per-second request threshold used until the first live record arrives.
    pub default_max_req_second: u32,

    /// Thresholds below this value are treated as "unlimited".
    pub min_enforced_req_second: u32,

    /// Salt appended to the signing string when no `_sign_ver` matches.
    pub default_salt: String,

    /// Salts selected by the `_sign_ver` query parameter.
    pub salts: HashMap<String, String>,

    /// Query fields covered by the signature.
    pub signed_fields: Vec<String>,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        let mut salts = HashMap::new();
        salts.insert("1".to_string(), "!caihongmeng#".to_string());

        Self {
            config_key: "config.firewall".to_string(),
            skip_signature: false,
            max_clock_skew_secs: 28 * 60,
            default_max_req_second: 10,
            min_enforced_req_second: 10,
            default_salt: "!rilegoule#".to_string(),
            salts,
            signed_fields: vec![
                "package".to_string(),
                "_ipv".to_string(),
                "_platform".to_string(),
                "_index".to_string(),
                "_model".to_string(),
                "_timestamp".to_string(),
                "format".to_string(),
            ],
        }
    }
}

/// Timeout configuration for request handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GatekeeperConfig = toml::from_str("").unwrap();
        assert_eq!(config.kv.namespace, "Acm");
        assert_eq!(config.kv.wait_secs, 60);
        assert_eq!(config.firewall.config_key, "config.firewall");
        assert_eq!(config.firewall.max_clock_skew_secs, 1680);
        assert_eq!(config.firewall.signed_fields.len(), 7);
    }

    #[test]
    fn test_partial_section_override() {
        let config: GatekeeperConfig = toml::from_str(
            r#"
            [firewall]
            skip_signature = true

            [firewall.salts]
            "2" = "!other#"
            "#,
        )
        .unwrap();

        assert!(config.firewall.skip_signature);
        assert_eq!(config.firewall.default_salt, "!rilegoule#");
        assert_eq!(config.firewall.salts.get("2").map(String::as_str), Some("!other#"));
        assert!(!config.firewall.salts.contains_key("1"));
    }
}
