//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatekeeperConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable consulted when `kv.address` is left empty.
pub const AGENT_IP_ENV: &str = "CONSUL_AGENT_IP";

/// Port used with the agent IP taken from the environment.
pub const AGENT_PORT: u16 = 8500;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("kv.address is empty and CONSUL_AGENT_IP is not set")]
    MissingStoreAddress,
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatekeeperConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: GatekeeperConfig = toml::from_str(&content)?;

    resolve_store_address(&mut config, std::env::var(AGENT_IP_ENV).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Fill an empty `kv.address` from the agent IP, if one is known.
pub fn resolve_store_address(
    config: &mut GatekeeperConfig,
    agent_ip: Option<String>,
) -> Result<(), ConfigError> {
    if !config.kv.address.trim().is_empty() {
        return Ok(());
    }

    match agent_ip.filter(|ip| !ip.trim().is_empty()) {
        Some(ip) => {
            config.kv.address = format!("{}:{}", ip.trim(), AGENT_PORT);
            tracing::info!(address = %config.kv.address, "Using KV agent address from environment");
            Ok(())
        }
        None => Err(ConfigError::MissingStoreAddress),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [kv]
            address = "consul.internal:8500"
            namespace = "Cfg"
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.kv.namespace, "Cfg");
        assert_eq!(config.kv.retry_delay_ms, 1000);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[kv]\nwait_secs = 0").unwrap();

        match load_config(file.path()) {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "kv.wait_secs");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_store_address_from_agent_ip() {
        let mut config = GatekeeperConfig::default();
        config.kv.address.clear();

        resolve_store_address(&mut config, Some("10.1.2.3".into())).unwrap();
        assert_eq!(config.kv.address, "10.1.2.3:8500");

        let mut config = GatekeeperConfig::default();
        config.kv.address.clear();
        assert!(matches!(
            resolve_store_address(&mut config, None),
            Err(ConfigError::MissingStoreAddress)
        ));
    }

    #[test]
    fn test_explicit_address_wins() {
        let mut config = GatekeeperConfig::default();
        resolve_store_address(&mut config, Some("10.1.2.3".into())).unwrap();
        assert_eq!(config.kv.address, "127.0.0.1:8500");
    }
}
