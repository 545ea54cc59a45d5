//! Configuration validation.
//!
//! Serde handles the syntactic checks; this module covers value ranges and
//! cross-field rules. Every problem found is reported, not just the first.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GatekeeperConfig;

/// A single semantic problem in a loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting all errors.
pub fn validate_config(config: &GatekeeperConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let namespace = config.kv.namespace.trim_matches('/');
    if namespace.is_empty() {
        errors.push(ValidationError::new("kv.namespace", "must not be empty"));
    }
    if config.kv.wait_secs == 0 {
        errors.push(ValidationError::new("kv.wait_secs", "must be greater than 0"));
    }
    if config.kv.retry_delay_ms == 0 {
        errors.push(ValidationError::new("kv.retry_delay_ms", "must be greater than 0"));
    }

    if config.firewall.config_key.is_empty() {
        errors.push(ValidationError::new("firewall.config_key", "must not be empty"));
    }
    if config.firewall.max_clock_skew_secs <= 0 {
        errors.push(ValidationError::new(
            "firewall.max_clock_skew_secs",
            "must be greater than 0",
        ));
    }
    if config.firewall.signed_fields.is_empty() && !config.firewall.skip_signature {
        errors.push(ValidationError::new(
            "firewall.signed_fields",
            "at least one field must be signed unless skip_signature is set",
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
