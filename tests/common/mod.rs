//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use gatekeeper::config::FirewallConfig;
use gatekeeper::kv::MemoryKv;
use gatekeeper::security::signature::{SIGN_PARAM, TIMESTAMP_PARAM};
use gatekeeper::security::Signer;
use gatekeeper::watch::{ConfigWatcher, WatcherSettings};

pub const NAMESPACE: &str = "Acm";

/// Watcher settings with short waits so tests finish quickly.
pub fn fast_settings() -> WatcherSettings {
    WatcherSettings {
        namespace: NAMESPACE.to_string(),
        wait: Duration::from_millis(200),
        retry_delay: Duration::from_millis(50),
    }
}

/// An in-memory store and a watcher over it.
pub fn memory_watcher() -> (Arc<MemoryKv>, Arc<ConfigWatcher>) {
    let store = Arc::new(MemoryKv::new());
    let watcher = ConfigWatcher::new(store.clone(), fast_settings());
    (store, watcher)
}

/// Fully-qualified key under the test namespace.
pub fn ns(key: &str) -> String {
    format!("{}/{}", NAMESPACE, key)
}

/// Firewall settings that enforce any positive threshold.
pub fn firewall_config() -> FirewallConfig {
    FirewallConfig {
        min_enforced_req_second: 1,
        ..FirewallConfig::default()
    }
}

pub fn signer_for(config: &FirewallConfig) -> Signer {
    Signer::new(
        config.signed_fields.clone(),
        config.default_salt.clone(),
        config.salts.clone(),
    )
}

/// Query parameters with `_timestamp` set and a valid `_sign`.
pub fn signed_query(signer: &Signer, timestamp: i64, extra: &[(&str, &str)]) -> HashMap<String, String> {
    let mut query: HashMap<String, String> = extra
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    query.insert(TIMESTAMP_PARAM.to_string(), timestamp.to_string());
    let sign = signer.sign(&query);
    query.insert(SIGN_PARAM.to_string(), sign);
    query
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
