//! Request admission control.
//!
//! # Responsibilities
//! - Per-IP blocklist and per-second rate limits for public addresses
//! - Dangerous-keyword screening of query strings and bodies
//! - Timestamp freshness, signature and replay checks
//! - Live reconfiguration through the config watcher
//!
//! # Design Decisions
//! - `admit` never awaits: all state is in memory behind one mutex
//! - Replay sets live outside that mutex, in their own concurrent buckets
//! - The reason for a rejection is logged and counted, never returned

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::FirewallConfig;
use crate::observability::metrics;
use crate::security::danger::DangerFilter;
use crate::security::ip::{ip_key, is_lan_ip};
use crate::security::rate_limit::{second_of_minute, RateWindow};
use crate::security::replay::{bucket_for, ReplayCache};
use crate::security::signature::{parse_int, Signer, SIGN_PARAM, TIMESTAMP_PARAM};
use crate::watch::{ConfigWatcher, ListenOptions, WatchResult};

/// Ticks between two replay bucket sweeps.
const REPLAY_SWEEP_TICKS: u32 = 60;

/// How far ahead of now the swept bucket lies, in seconds.
const REPLAY_SWEEP_AHEAD_SECS: i64 = 120;

/// The live firewall record as stored in the KV store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallRecord {
    #[serde(default)]
    pub block_ip: Vec<String>,
    #[serde(default)]
    pub max_req_second: u32,
}

/// Errors raised while applying a live firewall record.
#[derive(Debug, Error)]
pub enum FirewallConfigError {
    #[error("invalid firewall record: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Blocked,
    RateLimited,
    DangerousInput,
    StaleTimestamp,
    BadSignature,
    Replayed,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Blocked => "blocked_ip",
            Rejection::RateLimited => "rate_limited",
            Rejection::DangerousInput => "dangerous_input",
            Rejection::StaleTimestamp => "stale_timestamp",
            Rejection::BadSignature => "bad_signature",
            Rejection::Replayed => "replayed",
        }
    }
}

/// Normalized attributes of an inbound request.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    /// Client address as text; empty when unknown.
    pub ip: &'a str,
    /// Raw, undecoded query string.
    pub raw_query: &'a str,
    /// Request body bytes.
    pub body: &'a [u8],
    /// Multipart uploads skip body screening.
    pub is_file_request: bool,
    /// Decoded query parameters.
    pub query: &'a HashMap<String, String>,
}

struct LiveSettings {
    blocked: HashSet<String>,
    max_req_second: u32,
}

struct FirewallState {
    window: RateWindow,
    live: LiveSettings,
}

/// Admission controller shared by every request handler.
pub struct Firewall {
    state: Mutex<FirewallState>,
    replay: ReplayCache,
    danger: DangerFilter,
    signer: Signer,
    skip_signature: bool,
    max_clock_skew_secs: i64,
    min_enforced_req_second: u32,
}

impl Firewall {
    /// Create a firewall with the built-in keyword filter.
    pub fn new(config: &FirewallConfig) -> Arc<Self> {
        Self::with_filter(config, DangerFilter::default())
    }

    /// Create a firewall with a specific keyword filter.
    pub fn with_filter(config: &FirewallConfig, danger: DangerFilter) -> Arc<Self> {
        let signer = Signer::new(
            config.signed_fields.clone(),
            config.default_salt.clone(),
            config.salts.clone(),
        );

        Arc::new(Self {
            state: Mutex::new(FirewallState {
                window: RateWindow::new(second_of_minute(unix_now())),
                live: LiveSettings {
                    blocked: HashSet::new(),
                    max_req_second: config.default_max_req_second,
                },
            }),
            replay: ReplayCache::new(),
            danger,
            signer,
            skip_signature: config.skip_signature,
            max_clock_skew_secs: config.max_clock_skew_secs,
            min_enforced_req_second: config.min_enforced_req_second,
        })
    }

    /// Subscribe to the live firewall record under `key`.
    ///
    /// A record that does not exist yet is not an error: the configured
    /// defaults stay until it is first written.
    pub async fn subscribe(self: &Arc<Self>, watcher: &ConfigWatcher, key: &str) -> WatchResult<()> {
        let firewall = Arc::clone(self);
        let options = ListenOptions {
            ignore_init_error: true,
        };
        watcher
            .listen_key_with(key, options, move |value| {
                firewall.apply_record(value).map_err(Into::into)
            })
            .await
    }

    /// Decode a live record and swap it in. On error the current settings stay.
    pub fn apply_record(&self, raw: &[u8]) -> Result<(), FirewallConfigError> {
        let record: FirewallRecord = serde_json::from_slice(raw).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse firewall record");
            FirewallConfigError::Parse(e)
        })?;

        let blocked: HashSet<String> = record.block_ip.into_iter().collect();
        tracing::info!(
            blocked = blocked.len(),
            max_req_second = record.max_req_second,
            "Firewall record applied"
        );

        let mut state = self.state.lock().expect("firewall mutex poisoned");
        state.live = LiveSettings {
            blocked,
            max_req_second: record.max_req_second,
        };
        Ok(())
    }

    /// Current per-second threshold.
    pub fn max_req_second(&self) -> u32 {
        self.state.lock().expect("firewall mutex poisoned").live.max_req_second
    }

    /// Whether `ip` is on the live blocklist.
    pub fn is_blocked(&self, ip: &str) -> bool {
        self.state
            .lock()
            .expect("firewall mutex poisoned")
            .live
            .blocked
            .contains(ip)
    }

    /// Decide whether to let a request through.
    pub fn admit(&self, request: &AdmissionRequest<'_>) -> bool {
        self.admit_at(request, unix_now())
    }

    /// [`Firewall::admit`] against an explicit clock (unix seconds).
    pub fn admit_at(&self, request: &AdmissionRequest<'_>, now: i64) -> bool {
        let outcome = self.check(request, now);
        metrics::record_admission(outcome.err().map(|r| r.as_str()));

        match outcome {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(ip = %request.ip, reason = reason.as_str(), "Request rejected");
                false
            }
        }
    }

    pub(crate) fn check(&self, request: &AdmissionRequest<'_>, now: i64) -> Result<(), Rejection> {
        if !request.ip.is_empty() && !is_lan_ip(request.ip) {
            self.check_rate(request.ip)?;
        }

        if self.danger.matches(request.raw_query.as_bytes()) {
            return Err(Rejection::DangerousInput);
        }
        if !request.is_file_request && self.danger.matches(request.body) {
            return Err(Rejection::DangerousInput);
        }

        if self.skip_signature {
            return Ok(());
        }
        self.check_signature(request.query, now)
    }

    fn check_rate(&self, ip: &str) -> Result<(), Rejection> {
        let key = ip_key(ip);
        let mut state = self.state.lock().expect("firewall mutex poisoned");

        if state.live.blocked.contains(ip) {
            return Err(Rejection::Blocked);
        }

        let limit = state.live.max_req_second;
        let count = state.window.hit(key);
        if limit > 0 && limit >= self.min_enforced_req_second && count > limit {
            return Err(Rejection::RateLimited);
        }
        Ok(())
    }

    fn check_signature(&self, query: &HashMap<String, String>, now: i64) -> Result<(), Rejection> {
        let timestamp = query.get(TIMESTAMP_PARAM).map(|t| parse_int(t)).unwrap_or(0);
        if now.saturating_sub(timestamp) > self.max_clock_skew_secs {
            return Err(Rejection::StaleTimestamp);
        }

        if !self.signer.verify(query) {
            return Err(Rejection::BadSignature);
        }

        let signature = query.get(SIGN_PARAM).map(String::as_str).unwrap_or("");
        if !self.replay.insert(bucket_for(timestamp), signature) {
            return Err(Rejection::Replayed);
        }
        Ok(())
    }

    /// Point the rate window at the second of `now` and clear that slot.
    pub fn rotate_at(&self, now: i64) {
        let mut state = self.state.lock().expect("firewall mutex poisoned");
        state.window.rotate(second_of_minute(now));
    }

    /// Clear the replay bucket that comes into use two minutes after `now`.
    pub fn sweep_replay_at(&self, now: i64) {
        let bucket = bucket_for(now + REPLAY_SWEEP_AHEAD_SECS);
        self.replay.clear(bucket);
        metrics::record_replay_cache_size(self.replay.len());
        tracing::trace!(bucket, "Replay bucket swept");
    }

    /// Signatures currently held for replay detection.
    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }

    /// Spawn the 1-second maintenance ticker.
    pub fn spawn_maintenance(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let firewall = Arc::clone(self);
        tokio::spawn(async move { firewall.run_maintenance(shutdown).await })
    }

    async fn run_maintenance(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(Duration::from_secs(1));
        // The first tick fires immediately; the window was positioned at construction.
        ticker.tick().await;
        let mut ticks: u32 = 0;

        tracing::info!("Firewall maintenance starting");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = unix_now();
                    self.rotate_at(now);

                    ticks += 1;
                    if ticks == REPLAY_SWEEP_TICKS {
                        ticks = 0;
                        self.sweep_replay_at(now);
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Firewall maintenance received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn dev_config() -> FirewallConfig {
        FirewallConfig {
            skip_signature: true,
            ..FirewallConfig::default()
        }
    }

    #[test]
    fn test_defaults_before_first_record() {
        let firewall = Firewall::new(&FirewallConfig::default());
        assert_eq!(firewall.max_req_second(), 10);
        assert!(!firewall.is_blocked("1.2.3.4"));
    }

    #[test]
    fn test_apply_record_replaces_wholesale() {
        let firewall = Firewall::new(&dev_config());
        firewall
            .apply_record(br#"{"block_ip":["1.1.1.1","2.2.2.2"],"max_req_second":50}"#)
            .unwrap();
        assert!(firewall.is_blocked("1.1.1.1"));
        assert_eq!(firewall.max_req_second(), 50);

        firewall.apply_record(br#"{"block_ip":["3.3.3.3"]}"#).unwrap();
        assert!(!firewall.is_blocked("1.1.1.1"));
        assert!(firewall.is_blocked("3.3.3.3"));
        assert_eq!(firewall.max_req_second(), 0);
    }

    #[test]
    fn test_malformed_record_keeps_previous() {
        let firewall = Firewall::new(&dev_config());
        firewall
            .apply_record(br#"{"block_ip":["1.1.1.1"],"max_req_second":20}"#)
            .unwrap();

        assert!(firewall.apply_record(b"{not json").is_err());
        assert!(firewall.apply_record(br#"{"max_req_second":"many"}"#).is_err());
        assert!(firewall.is_blocked("1.1.1.1"));
        assert_eq!(firewall.max_req_second(), 20);
    }

    #[test]
    fn test_lan_addresses_skip_limits() {
        let firewall = Firewall::new(&dev_config());
        firewall
            .apply_record(br#"{"block_ip":["10.0.0.1"],"max_req_second":10}"#)
            .unwrap();
        firewall.rotate_at(NOW);

        let query = HashMap::new();
        let request = AdmissionRequest {
            ip: "10.0.0.1",
            raw_query: "",
            body: b"",
            is_file_request: false,
            query: &query,
        };
        for _ in 0..50 {
            assert_eq!(firewall.check(&request, NOW), Ok(()));
        }
    }

    #[test]
    fn test_threshold_below_floor_is_unlimited() {
        let firewall = Firewall::new(&dev_config());
        firewall.apply_record(br#"{"max_req_second":3}"#).unwrap();
        firewall.rotate_at(NOW);

        let query = HashMap::new();
        let request = AdmissionRequest {
            ip: "8.8.8.8",
            raw_query: "",
            body: b"",
            is_file_request: false,
            query: &query,
        };
        for _ in 0..20 {
            assert_eq!(firewall.check(&request, NOW), Ok(()));
        }
    }

    #[test]
    fn test_file_requests_skip_body_screening() {
        let firewall = Firewall::new(&dev_config());
        let query = HashMap::new();
        let mut request = AdmissionRequest {
            ip: "",
            raw_query: "a=1",
            body: b"name=x; drop table users",
            is_file_request: true,
            query: &query,
        };
        assert_eq!(firewall.check(&request, NOW), Ok(()));

        request.is_file_request = false;
        assert_eq!(firewall.check(&request, NOW), Err(Rejection::DangerousInput));

        request.raw_query = "id=1%20or%201=1;exec";
        request.is_file_request = true;
        assert_eq!(firewall.check(&request, NOW), Err(Rejection::DangerousInput));
    }

    #[test]
    fn test_disabled_filter_fails_open() {
        let firewall = Firewall::with_filter(&dev_config(), DangerFilter::compile("(("));
        let query = HashMap::new();
        let request = AdmissionRequest {
            ip: "",
            raw_query: "q=select",
            body: b"drop",
            is_file_request: false,
            query: &query,
        };
        assert_eq!(firewall.check(&request, NOW), Ok(()));
    }

    #[test]
    fn test_sweep_clears_bucket_two_minutes_ahead() {
        let firewall = Firewall::new(&FirewallConfig::default());
        let ahead = NOW + 120;
        firewall.replay.insert(bucket_for(ahead), "sig-ahead");
        firewall.replay.insert(bucket_for(NOW), "sig-now");

        firewall.sweep_replay_at(NOW);
        assert_eq!(firewall.replay.bucket_len(bucket_for(ahead)), 0);
        assert_eq!(firewall.replay.bucket_len(bucket_for(NOW)), 1);
        assert_eq!(firewall.replay_len(), 1);
    }
}
