//! Long-poll watcher delivering KV changes to in-process subscribers.
//!
//! # Responsibilities
//! - Register key and directory subscriptions, with a synchronous initial load
//! - Long-poll the namespace and dispatch changed versions
//! - Isolate callback failures per subscriber
//!
//! # Design Decisions
//! - One mutex guards every subscription; registration and dispatch never interleave
//! - A version is offered to a subscriber at most once, even if the callback fails
//! - Store failures never stop the loop; it retries with a fixed delay and the same cursor

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::config::KvConfig;
use crate::kv::{KvError, KvListing, KvStore};
use crate::observability::metrics;
use crate::watch::subscription::{
    collect_dir_batches, CallbackError, DirCallback, DirSnapshot, KeyCallback, Subscription,
};

/// Errors surfaced to callers registering a subscription.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The key does not exist in the store.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The store could not be reached or answered garbage.
    #[error(transparent)]
    Store(#[from] KvError),

    /// A one-shot read returned a value that could not be decoded.
    #[error("cannot decode '{key}': {reason}")]
    Decode { key: String, reason: String },

    /// The initial callback rejected the current value.
    #[error("initial load of '{key}' failed: {source}")]
    CallbackFailed {
        key: String,
        #[source]
        source: CallbackError,
    },
}

/// Result type for watcher registration.
pub type WatchResult<T> = Result<T, WatchError>;

/// Registration options for [`ConfigWatcher::listen_key_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenOptions {
    /// Register even if the initial value cannot be fetched.
    pub ignore_init_error: bool,
}

/// Runtime settings for the poll loop.
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// Namespace every key is registered under.
    pub namespace: String,
    /// Long-poll wait passed to the store.
    pub wait: Duration,
    /// Sleep after a failed or empty poll.
    pub retry_delay: Duration,
}

impl From<&KvConfig> for WatcherSettings {
    fn from(config: &KvConfig) -> Self {
        Self {
            namespace: config.namespace.trim_matches('/').to_string(),
            wait: Duration::from_secs(config.wait_secs),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self::from(&KvConfig::default())
    }
}

#[derive(Default)]
struct WatchState {
    keys: HashMap<String, Subscription<KeyCallback>>,
    dirs: HashMap<String, Subscription<DirCallback>>,
}

/// Outcome counts for one dispatched poll round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Watches a KV namespace and pushes changes to registered callbacks.
pub struct ConfigWatcher {
    store: Arc<dyn KvStore>,
    settings: WatcherSettings,
    state: Mutex<WatchState>,
    started: AtomicBool,
}

impl ConfigWatcher {
    /// Create a watcher. Nothing is polled until [`ConfigWatcher::start`].
    pub fn new(store: Arc<dyn KvStore>, settings: WatcherSettings) -> Arc<Self> {
        Arc::new(Self {
            store,
            settings,
            state: Mutex::new(WatchState::default()),
            started: AtomicBool::new(false),
        })
    }

    /// Fully-qualified store key for a namespace-relative name.
    pub fn full_key(&self, key: &str) -> String {
        format!("{}/{}", self.settings.namespace, key.trim_start_matches('/'))
    }

    fn namespace_prefix(&self) -> String {
        format!("{}/", self.settings.namespace)
    }

    /// Read the current value of a key once, without subscribing.
    pub async fn get(&self, key: &str) -> WatchResult<Vec<u8>> {
        let full_key = self.full_key(key);
        match self.store.get(&full_key).await? {
            Some(pair) => Ok(pair.value),
            None => Err(WatchError::KeyNotFound(full_key)),
        }
    }

    /// Read a key once and decode it as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> WatchResult<T> {
        let raw = self.get(key).await?;
        serde_json::from_slice(&raw).map_err(|e| WatchError::Decode {
            key: self.full_key(key),
            reason: e.to_string(),
        })
    }

    /// Read a key once and decode it as YAML.
    pub async fn get_yaml<T: DeserializeOwned>(&self, key: &str) -> WatchResult<T> {
        let raw = self.get(key).await?;
        serde_yaml::from_slice(&raw).map_err(|e| WatchError::Decode {
            key: self.full_key(key),
            reason: e.to_string(),
        })
    }

    /// Subscribe to a single key.
    ///
    /// The current value is fetched and handed to `callback` before this
    /// returns. If the key is missing or the callback fails, nothing is
    /// registered. Registering the same key again replaces its callback.
    pub async fn listen_key<F>(&self, key: &str, callback: F) -> WatchResult<()>
    where
        F: Fn(&[u8]) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.listen_key_with(key, ListenOptions::default(), callback).await
    }

    /// [`ConfigWatcher::listen_key`] with explicit options.
    ///
    /// With `ignore_init_error`, a missing key or unreachable store still
    /// registers the subscription at version 0, so the first value written
    /// later is delivered. A failing initial callback is always an error.
    pub async fn listen_key_with<F>(
        &self,
        key: &str,
        options: ListenOptions,
        callback: F,
    ) -> WatchResult<()>
    where
        F: Fn(&[u8]) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let full_key = self.full_key(key);
        let mut state = self.state.lock().await;

        let fetched = match self.store.get(&full_key).await {
            Ok(Some(pair)) => Ok(pair),
            Ok(None) => Err(WatchError::KeyNotFound(full_key.clone())),
            Err(e) => Err(WatchError::from(e)),
        };

        let baseline = match fetched {
            Ok(pair) => {
                if let Err(source) = callback(pair.value.as_slice()) {
                    tracing::error!(key = %full_key, error = %source, "Initial key callback failed");
                    return Err(WatchError::CallbackFailed { key: full_key, source });
                }
                pair.version
            }
            Err(e) if options.ignore_init_error => {
                tracing::warn!(key = %full_key, error = %e, "Initial load skipped, waiting for first value");
                0
            }
            Err(e) => {
                tracing::error!(key = %full_key, error = %e, "Failed to fetch watched key");
                return Err(e);
            }
        };

        tracing::info!(key = %full_key, version = baseline, "Key subscription registered");
        let callback: KeyCallback = Box::new(callback);
        state
            .keys
            .insert(full_key, Subscription::new(callback, baseline));
        Ok(())
    }

    /// Subscribe to every key under a directory prefix.
    ///
    /// `callback` receives the full snapshot of matching entries, first
    /// synchronously and then whenever the newest child version increases.
    pub async fn listen_dir<F>(&self, prefix: &str, callback: F) -> WatchResult<()>
    where
        F: Fn(&DirSnapshot) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let full_prefix = self.full_key(prefix);
        let mut state = self.state.lock().await;

        let listing = self.store.list(&full_prefix).await.map_err(|e| {
            tracing::error!(prefix = %full_prefix, error = %e, "Failed to list watched directory");
            WatchError::from(e)
        })?;

        let baseline = listing.pairs.iter().map(|p| p.version).max().unwrap_or(0);
        let snapshot: DirSnapshot = listing
            .pairs
            .into_iter()
            .map(|pair| (pair.key, pair.value))
            .collect();

        if let Err(source) = callback(&snapshot) {
            tracing::error!(prefix = %full_prefix, error = %source, "Initial directory callback failed");
            return Err(WatchError::CallbackFailed {
                key: full_prefix,
                source,
            });
        }

        tracing::info!(
            prefix = %full_prefix,
            entries = snapshot.len(),
            version = baseline,
            "Directory subscription registered"
        );
        let callback: DirCallback = Box::new(callback);
        state
            .dirs
            .insert(full_prefix, Subscription::new(callback, baseline));
        Ok(())
    }

    /// Last version accepted by the subscriber of `key`.
    pub async fn key_version(&self, key: &str) -> Option<u64> {
        let state = self.state.lock().await;
        state.keys.get(&self.full_key(key)).map(|s| s.delivered)
    }

    /// Last version accepted by the subscriber of directory `prefix`.
    pub async fn dir_version(&self, prefix: &str) -> Option<u64> {
        let state = self.state.lock().await;
        state.dirs.get(&self.full_key(prefix)).map(|s| s.delivered)
    }

    /// Spawn the poll loop. Only the first call starts a task.
    pub fn start(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Config watcher already running");
            return None;
        }

        let watcher = Arc::clone(self);
        Some(tokio::spawn(async move { watcher.run(shutdown).await }))
    }

    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let prefix = self.namespace_prefix();
        let mut cursor: u64 = 0;

        tracing::info!(
            prefix = %prefix,
            wait_secs = self.settings.wait.as_secs(),
            "Config watcher starting"
        );

        loop {
            let polled = tokio::select! {
                res = self.store.list_wait(&prefix, cursor, self.settings.wait) => res,
                _ = shutdown.recv() => break,
            };

            let listing = match polled {
                Ok(listing) if !listing.pairs.is_empty() => listing,
                Ok(_) => {
                    tracing::warn!(prefix = %prefix, cursor, "Config watch returned no entries");
                    metrics::record_store_poll_error("empty");
                    if !self.backoff(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    tracing::error!(prefix = %prefix, cursor, error = %e, "Config watch poll failed");
                    metrics::record_store_poll_error("unavailable");
                    if !self.backoff(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let report = self.dispatch(&listing).await;
            if report.delivered > 0 || report.failed > 0 {
                tracing::debug!(
                    cursor,
                    next = listing.last_index,
                    delivered = report.delivered,
                    failed = report.failed,
                    "Config watch round dispatched"
                );
            }
            cursor = listing.last_index;
        }

        tracing::info!("Config watcher received shutdown signal, exiting loop");
    }

    /// Sleep for the retry delay. Returns `false` if shutdown arrived first.
    async fn backoff(&self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.retry_delay) => true,
            _ = shutdown.recv() => false,
        }
    }

    /// Deliver one poll round to every subscriber whose version moved.
    pub(crate) async fn dispatch(&self, listing: &KvListing) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut state = self.state.lock().await;
        let WatchState { keys, dirs } = &mut *state;

        let batches = collect_dir_batches(&listing.pairs, dirs.keys());

        for pair in &listing.pairs {
            let Some(sub) = keys.get_mut(&pair.key) else {
                continue;
            };
            if !sub.is_new(pair.version) {
                continue;
            }

            tracing::info!(
                key = %pair.key,
                version = pair.version,
                previous = sub.delivered,
                "Watched key changed"
            );
            match sub.deliver(pair.version, |cb| cb(pair.value.as_slice())) {
                Ok(()) => {
                    report.delivered += 1;
                    metrics::record_watch_delivery("key", true);
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::record_watch_delivery("key", false);
                    tracing::error!(key = %pair.key, version = pair.version, error = %e, "Key callback failed");
                }
            }
        }

        for (prefix, batch) in &batches {
            let Some(sub) = dirs.get_mut(prefix) else {
                continue;
            };
            if !sub.is_new(batch.max_version) {
                continue;
            }

            tracing::info!(
                prefix = %prefix,
                version = batch.max_version,
                previous = sub.delivered,
                entries = batch.snapshot.len(),
                "Watched directory changed"
            );
            match sub.deliver(batch.max_version, |cb| cb(&batch.snapshot)) {
                Ok(()) => {
                    report.delivered += 1;
                    metrics::record_watch_delivery("dir", true);
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::record_watch_delivery("dir", false);
                    tracing::error!(prefix = %prefix, version = batch.max_version, error = %e, "Directory callback failed");
                }
            }
        }

        report
    }
}
