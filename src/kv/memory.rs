//! In-process key/value store.
//!
//! Mirrors the blocking-query semantics of the real store: every write bumps
//! a global index, entries remember the index of their last write, and
//! `list_wait` parks on a watch channel until the index moves.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::kv::{KvError, KvListing, KvPair, KvResult, KvStore};

#[derive(Default)]
struct MemoryState {
    entries: BTreeMap<String, (Vec<u8>, u64)>,
    index: u64,
}

/// A thread-safe in-memory store.
pub struct MemoryKv {
    state: Mutex<MemoryState>,
    index_tx: watch::Sender<u64>,
    unavailable: AtomicBool,
}

impl MemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        let (index_tx, _) = watch::channel(0);
        Self {
            state: Mutex::new(MemoryState::default()),
            index_tx,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Write a value, returning the modify index assigned to it.
    pub fn put(&self, key: &str, value: impl Into<Vec<u8>>) -> u64 {
        let mut state = self.state.lock().expect("memory kv mutex poisoned");
        state.index += 1;
        let index = state.index;
        state.entries.insert(key.to_string(), (value.into(), index));
        drop(state);

        self.index_tx.send_replace(index);
        index
    }

    /// Remove a key. Returns whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock().expect("memory kv mutex poisoned");
        if state.entries.remove(key).is_none() {
            return false;
        }
        state.index += 1;
        let index = state.index;
        drop(state);

        self.index_tx.send_replace(index);
        true
    }

    #[cfg(test)]
    fn index(&self) -> u64 {
        self.state.lock().expect("memory kv mutex poisoned").index
    }

    /// Make every call fail with `KvError::Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> KvResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KvError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }

    fn snapshot(&self, prefix: &str) -> KvListing {
        let state = self.state.lock().expect("memory kv mutex poisoned");
        let pairs = state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, (value, version))| KvPair {
                key: key.clone(),
                value: value.clone(),
                version: *version,
            })
            .collect();

        KvListing {
            pairs,
            last_index: state.index,
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<KvPair>> {
        self.check_available()?;
        let state = self.state.lock().expect("memory kv mutex poisoned");
        Ok(state.entries.get(key).map(|(value, version)| KvPair {
            key: key.to_string(),
            value: value.clone(),
            version: *version,
        }))
    }

    async fn list(&self, prefix: &str) -> KvResult<KvListing> {
        self.check_available()?;
        Ok(self.snapshot(prefix))
    }

    async fn list_wait(&self, prefix: &str, from_index: u64, wait: Duration) -> KvResult<KvListing> {
        self.check_available()?;

        let mut rx = self.index_tx.subscribe();
        // Either outcome (moved or timed out) ends in a fresh listing.
        let _ = tokio::time::timeout(wait, rx.wait_for(|index| *index > from_index)).await;

        self.check_available()?;
        Ok(self.snapshot(prefix))
    }
}
