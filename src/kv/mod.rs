//! Key/value store access.
//!
//! # Data Flow
//! ```text
//! watch::ConfigWatcher
//!     → KvStore::get / list        (registration, initial load)
//!     → KvStore::list_wait         (long-poll loop)
//!         → consul.rs (Consul HTTP KV API)
//!         → memory.rs (in-process store for tests and local runs)
//! ```
//!
//! # Design Decisions
//! - Versions are the store's modify index; only their ordering matters
//! - `list_wait` returns the full listing under the prefix, never a diff
//! - Every failure is a `KvError`; callers decide whether to retry

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod consul;
pub mod memory;

pub use consul::ConsulKv;
pub use memory::MemoryKv;

/// A single stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    /// Fully-qualified key.
    pub key: String,
    /// Raw value bytes.
    pub value: Vec<u8>,
    /// Modify index assigned by the store on the last write.
    pub version: u64,
}

/// Result of a (possibly blocking) prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvListing {
    /// Every entry currently under the prefix.
    pub pairs: Vec<KvPair>,
    /// Store index to resume a long-poll from.
    pub last_index: u64,
}

/// Errors raised by store adapters.
#[derive(Debug, Error)]
pub enum KvError {
    /// Transport or server failure; safe to retry.
    #[error("KV store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something we could not decode.
    #[error("KV response decode error: {0}")]
    Decode(String),

    /// The configured store address cannot be used.
    #[error("Invalid KV store address '{0}'")]
    InvalidAddress(String),
}

/// Result type for store operations.
pub type KvResult<T> = Result<T, KvError>;

/// A strongly-consistent key/value store with blocking prefix queries.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a single key. `Ok(None)` means the key does not exist.
    async fn get(&self, key: &str) -> KvResult<Option<KvPair>>;

    /// List every entry whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> KvResult<KvListing>;

    /// Like `list`, but blocks until the store index moves past `from_index`
    /// or `wait` elapses. On timeout the current listing is returned.
    async fn list_wait(&self, prefix: &str, from_index: u64, wait: Duration) -> KvResult<KvListing>;
}
