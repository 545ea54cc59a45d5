//! Subscriber bookkeeping for the config watcher.

use std::collections::{BTreeMap, HashMap};

use crate::kv::KvPair;

/// Error type callbacks may return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Snapshot delivered to directory subscribers: full key → value.
pub type DirSnapshot = BTreeMap<String, Vec<u8>>;

/// Handler for a single watched key.
pub type KeyCallback = Box<dyn Fn(&[u8]) -> Result<(), CallbackError> + Send + Sync>;

/// Handler for a watched directory prefix.
pub type DirCallback = Box<dyn Fn(&DirSnapshot) -> Result<(), CallbackError> + Send + Sync>;

/// A registered handler plus its delivery cursor.
pub(crate) struct Subscription<C> {
    pub callback: C,
    /// Highest version the callback accepted.
    pub delivered: u64,
    /// Highest version the callback was invoked with, accepted or not.
    /// Kept apart from `delivered` so a rejected version is never offered
    /// again while `delivered` still reports the last accepted one.
    pub attempted: u64,
}

impl<C> Subscription<C> {
    pub fn new(callback: C, baseline: u64) -> Self {
        Self {
            callback,
            delivered: baseline,
            attempted: baseline,
        }
    }

    /// Whether `version` has not been offered to this subscriber yet.
    pub fn is_new(&self, version: u64) -> bool {
        version > self.attempted
    }

    /// Run the callback for `version`, advancing `delivered` only on success.
    pub fn deliver<F>(&mut self, version: u64, invoke: F) -> Result<(), CallbackError>
    where
        F: FnOnce(&C) -> Result<(), CallbackError>,
    {
        self.attempted = version;
        invoke(&self.callback)?;
        self.delivered = version;
        Ok(())
    }
}

/// Entries of one poll round that fall under a watched directory.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct DirBatch {
    pub max_version: u64,
    pub snapshot: DirSnapshot,
}

/// Group `pairs` by every directory prefix they fall under.
///
/// An entry contributes to each matching directory; directories without any
/// matching entry are absent from the result.
pub(crate) fn collect_dir_batches<'a, I>(pairs: &[KvPair], prefixes: I) -> HashMap<String, DirBatch>
where
    I: IntoIterator<Item = &'a String> + Clone,
{
    let mut batches: HashMap<String, DirBatch> = HashMap::new();

    for pair in pairs {
        for prefix in prefixes.clone() {
            if !pair.key.starts_with(prefix.as_str()) {
                continue;
            }
            let batch = batches.entry(prefix.clone()).or_default();
            batch.max_version = batch.max_version.max(pair.version);
            batch.snapshot.insert(pair.key.clone(), pair.value.clone());
        }
    }

    batches
}
