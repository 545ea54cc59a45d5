//! Anti-replay signature cache.
//!
//! Signatures are filed into 30 buckets by the minute-of-hour of the
//! client timestamp (two minutes per bucket). The maintenance ticker clears
//! the bucket that comes into use two minutes from now, which bounds memory
//! to the signatures seen in the live buckets.

use dashmap::DashSet;

/// Number of two-minute buckets in an hour.
pub const REPLAY_BUCKETS: usize = 30;

/// Concurrent set of seen signatures, partitioned by time bucket.
pub struct ReplayCache {
    buckets: Vec<DashSet<String>>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self {
            buckets: (0..REPLAY_BUCKETS).map(|_| DashSet::new()).collect(),
        }
    }

    /// Record `signature` in `bucket`. Returns `false` if it was already there.
    pub fn insert(&self, bucket: usize, signature: &str) -> bool {
        self.buckets[bucket % REPLAY_BUCKETS].insert(signature.to_string())
    }

    /// Drop every signature in `bucket`.
    pub fn clear(&self, bucket: usize) {
        self.buckets[bucket % REPLAY_BUCKETS].clear();
    }

    /// Signatures held in `bucket`.
    pub fn bucket_len(&self, bucket: usize) -> usize {
        self.buckets[bucket % REPLAY_BUCKETS].len()
    }

    /// Signatures held across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(DashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(DashSet::is_empty)
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Bucket for a unix timestamp: minute-of-hour / 2.
pub fn bucket_for(unix_secs: i64) -> usize {
    (unix_secs.rem_euclid(3600) / 60 / 2) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_mapping() {
        assert_eq!(bucket_for(0), 0);
        assert_eq!(bucket_for(119), 0);
        assert_eq!(bucket_for(120), 1);
        assert_eq!(bucket_for(3599), 29);
        assert_eq!(bucket_for(3600), 0);
        assert_eq!(bucket_for(-1), 29);
    }

    #[test]
    fn test_insert_detects_duplicates_per_bucket() {
        let cache = ReplayCache::new();
        assert!(cache.insert(3, "abc"));
        assert!(!cache.insert(3, "abc"));
        assert!(cache.insert(4, "abc"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear_empties_one_bucket() {
        let cache = ReplayCache::new();
        cache.insert(1, "a");
        cache.insert(2, "b");
        cache.clear(1);

        assert_eq!(cache.bucket_len(1), 0);
        assert_eq!(cache.bucket_len(2), 1);
        assert!(cache.insert(1, "a"));
        assert!(!cache.is_empty());
    }
}
