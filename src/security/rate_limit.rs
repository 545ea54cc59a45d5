//! Per-second request counters.
//!
//! A ring of 60 slots indexed by second-of-minute. The slot for the current
//! second accumulates hits until the ticker rotates into it again a minute
//! later, at which point it is cleared. Limits therefore apply per calendar
//! second, not over a trailing 1000ms window.

use std::collections::HashMap;

/// Number of slots in the ring (one per second of a minute).
pub const WINDOW_SLOTS: usize = 60;

/// Ring of per-second hit counters keyed by folded client address.
pub struct RateWindow {
    slots: Vec<HashMap<u32, u32>>,
    current: usize,
}

impl RateWindow {
    /// Create an empty window positioned at `second` (0-59).
    pub fn new(second: usize) -> Self {
        Self {
            slots: vec![HashMap::new(); WINDOW_SLOTS],
            current: second % WINDOW_SLOTS,
        }
    }

    /// Move to `second` and clear that slot.
    pub fn rotate(&mut self, second: usize) {
        self.current = second % WINDOW_SLOTS;
        self.slots[self.current].clear();
    }

    /// Count a request for `key` in the current slot; returns the new count.
    pub fn hit(&mut self, key: u32) -> u32 {
        let count = self.slots[self.current].entry(key).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    #[cfg(test)]
    fn count(&self, key: u32) -> u32 {
        self.slots[self.current].get(&key).copied().unwrap_or(0)
    }

    #[cfg(test)]
    fn current_second(&self) -> usize {
        self.current
    }
}

/// Second-of-minute for a unix timestamp.
pub fn second_of_minute(unix_secs: i64) -> usize {
    unix_secs.rem_euclid(60) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hits_accumulate_per_key() {
        let mut window = RateWindow::new(5);
        assert_eq!(window.hit(1), 1);
        assert_eq!(window.hit(1), 2);
        assert_eq!(window.hit(2), 1);
        assert_eq!(window.count(1), 2);
        assert_eq!(window.count(3), 0);
    }

    #[test]
    fn test_rotation_clears_new_slot_only() {
        let mut window = RateWindow::new(10);
        window.hit(7);
        window.hit(7);

        window.rotate(11);
        assert_eq!(window.current_second(), 11);
        assert_eq!(window.count(7), 0);

        // Returning to an already-used slot without rotating keeps its counts.
        window.hit(7);
        window.rotate(10);
        assert_eq!(window.count(7), 0);
    }

    #[test]
    fn test_second_of_minute() {
        assert_eq!(second_of_minute(0), 0);
        assert_eq!(second_of_minute(61), 1);
        assert_eq!(second_of_minute(1_700_000_059), 1_700_000_059 % 60);
        assert_eq!(second_of_minute(-1), 59);
    }
}
