//! Keyed resource slots with per-category ceilings.
//!
//! Unlike a semaphore permit, a slot is released by key, and releasing a
//! key that holds no slot is a no-op rather than an error. That makes
//! release safe to call from every exit path without bookkeeping.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;

/// Default ceiling for categories without an explicit limit.
pub const DEFAULT_CATEGORY_CEILING: usize = 8;

/// An active slot entry.
#[derive(Debug, Clone)]
pub struct ResourceSlot {
    pub key: String,
    pub category: String,
    pub acquired_at: Instant,
}

#[derive(Debug, Default)]
struct SlotTable {
    slots: HashMap<String, ResourceSlot>,
    counts: HashMap<String, usize>,
}

/// Caps concurrent in-flight operations per category.
#[derive(Debug)]
pub struct ResourceLimiter {
    ceilings: HashMap<String, usize>,
    default_ceiling: usize,
    table: Mutex<SlotTable>,
}

impl ResourceLimiter {
    /// Creates a limiter with explicit per-category ceilings; categories
    /// not listed use `default_ceiling`.
    pub fn new(ceilings: HashMap<String, usize>, default_ceiling: usize) -> Self {
        Self {
            ceilings,
            default_ceiling: default_ceiling.max(1),
            table: Mutex::new(SlotTable::default()),
        }
    }

    /// Ceiling for a category.
    pub fn ceiling(&self, category: &str) -> usize {
        self.ceilings
            .get(category)
            .copied()
            .unwrap_or(self.default_ceiling)
    }

    /// Tries to reserve a slot under `key` for `category`.
    ///
    /// Fails when the category is at its ceiling or the key already holds
    /// a slot. Check and insert happen under one mutex.
    pub fn acquire_slot(&self, key: &str, category: &str) -> bool {
        let ceiling = self.ceiling(category);
        let mut table = self.table.lock().expect("slot table mutex poisoned");

        if table.slots.contains_key(key) {
            return false;
        }
        let count = table.counts.get(category).copied().unwrap_or(0);
        if count >= ceiling {
            debug!(key, category, ceiling, "Resource slot denied, category at ceiling");
            return false;
        }

        table.slots.insert(
            key.to_string(),
            ResourceSlot {
                key: key.to_string(),
                category: category.to_string(),
                acquired_at: Instant::now(),
            },
        );
        *table.counts.entry(category.to_string()).or_insert(0) = count + 1;
        true
    }

    /// Releases the slot held under `key`. Double release is a no-op.
    pub fn release_slot(&self, key: &str) {
        let mut table = self.table.lock().expect("slot table mutex poisoned");
        if let Some(slot) = table.slots.remove(key) {
            if let Some(count) = table.counts.get_mut(&slot.category) {
                *count = count.saturating_sub(1);
            }
        }
    }

    /// Number of active slots in a category.
    pub fn active_count(&self, category: &str) -> usize {
        let table = self.table.lock().expect("slot table mutex poisoned");
        table.counts.get(category).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(category: &str, ceiling: usize) -> ResourceLimiter {
        let mut ceilings = HashMap::new();
        ceilings.insert(category.to_string(), ceiling);
        ResourceLimiter::new(ceilings, DEFAULT_CATEGORY_CEILING)
    }

    #[test]
    fn test_acquire_fails_at_category_ceiling() {
        let limiter = limiter_with("flash", 2);

        assert!(limiter.acquire_slot("a-flash", "flash"));
        assert!(limiter.acquire_slot("b-flash", "flash"));
        assert!(!limiter.acquire_slot("c-flash", "flash"));
        assert_eq!(limiter.active_count("flash"), 2);
    }

    #[test]
    fn test_release_frees_capacity() {
        let limiter = limiter_with("flash", 1);

        assert!(limiter.acquire_slot("a-flash", "flash"));
        assert!(!limiter.acquire_slot("b-flash", "flash"));

        limiter.release_slot("a-flash");
        assert!(limiter.acquire_slot("b-flash", "flash"));
    }

    #[test]
    fn test_double_release_is_a_no_op() {
        let limiter = limiter_with("flash", 2);

        assert!(limiter.acquire_slot("a-flash", "flash"));
        limiter.release_slot("a-flash");
        limiter.release_slot("a-flash");

        assert_eq!(limiter.active_count("flash"), 0);
        // Capacity is not corrupted by the double release.
        assert!(limiter.acquire_slot("b-flash", "flash"));
        assert!(limiter.acquire_slot("c-flash", "flash"));
        assert!(!limiter.acquire_slot("d-flash", "flash"));
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        let limiter = limiter_with("flash", 4);

        assert!(limiter.acquire_slot("a-flash", "flash"));
        assert!(!limiter.acquire_slot("a-flash", "flash"));
        assert_eq!(limiter.active_count("flash"), 1);
    }

    #[test]
    fn test_categories_are_independent() {
        let limiter = limiter_with("flash", 1);

        assert!(limiter.acquire_slot("a-flash", "flash"));
        assert!(limiter.acquire_slot("a-download", "download"));
        assert_eq!(limiter.active_count("flash"), 1);
        assert_eq!(limiter.active_count("download"), 1);
    }

    #[test]
    fn test_unlisted_category_uses_default_ceiling() {
        let limiter = limiter_with("flash", 1);
        assert_eq!(limiter.ceiling("device-op"), DEFAULT_CATEGORY_CEILING);
    }
}
