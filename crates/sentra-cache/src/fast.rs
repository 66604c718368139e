//! In-process fast tier: bounded, best-effort, evictable.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::StoredEntry;

#[derive(Debug)]
pub struct FastTier {
    entries: DashMap<String, StoredEntry>,
    capacity: usize,
}

impl FastTier {
    /// A tier holding at most `capacity` entries. Zero disables it.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The live entry for `key` at `now`. Expired entries are dropped.
    #[must_use]
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<StoredEntry> {
        let hit = self.entries.get(key).map(|entry| entry.value().clone())?;
        if hit.is_live_at(now) {
            Some(hit)
        } else {
            self.entries.remove_if(key, |_, entry| !entry.is_live_at(now));
            None
        }
    }

    /// Store `entry`, evicting the oldest-written entry when full.
    pub fn insert(&self, key: &str, entry: StoredEntry) {
        if self.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(key.to_string(), entry);
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().written_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
