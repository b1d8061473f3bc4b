//! Bounded read-through cache over the usage ledger.
//!
//! Keyed by `(identity_key, feature, month, year)` with a fixed TTL and a
//! capacity bound (oldest-entry eviction). Shared by all request handlers
//! and workers; staleness, not atomicity, is the only risk, so a plain
//! mutex around the map is enough. `recordUsage` writes through, so a
//! writer's own follow-up read observes its write; cross-process staleness
//! up to the TTL is accepted.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::quota::ledger::Period;
use crate::quota::FeatureKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageKey {
    pub identity_key: String,
    pub feature: FeatureKind,
    pub month: u32,
    pub year: i32,
}

impl UsageKey {
    pub fn new(identity_key: &str, feature: FeatureKind, period: Period) -> Self {
        UsageKey {
            identity_key: identity_key.to_string(),
            feature,
            month: period.month,
            year: period.year,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: i64,
    inserted_at: Instant,
}

#[derive(Debug)]
pub struct UsageCache {
    inner: Mutex<HashMap<UsageKey, Entry>>,
    ttl: Duration,
    capacity: usize,
}

impl UsageCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        UsageCache {
            inner: Mutex::new(HashMap::new()),
            ttl,
            capacity,
        }
    }

    /// Returns the cached count, dropping the entry if its TTL has passed.
    pub fn get(&self, key: &UsageKey) -> Option<i64> {
        let mut map = self.lock();
        match map.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.count),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    /// Inserts or refreshes an entry, evicting the oldest one when full.
    pub fn insert(&self, key: UsageKey, count: i64) {
        let mut map = self.lock();
        if !map.contains_key(&key) && map.len() >= self.capacity {
            let oldest = map
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                map.remove(&oldest);
            }
        }
        map.insert(
            key,
            Entry {
                count,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &UsageKey) {
        self.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<UsageKey, Entry>> {
        // Poisoning marks a panic mid-insert; the map stays usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
