//! Cache Store Module
//!
//! The in-memory table: a HashMap of entries plus an index of expiry instants
//! ordered by time, so the sweep can take the oldest expired keys in chunks
//! without scanning the whole table.
//!
//! The store itself is not synchronized. `MemoryDriver` wraps it in a single
//! mutex shared by foreground calls and the sweep task.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::cache::{CacheEntry, CacheStats};

// == Cache Store ==
#[derive(Debug, Default)]
pub struct CacheStore {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// (expiry, key) for every entry that has a ttl
    expiries: BTreeSet<(DateTime<Utc>, String)>,
    /// Lookup and eviction counters
    stats: CacheStats,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    // == Has ==
    /// Reports whether a live entry exists, evicting it if it has expired.
    pub fn has(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        self.live(key, now).is_some()
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// Expired entries are removed and counted as misses.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<Bytes> {
        let value = self.live(key, now).map(|entry| entry.value.clone());
        match value {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        value
    }

    // == TTL ==
    /// Returns `Some(expiry)` for a live key, `None` if the key is absent.
    pub fn ttl(&mut self, key: &str, now: DateTime<Utc>) -> Option<Option<DateTime<Utc>>> {
        self.live(key, now).map(|entry| entry.expires_at)
    }

    // == Set ==
    /// Stores a value, replacing both value and expiry of an existing key.
    ///
    /// A ttl at or before `now` leaves the key absent.
    pub fn set(
        &mut self,
        key: String,
        value: Bytes,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        self.remove(&key);

        if matches!(expires_at, Some(at) if at <= now) {
            return;
        }

        if let Some(at) = expires_at {
            self.expiries.insert((at, key.clone()));
        }
        self.entries.insert(key, CacheEntry::new(value, expires_at));
        self.stats.set_total_entries(self.entries.len());
    }

    // == Expire ==
    /// Replaces the expiry of a live key without touching its value.
    ///
    /// A ttl at or before `now` deletes the key immediately. Returns false if
    /// the key was absent.
    pub fn expire(&mut self, key: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.live(key, now).is_none() {
            return false;
        }
        if expires_at <= now {
            self.remove(key);
            return true;
        }

        if let Some(entry) = self.entries.get_mut(key) {
            if let Some(previous) = entry.expires_at.replace(expires_at) {
                self.expiries.remove(&(previous, key.to_string()));
            }
            self.expiries.insert((expires_at, key.to_string()));
        }
        true
    }

    // == Delete ==
    /// Removes an entry by key. Missing keys are ignored.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove(key).is_some()
    }

    // == Clear ==
    /// Drops every entry. Returns how many were held.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.expiries.clear();
        self.stats.set_total_entries(0);
        count
    }

    // == Sweep Expired ==
    /// Removes up to `limit` entries whose expiry is at or before `now`,
    /// oldest first. Returns the number removed.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>, limit: usize) -> usize {
        let mut removed = 0;

        while removed < limit {
            match self.expiries.first() {
                Some((at, _)) if *at <= now => {}
                _ => break,
            }
            if let Some((_, key)) = self.expiries.pop_first() {
                self.entries.remove(&key);
                removed += 1;
            }
        }

        self.stats.record_swept(removed);
        self.stats.set_total_entries(self.entries.len());
        removed
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    /// Number of physically stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // == Internals ==
    /// Returns the entry if it is live, evicting it first if it has expired.
    fn live(&mut self, key: &str, now: DateTime<Utc>) -> Option<&CacheEntry> {
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            self.remove(key);
            self.stats.record_expired();
            return None;
        }
        self.entries.get(key)
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        if let Some(at) = entry.expires_at {
            self.expiries.remove(&(at, key.to_string()));
        }
        self.stats.set_total_entries(self.entries.len());
        Some(entry)
    }
}
