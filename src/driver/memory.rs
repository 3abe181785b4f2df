//! Memory Driver
//!
//! Serves the full capability set from a `CacheStore` guarded by one mutex.
//! Reads evict expired entries on the spot; a `SweepTask` started at
//! construction removes expired entries nobody reads.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::cache::{CacheStats, CacheStore};
use crate::clock::Clock;
use crate::config::MemoryConfig;
use crate::driver::{Capabilities, Driver, DriverKind, Item};
use crate::error::DriverError;
use crate::tasks::{Sweep, SweepTask};

/// Store plus clock, shared between the driver and its sweep task.
#[derive(Debug)]
struct Table {
    store: Mutex<CacheStore>,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl Sweep for Table {
    async fn sweep_chunk(&self, limit: usize) -> Result<usize, DriverError> {
        let now = self.clock.now();
        Ok(self.store.lock().sweep_expired(now, limit))
    }
}

#[derive(Debug)]
pub struct MemoryDriver {
    table: Arc<Table>,
    sweeper: Option<SweepTask>,
}

impl MemoryDriver {
    /// Creates the driver and starts its sweep unless `interval` is zero.
    ///
    /// Must be called inside a Tokio runtime when the sweep is enabled.
    pub fn new(name: &str, config: &MemoryConfig, clock: Arc<dyn Clock>) -> Self {
        let table = Arc::new(Table {
            store: Mutex::new(CacheStore::new()),
            clock,
        });

        let sweeper = (!config.interval.is_zero()).then(|| {
            SweepTask::start(
                name,
                table.clone() as Arc<dyn Sweep>,
                config.interval,
                config.sweep_chunk,
            )
        });

        Self { table, sweeper }
    }

    /// Number of physically stored entries, including expired ones not yet
    /// evicted.
    pub fn len(&self) -> usize {
        self.table.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn now(&self) -> DateTime<Utc> {
        self.table.clock.now()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Memory
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    async fn has(&self, keys: &[String]) -> Result<HashMap<String, bool>, DriverError> {
        let now = self.now();
        let mut store = self.table.store.lock();
        Ok(keys
            .iter()
            .map(|key| (key.clone(), store.has(key, now)))
            .collect())
    }

    async fn get(&self, keys: &[String]) -> Result<Vec<(String, Bytes)>, DriverError> {
        let now = self.now();
        let mut store = self.table.store.lock();
        Ok(keys
            .iter()
            .filter_map(|key| store.get(key, now).map(|value| (key.clone(), value)))
            .collect())
    }

    async fn set(&self, items: Vec<Item>) -> Result<(), DriverError> {
        let now = self.now();
        let mut store = self.table.store.lock();
        for item in items {
            store.set(item.key, item.value, item.ttl, now);
        }
        Ok(())
    }

    async fn mexpire(&self, items: Vec<(String, DateTime<Utc>)>) -> Result<(), DriverError> {
        let now = self.now();
        let mut store = self.table.store.lock();
        for (key, at) in items {
            store.expire(&key, at, now);
        }
        Ok(())
    }

    async fn ttl(
        &self,
        keys: &[String],
    ) -> Result<Vec<(String, Option<DateTime<Utc>>)>, DriverError> {
        let now = self.now();
        let mut store = self.table.store.lock();
        Ok(keys
            .iter()
            .filter_map(|key| store.ttl(key, now).map(|at| (key.clone(), at)))
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), DriverError> {
        let mut store = self.table.store.lock();
        for key in keys {
            store.delete(key);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), DriverError> {
        self.table.store.lock().clear();
        Ok(())
    }

    fn stats(&self) -> Option<CacheStats> {
        Some(self.table.store.lock().stats())
    }

    async fn shutdown(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.stop().await;
        }
    }
}
