//! Memcached Driver
//!
//! Uses the pooled, blocking `memcache` client on Tokio's blocking pool.
//! memcached cannot report a key's remaining lifetime, so this driver does not
//! advertise TTL.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use memcache::{Client, MemcacheError};
use tracing::info;

use crate::clock::Clock;
use crate::config::MemcachedConfig;
use crate::driver::{Capabilities, Driver, DriverKind, Item};
use crate::error::{DriverError, KvError};

/// Relative expirations above this many seconds are read by memcached as
/// absolute unix timestamps.
const MAX_RELATIVE_EXPIRATION: i64 = 60 * 60 * 24 * 30;

fn driver_error(e: MemcacheError) -> DriverError {
    match e {
        MemcacheError::IOError(e) => DriverError::Connection(e.to_string()),
        other => DriverError::Protocol(other.to_string()),
    }
}

/// Expiration argument for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiration {
    /// Already expired: the key must be deleted instead
    Past,
    /// Value to send as memcached's `exptime`
    At(u32),
}

fn expiration(ttl: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Expiration {
    let Some(at) = ttl else {
        return Expiration::At(0);
    };
    let secs = (at - now).num_seconds();
    if at <= now || secs <= 0 {
        // Sub-second lifetimes round down to "expired"
        Expiration::Past
    } else if secs > MAX_RELATIVE_EXPIRATION {
        Expiration::At(u32::try_from(at.timestamp()).unwrap_or(u32::MAX))
    } else {
        Expiration::At(secs as u32)
    }
}

pub struct MemcachedDriver {
    client: Arc<Client>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for MemcachedDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemcachedDriver")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl MemcachedDriver {
    /// Everything except TTL: memcached cannot report remaining lifetimes.
    pub const CAPABILITIES: Capabilities = Capabilities::all().difference(Capabilities::TTL);

    /// Builds the connection pool for every configured address.
    ///
    /// # Arguments
    /// * `config` - Server addresses (`memcache://host:port`)
    /// * `clock` - Time source for converting ttls into memcached expirations
    ///
    /// # Returns
    /// The driver, or `KvError::Config` if any server cannot be reached.
    pub async fn connect(
        config: &MemcachedConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, KvError> {
        let addrs = config.addrs.clone();
        let client = tokio::task::spawn_blocking(move || Client::connect(addrs))
            .await
            .map_err(|e| KvError::Config(e.to_string()))?
            .map_err(|e| KvError::Config(format!("connecting to memcached: {e}")))?;

        info!(addrs = ?config.addrs, "memcached storage connected");
        Ok(Self {
            client: Arc::new(client),
            clock,
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, DriverError>
    where
        F: FnOnce(&Client) -> Result<T, MemcacheError> + Send + 'static,
        T: Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || f(client.as_ref()))
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?
            .map_err(driver_error)
    }

    async fn fetch(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, DriverError> {
        let keys = keys.to_vec();
        self.run(move |client| {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            client.gets::<Vec<u8>>(&refs)
        })
        .await
    }
}

#[async_trait]
impl Driver for MemcachedDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Memcached
    }

    fn capabilities(&self) -> Capabilities {
        Self::CAPABILITIES
    }

    async fn has(&self, keys: &[String]) -> Result<HashMap<String, bool>, DriverError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let found = self.fetch(keys).await?;
        Ok(keys
            .iter()
            .map(|key| (key.clone(), found.contains_key(key)))
            .collect())
    }

    async fn get(&self, keys: &[String]) -> Result<Vec<(String, Bytes)>, DriverError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut found = self.fetch(keys).await?;
        Ok(keys
            .iter()
            .filter_map(|key| found.remove(key).map(|v| (key.clone(), Bytes::from(v))))
            .collect())
    }

    async fn set(&self, items: Vec<Item>) -> Result<(), DriverError> {
        let now = self.clock.now();
        self.run(move |client| {
            for item in &items {
                match expiration(item.ttl, now) {
                    Expiration::Past => {
                        client.delete(&item.key)?;
                    }
                    Expiration::At(exptime) => client.set(&item.key, &item.value[..], exptime)?,
                }
            }
            Ok(())
        })
        .await
    }

    async fn mexpire(&self, items: Vec<(String, DateTime<Utc>)>) -> Result<(), DriverError> {
        let now = self.clock.now();
        self.run(move |client| {
            for (key, at) in &items {
                match expiration(Some(*at), now) {
                    Expiration::Past => {
                        client.delete(key)?;
                    }
                    Expiration::At(exptime) => {
                        client.touch(key, exptime)?;
                    }
                }
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, keys: &[String]) -> Result<(), DriverError> {
        let keys = keys.to_vec();
        self.run(move |client| {
            for key in &keys {
                client.delete(key)?;
            }
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<(), DriverError> {
        self.run(|client| client.flush()).await
    }
}
