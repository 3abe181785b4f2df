//! Driver Module
//!
//! The capability contract every storage backend implements, plus the
//! factory that turns a configured driver kind into a live driver.
//!
//! # Drivers
//! - `memory` - in-process table with lazy and active expiration
//! - `redb` - embedded persistent database file
//! - `redis` - external Redis server
//! - `memcached` - external memcached pool (no TTL queries)

mod memcached;
mod memory;
mod redb;
mod redis;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bitflags::bitflags;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::clock::Clock;
use crate::config::DriverConfig;
use crate::error::{DriverError, KvError};

pub use self::memcached::MemcachedDriver;
pub use self::memory::MemoryDriver;
pub use self::redb::RedbDriver;
pub use self::redis::RedisDriver;

// == Operation ==
/// Operations reachable through the RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Has,
    Set,
    MGet,
    MExpire,
    #[serde(rename = "TTL")]
    Ttl,
    Delete,
    Clear,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Has,
        Operation::Set,
        Operation::MGet,
        Operation::MExpire,
        Operation::Ttl,
        Operation::Delete,
        Operation::Clear,
    ];

    /// Capability a driver must advertise to serve this operation.
    pub fn capability(self) -> Capabilities {
        match self {
            Operation::Has => Capabilities::HAS,
            Operation::Set => Capabilities::SET,
            Operation::MGet => Capabilities::GET,
            Operation::MExpire => Capabilities::MEXPIRE,
            Operation::Ttl => Capabilities::TTL,
            Operation::Delete => Capabilities::DELETE,
            Operation::Clear => Capabilities::CLEAR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Has => "Has",
            Operation::Set => "Set",
            Operation::MGet => "MGet",
            Operation::MExpire => "MExpire",
            Operation::Ttl => "TTL",
            Operation::Delete => "Delete",
            Operation::Clear => "Clear",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Capabilities ==
bitflags! {
    /// Set of operations a driver supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        const HAS = 0x01;
        const GET = 0x02;
        const SET = 0x04;
        const MEXPIRE = 0x08;
        const TTL = 0x10;
        const DELETE = 0x20;
        const CLEAR = 0x40;
    }
}

impl Capabilities {
    pub fn supports(self, operation: Operation) -> bool {
        self.contains(operation.capability())
    }

    /// Supported operations, in RPC order.
    pub fn operations(self) -> Vec<Operation> {
        Operation::ALL
            .into_iter()
            .filter(|op| self.supports(*op))
            .collect()
    }
}

// == Driver Kind ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Memory,
    Redb,
    Redis,
    Memcached,
}

// == Item ==
/// A key with its opaque value and optional absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: String,
    pub value: Bytes,
    pub ttl: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: DateTime<Utc>) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

// == Driver Trait ==
/// Capability contract for a storage backend.
///
/// The default bodies reject the call with `DriverError::Unsupported`; a
/// driver overrides exactly the operations it lists in `capabilities()`.
/// Drivers are shared across concurrent callers and synchronize internally.
#[async_trait]
pub trait Driver: Send + Sync + fmt::Debug {
    fn kind(&self) -> DriverKind;

    fn capabilities(&self) -> Capabilities;

    /// Presence flag for every requested key.
    async fn has(&self, _keys: &[String]) -> Result<HashMap<String, bool>, DriverError> {
        Err(DriverError::Unsupported(Operation::Has))
    }

    /// Values of the present keys, in request order. Missing keys are omitted.
    async fn get(&self, _keys: &[String]) -> Result<Vec<(String, Bytes)>, DriverError> {
        Err(DriverError::Unsupported(Operation::MGet))
    }

    /// Stores every item, replacing value and ttl of existing keys.
    async fn set(&self, _items: Vec<Item>) -> Result<(), DriverError> {
        Err(DriverError::Unsupported(Operation::Set))
    }

    /// Replaces the ttl of existing keys. A ttl at or before now deletes the key.
    async fn mexpire(&self, _items: Vec<(String, DateTime<Utc>)>) -> Result<(), DriverError> {
        Err(DriverError::Unsupported(Operation::MExpire))
    }

    /// Expiry of the present keys; `None` means the key never expires.
    async fn ttl(
        &self,
        _keys: &[String],
    ) -> Result<Vec<(String, Option<DateTime<Utc>>)>, DriverError> {
        Err(DriverError::Unsupported(Operation::Ttl))
    }

    async fn delete(&self, _keys: &[String]) -> Result<(), DriverError> {
        Err(DriverError::Unsupported(Operation::Delete))
    }

    async fn clear(&self) -> Result<(), DriverError> {
        Err(DriverError::Unsupported(Operation::Clear))
    }

    fn stats(&self) -> Option<CacheStats> {
        None
    }

    /// Stops background work owned by the driver.
    async fn shutdown(&self) {}
}

// == Factory ==
/// Opens the driver described by `config`.
///
/// Any failure (bad options, unreachable backend) is a `KvError::Config`,
/// which aborts startup.
pub async fn open(
    name: &str,
    config: &DriverConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn Driver>, KvError> {
    let driver: Arc<dyn Driver> = match config {
        DriverConfig::Memory(cfg) => Arc::new(MemoryDriver::new(name, cfg, clock)),
        DriverConfig::Redb(cfg) => Arc::new(RedbDriver::open(name, cfg, clock).await?),
        DriverConfig::Redis(cfg) => Arc::new(RedisDriver::connect(cfg, clock).await?),
        DriverConfig::Memcached(cfg) => Arc::new(MemcachedDriver::connect(cfg, clock).await?),
    };
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_serde_names() {
        let json = serde_json::to_string(&Operation::Ttl).unwrap();
        assert_eq!(json, r#""TTL""#);
        let op: Operation = serde_json::from_str(r#""MExpire""#).unwrap();
        assert_eq!(op, Operation::MExpire);
    }

    #[test]
    fn test_capabilities_without_ttl() {
        let caps = Capabilities::all() - Capabilities::TTL;
        assert!(!caps.supports(Operation::Ttl));
        assert!(caps.supports(Operation::MGet));
        assert_eq!(caps.operations().len(), 6);
    }

    #[derive(Debug)]
    struct Bare;

    #[async_trait]
    impl Driver for Bare {
        fn kind(&self) -> DriverKind {
            DriverKind::Memory
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::empty()
        }
    }

    #[tokio::test]
    async fn test_default_bodies_report_unsupported() {
        let driver = Bare;
        assert_eq!(
            driver.ttl(&["k".to_string()]).await,
            Err(DriverError::Unsupported(Operation::Ttl))
        );
        assert_eq!(
            driver.clear().await,
            Err(DriverError::Unsupported(Operation::Clear))
        );
    }
}
