//! Redis Driver
//!
//! Talks to a Redis server through an auto-reconnecting `ConnectionManager`.
//! Multi-key writes go out as one non-atomic pipeline: each key succeeds or
//! fails on its own.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::{Pipeline, RedisError};
use tracing::info;

use crate::clock::Clock;
use crate::config::RedisConfig;
use crate::driver::{Capabilities, Driver, DriverKind, Item};
use crate::error::{DriverError, KvError};

/// PTTL reply for a key that does not exist.
const PTTL_MISSING: i64 = -2;
/// PTTL reply for a key without expiry.
const PTTL_PERSISTENT: i64 = -1;

fn driver_error(e: RedisError) -> DriverError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
    {
        DriverError::Connection(e.to_string())
    } else {
        DriverError::Protocol(e.to_string())
    }
}

/// Turns a PTTL reply into an absolute expiry. `None` means the key is missing.
fn pttl_to_expiry(pttl: i64, now: DateTime<Utc>) -> Option<Option<DateTime<Utc>>> {
    match pttl {
        PTTL_MISSING => None,
        PTTL_PERSISTENT => Some(None),
        ms if ms >= 0 => Some(Some(now + Duration::milliseconds(ms))),
        _ => None,
    }
}

/// SET with an absolute PXAT deadline per item; items already expired become DEL.
fn set_pipeline(items: &[Item], now: DateTime<Utc>) -> Pipeline {
    let mut pipe = redis::pipe();
    for item in items {
        match item.ttl {
            Some(at) if at <= now => {
                pipe.cmd("DEL").arg(&item.key).ignore();
            }
            Some(at) => {
                pipe.cmd("SET")
                    .arg(&item.key)
                    .arg(&item.value[..])
                    .arg("PXAT")
                    .arg(at.timestamp_millis())
                    .ignore();
            }
            None => {
                pipe.cmd("SET").arg(&item.key).arg(&item.value[..]).ignore();
            }
        }
    }
    pipe
}

// PEXPIREAT with a past instant deletes the key server-side.
fn mexpire_pipeline(items: &[(String, DateTime<Utc>)]) -> Pipeline {
    let mut pipe = redis::pipe();
    for (key, at) in items {
        pipe.cmd("PEXPIREAT")
            .arg(key)
            .arg(at.timestamp_millis())
            .ignore();
    }
    pipe
}

#[derive(Clone)]
pub struct RedisDriver {
    conn: ConnectionManager,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RedisDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisDriver")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl RedisDriver {
    /// Connects to the configured server.
    ///
    /// # Arguments
    /// * `config` - Server url (`redis://host:port/db`)
    /// * `clock` - Time source used to turn PTTL replies into instants
    ///
    /// # Returns
    /// A driver sharing one auto-reconnecting connection, or
    /// `KvError::Config` if the url is malformed or the server is unreachable.
    pub async fn connect(config: &RedisConfig, clock: Arc<dyn Clock>) -> Result<Self, KvError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| KvError::Config(format!("redis url {}: {}", config.url, e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Config(format!("connecting to {}: {}", config.url, e)))?;

        info!(url = %config.url, "redis storage connected");
        Ok(Self { conn, clock })
    }

    /// Runs a pipeline whose replies are all ignored.
    async fn exec(&self, pipe: &Pipeline) -> Result<(), DriverError> {
        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(driver_error)
    }
}

#[async_trait]
impl Driver for RedisDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Redis
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    async fn has(&self, keys: &[String]) -> Result<HashMap<String, bool>, DriverError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("EXISTS").arg(key);
        }
        let mut conn = self.conn.clone();
        let flags: Vec<bool> = pipe
            .query_async(&mut conn)
            .await
            .map_err(driver_error)?;

        Ok(keys.iter().cloned().zip(flags).collect())
    }

    async fn get(&self, keys: &[String]) -> Result<Vec<(String, Bytes)>, DriverError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(driver_error)?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key.clone(), Bytes::from(v))))
            .collect())
    }

    async fn set(&self, items: Vec<Item>) -> Result<(), DriverError> {
        if items.is_empty() {
            return Ok(());
        }
        self.exec(&set_pipeline(&items, self.clock.now())).await
    }

    async fn mexpire(&self, items: Vec<(String, DateTime<Utc>)>) -> Result<(), DriverError> {
        if items.is_empty() {
            return Ok(());
        }
        self.exec(&mexpire_pipeline(&items)).await
    }

    async fn ttl(
        &self,
        keys: &[String],
    ) -> Result<Vec<(String, Option<DateTime<Utc>>)>, DriverError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("PTTL").arg(key);
        }
        let mut conn = self.conn.clone();
        let replies: Vec<i64> = pipe
            .query_async(&mut conn)
            .await
            .map_err(driver_error)?;

        let now = self.clock.now();
        Ok(keys
            .iter()
            .zip(replies)
            .filter_map(|(key, pttl)| pttl_to_expiry(pttl, now).map(|at| (key.clone(), at)))
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), DriverError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(keys)
            .query_async::<()>(&mut conn)
            .await
            .map_err(driver_error)
    }

    async fn clear(&self) -> Result<(), DriverError> {
        let mut conn = self.conn.clone();
        redis::cmd("FLUSHDB")
            .query_async::<()>(&mut conn)
            .await
            .map_err(driver_error)
    }
}
