//! Redb Driver
//!
//! Embedded persistent storage in a single redb file. Values and expiry
//! instants live in separate tables so a ttl change never rewrites the value,
//! and a third table orders keys by expiry for the sweep. Reads hide expired
//! keys; the sweep task deletes them from disk.
//!
//! redb calls block, so every operation runs on the blocking pool.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, Table, TableDefinition};
use tracing::info;

use crate::clock::Clock;
use crate::config::RedbConfig;
use crate::driver::{Capabilities, Driver, DriverKind, Item};
use crate::error::{DriverError, KvError};
use crate::tasks::{Sweep, SweepTask};

const VALUES: TableDefinition<&str, &[u8]> = TableDefinition::new("values");
/// Expiry instants as milliseconds since the Unix epoch
const EXPIRIES: TableDefinition<&str, i64> = TableDefinition::new("expiries");
/// Same expiries keyed by `(millis, key)`, earliest first
const DUE: TableDefinition<(i64, &str), ()> = TableDefinition::new("due");

fn storage_error(e: impl Into<redb::Error>) -> DriverError {
    DriverError::Storage(e.into().to_string())
}

type Expiries<'txn> = Table<'txn, &'static str, i64>;
type Due<'txn> = Table<'txn, (i64, &'static str), ()>;

/// Drops the expiry of `key` from both expiry tables.
fn unschedule(
    expiries: &mut Expiries<'_>,
    due: &mut Due<'_>,
    key: &str,
) -> Result<(), redb::Error> {
    let old = expiries.remove(key)?.map(|at| at.value());
    if let Some(old) = old {
        due.remove((old, key))?;
    }
    Ok(())
}

/// Sets the expiry of `key`, replacing any previous one.
fn schedule(
    expiries: &mut Expiries<'_>,
    due: &mut Due<'_>,
    key: &str,
    at: i64,
) -> Result<(), redb::Error> {
    unschedule(expiries, due, key)?;
    expiries.insert(key, at)?;
    due.insert((at, key), ())?;
    Ok(())
}

struct Db {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db").field("clock", &self.clock).finish()
    }
}

impl Db {
    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Expiry of a key if it is live, or None if missing or expired.
    fn live_expiry(
        values: &impl ReadableTable<&'static str, &'static [u8]>,
        expiries: &impl ReadableTable<&'static str, i64>,
        key: &str,
        now_ms: i64,
    ) -> Result<Option<Option<i64>>, redb::Error> {
        if values.get(key)?.is_none() {
            return Ok(None);
        }
        match expiries.get(key)?.map(|at| at.value()) {
            Some(at) if at <= now_ms => Ok(None),
            at => Ok(Some(at)),
        }
    }

    fn has(&self, keys: &[String]) -> Result<HashMap<String, bool>, redb::Error> {
        let now_ms = self.now_ms();
        let txn = self.db.begin_read()?;
        let values = txn.open_table(VALUES)?;
        let expiries = txn.open_table(EXPIRIES)?;

        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            let live = Self::live_expiry(&values, &expiries, key, now_ms)?.is_some();
            out.insert(key.clone(), live);
        }
        Ok(out)
    }

    fn get(&self, keys: &[String]) -> Result<Vec<(String, Bytes)>, redb::Error> {
        let now_ms = self.now_ms();
        let txn = self.db.begin_read()?;
        let values = txn.open_table(VALUES)?;
        let expiries = txn.open_table(EXPIRIES)?;

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if Self::live_expiry(&values, &expiries, key, now_ms)?.is_none() {
                continue;
            }
            if let Some(value) = values.get(key.as_str())? {
                out.push((key.clone(), Bytes::copy_from_slice(value.value())));
            }
        }
        Ok(out)
    }

    fn ttl(&self, keys: &[String]) -> Result<Vec<(String, Option<DateTime<Utc>>)>, redb::Error> {
        let now_ms = self.now_ms();
        let txn = self.db.begin_read()?;
        let values = txn.open_table(VALUES)?;
        let expiries = txn.open_table(EXPIRIES)?;

        let mut out = Vec::new();
        for key in keys {
            if let Some(at) = Self::live_expiry(&values, &expiries, key, now_ms)? {
                out.push((key.clone(), at.and_then(DateTime::from_timestamp_millis)));
            }
        }
        Ok(out)
    }

    fn set(&self, items: Vec<Item>) -> Result<(), redb::Error> {
        let now_ms = self.now_ms();
        let txn = self.db.begin_write()?;
        {
            let mut values = txn.open_table(VALUES)?;
            let mut expiries = txn.open_table(EXPIRIES)?;
            let mut due = txn.open_table(DUE)?;
            for item in items {
                let key = item.key.as_str();
                let at = item.ttl.map(|t| t.timestamp_millis());
                unschedule(&mut expiries, &mut due, key)?;
                if matches!(at, Some(at) if at <= now_ms) {
                    values.remove(key)?;
                    continue;
                }
                values.insert(key, &item.value[..])?;
                if let Some(at) = at {
                    schedule(&mut expiries, &mut due, key, at)?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn mexpire(&self, items: Vec<(String, DateTime<Utc>)>) -> Result<(), redb::Error> {
        let now_ms = self.now_ms();
        let txn = self.db.begin_write()?;
        {
            let mut values = txn.open_table(VALUES)?;
            let mut expiries = txn.open_table(EXPIRIES)?;
            let mut due = txn.open_table(DUE)?;
            for (key, at) in items {
                let key = key.as_str();
                if Self::live_expiry(&values, &expiries, key, now_ms)?.is_none() {
                    continue;
                }
                let at = at.timestamp_millis();
                if at <= now_ms {
                    values.remove(key)?;
                    unschedule(&mut expiries, &mut due, key)?;
                } else {
                    schedule(&mut expiries, &mut due, key, at)?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> Result<(), redb::Error> {
        let txn = self.db.begin_write()?;
        {
            let mut values = txn.open_table(VALUES)?;
            let mut expiries = txn.open_table(EXPIRIES)?;
            let mut due = txn.open_table(DUE)?;
            for key in keys {
                values.remove(key.as_str())?;
                unschedule(&mut expiries, &mut due, key)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn clear(&self) -> Result<(), redb::Error> {
        let txn = self.db.begin_write()?;
        txn.delete_table(VALUES)?;
        txn.delete_table(EXPIRIES)?;
        txn.delete_table(DUE)?;
        txn.open_table(VALUES)?;
        txn.open_table(EXPIRIES)?;
        txn.open_table(DUE)?;
        txn.commit()?;
        Ok(())
    }

    /// Removes up to `limit` expired keys, earliest expiry first. Stops at the
    /// first entry that is not due yet.
    fn sweep(&self, limit: usize) -> Result<usize, redb::Error> {
        let now_ms = self.now_ms();
        let txn = self.db.begin_write()?;
        let removed = {
            let mut values = txn.open_table(VALUES)?;
            let mut expiries = txn.open_table(EXPIRIES)?;
            let mut due = txn.open_table(DUE)?;

            let mut expired: Vec<(i64, String)> = Vec::new();
            for row in due.iter()? {
                let (entry, _) = row?;
                let (at, key) = entry.value();
                if at > now_ms || expired.len() >= limit {
                    break;
                }
                expired.push((at, key.to_string()));
            }
            for (at, key) in &expired {
                due.remove((*at, key.as_str()))?;
                expiries.remove(key.as_str())?;
                values.remove(key.as_str())?;
            }
            expired.len()
        };
        txn.commit()?;
        Ok(removed)
    }
}

/// Sweep adapter running chunk removal on the blocking pool.
#[derive(Debug)]
struct DbSweep(Arc<Db>);

#[async_trait]
impl Sweep for DbSweep {
    async fn sweep_chunk(&self, limit: usize) -> Result<usize, DriverError> {
        let db = self.0.clone();
        blocking(move || db.sweep(limit)).await
    }
}

async fn blocking<T, F>(f: F) -> Result<T, DriverError>
where
    F: FnOnce() -> Result<T, redb::Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DriverError::Storage(e.to_string()))?
        .map_err(storage_error)
}

#[derive(Debug)]
pub struct RedbDriver {
    db: Arc<Db>,
    sweeper: Option<SweepTask>,
}

impl RedbDriver {
    /// Opens (or creates) the database file and starts the sweep.
    ///
    /// # Arguments
    /// * `name` - Storage name, used in log fields of the sweep task
    /// * `config` - Database path, sweep interval (zero disables) and chunk size
    /// * `clock` - Time source for expiry checks
    ///
    /// # Returns
    /// The driver with all three tables created, or `KvError::Config` if the
    /// file cannot be opened.
    pub async fn open(
        name: &str,
        config: &RedbConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, KvError> {
        let path = config.file.clone();
        let db = tokio::task::spawn_blocking(move || -> Result<Database, redb::Error> {
            let db = Database::create(&path)?;
            let txn = db.begin_write()?;
            txn.open_table(VALUES)?;
            txn.open_table(EXPIRIES)?;
            txn.open_table(DUE)?;
            txn.commit()?;
            Ok(db)
        })
        .await
        .map_err(|e| KvError::Config(e.to_string()))?
        .map_err(|e| KvError::Config(format!("opening {}: {}", config.file.display(), e)))?;

        info!(storage = name, file = %config.file.display(), "redb storage opened");

        let db = Arc::new(Db { db, clock });
        let sweeper = (!config.interval.is_zero()).then(|| {
            SweepTask::start(
                name,
                Arc::new(DbSweep(db.clone())),
                config.interval,
                config.sweep_chunk,
            )
        });

        Ok(Self { db, sweeper })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, DriverError>
    where
        F: FnOnce(&Db) -> Result<T, redb::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        blocking(move || f(db.as_ref())).await
    }
}

#[async_trait]
impl Driver for RedbDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Redb
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    async fn has(&self, keys: &[String]) -> Result<HashMap<String, bool>, DriverError> {
        let keys = keys.to_vec();
        self.run(move |db| db.has(&keys)).await
    }

    async fn get(&self, keys: &[String]) -> Result<Vec<(String, Bytes)>, DriverError> {
        let keys = keys.to_vec();
        self.run(move |db| db.get(&keys)).await
    }

    async fn set(&self, items: Vec<Item>) -> Result<(), DriverError> {
        self.run(move |db| db.set(items)).await
    }

    async fn mexpire(&self, items: Vec<(String, DateTime<Utc>)>) -> Result<(), DriverError> {
        self.run(move |db| db.mexpire(items)).await
    }

    async fn ttl(
        &self,
        keys: &[String],
    ) -> Result<Vec<(String, Option<DateTime<Utc>>)>, DriverError> {
        let keys = keys.to_vec();
        self.run(move |db| db.ttl(&keys)).await
    }

    async fn delete(&self, keys: &[String]) -> Result<(), DriverError> {
        let keys = keys.to_vec();
        self.run(move |db| db.delete(&keys)).await
    }

    async fn clear(&self) -> Result<(), DriverError> {
        self.run(|db| db.clear()).await
    }

    async fn shutdown(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn open(dir: &tempfile::TempDir) -> (RedbDriver, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = RedbConfig {
            file: dir.path().join("kv.redb"),
            interval: StdDuration::ZERO,
            sweep_chunk: 2,
        };
        let driver = RedbDriver::open("local", &config, clock.clone())
            .await
            .unwrap();
        (driver, clock)
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (driver, _) = open(&dir).await;
        let value = Bytes::from(vec![0u8, 159, 146, 150]);

        driver.set(vec![Item::new("bin", value.clone())]).await.unwrap();

        let got = driver.get(&keys(&["bin", "missing"])).await.unwrap();
        assert_eq!(got, vec![("bin".to_string(), value)]);
    }

    #[tokio::test]
    async fn test_expired_keys_are_hidden_then_swept() {
        let dir = tempfile::tempdir().unwrap();
        let (driver, clock) = open(&dir).await;
        let ttl = clock.now() + Duration::seconds(1);
        driver
            .set(vec![
                Item::new("a", "1").with_ttl(ttl),
                Item::new("b", "2").with_ttl(ttl),
                Item::new("c", "3").with_ttl(ttl),
                Item::new("keep", "4"),
            ])
            .await
            .unwrap();

        clock.advance(Duration::seconds(2));

        let has = driver.has(&keys(&["a", "keep"])).await.unwrap();
        assert_eq!(has.get("a"), Some(&false));
        assert_eq!(has.get("keep"), Some(&true));

        let sweep = DbSweep(driver.db.clone());
        assert_eq!(sweep.sweep_chunk(2).await.unwrap(), 2);
        assert_eq!(sweep.sweep_chunk(2).await.unwrap(), 1);
        assert_eq!(sweep.sweep_chunk(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_takes_earliest_expiry_first() {
        let dir = tempfile::tempdir().unwrap();
        let (driver, clock) = open(&dir).await;
        let later = clock.now() + Duration::seconds(60);
        let soon = clock.now() + Duration::seconds(1);
        driver
            .set(vec![
                Item::new("a", "1").with_ttl(later),
                Item::new("b", "2").with_ttl(later),
                Item::new("z", "3").with_ttl(soon),
            ])
            .await
            .unwrap();

        clock.advance(Duration::seconds(2));

        let sweep = DbSweep(driver.db.clone());
        assert_eq!(sweep.sweep_chunk(1).await.unwrap(), 1);
        assert_eq!(sweep.sweep_chunk(1).await.unwrap(), 0);
        assert_eq!(driver.get(&keys(&["a", "b", "z"])).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rescheduled_keys_are_not_swept_early() {
        let dir = tempfile::tempdir().unwrap();
        let (driver, clock) = open(&dir).await;
        let soon = clock.now() + Duration::seconds(1);
        driver
            .set(vec![
                Item::new("moved", "1").with_ttl(soon),
                Item::new("persisted", "2").with_ttl(soon),
            ])
            .await
            .unwrap();

        driver
            .mexpire(vec![("moved".to_string(), clock.now() + Duration::seconds(60))])
            .await
            .unwrap();
        driver.set(vec![Item::new("persisted", "3")]).await.unwrap();
        clock.advance(Duration::seconds(2));

        let sweep = DbSweep(driver.db.clone());
        assert_eq!(sweep.sweep_chunk(10).await.unwrap(), 0);
        assert_eq!(
            driver.get(&keys(&["moved", "persisted"])).await.unwrap(),
            vec![
                ("moved".to_string(), Bytes::from("1")),
                ("persisted".to_string(), Bytes::from("3")),
            ]
        );
    }

    #[tokio::test]
    async fn test_ttl_and_mexpire() {
        let dir = tempfile::tempdir().unwrap();
        let (driver, clock) = open(&dir).await;
        driver.set(vec![Item::new("a", "1")]).await.unwrap();

        assert_eq!(
            driver.ttl(&keys(&["a", "zz"])).await.unwrap(),
            vec![("a".to_string(), None)]
        );

        let at = DateTime::from_timestamp_millis(
            (clock.now() + Duration::seconds(30)).timestamp_millis(),
        )
        .unwrap();
        driver.mexpire(vec![("a".to_string(), at)]).await.unwrap();
        assert_eq!(
            driver.ttl(&keys(&["a"])).await.unwrap(),
            vec![("a".to_string(), Some(at))]
        );

        driver
            .mexpire(vec![("a".to_string(), clock.now() - Duration::seconds(1))])
            .await
            .unwrap();
        assert!(driver.get(&keys(&["a"])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let (driver, _) = open(&dir).await;
        driver
            .set(vec![Item::new("a", "1"), Item::new("b", "2"), Item::new("c", "3")])
            .await
            .unwrap();

        driver.delete(&keys(&["a", "ghost"])).await.unwrap();
        assert_eq!(driver.get(&keys(&["a", "b"])).await.unwrap().len(), 1);

        driver.clear().await.unwrap();
        let has = driver.has(&keys(&["a", "b", "c"])).await.unwrap();
        assert!(has.values().all(|present| !present));
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (driver, _) = open(&dir).await;
            driver.set(vec![Item::new("persist", "yes")]).await.unwrap();
            driver.shutdown().await;
        }

        let (driver, _) = open(&dir).await;
        let got = driver.get(&keys(&["persist"])).await.unwrap();
        assert_eq!(got, vec![("persist".to_string(), Bytes::from("yes"))]);
    }
}
