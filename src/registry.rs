//! Storage Registry
//!
//! Maps storage names to drivers. Built once at startup and read-only after
//! that, so lookups need no locking.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::clock::Clock;
use crate::config::StoragesConfig;
use crate::driver::{self, Driver};
use crate::error::{KvError, Result};

// == Registry Builder ==
/// Collects storages during startup.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    drivers: HashMap<String, Arc<dyn Driver>>,
    order: Vec<String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `driver`. A name can be registered only once.
    pub fn register(&mut self, name: impl Into<String>, driver: Arc<dyn Driver>) -> Result<()> {
        let name = name.into();
        if self.drivers.contains_key(&name) {
            return Err(KvError::Config(format!("duplicate storage name: {name}")));
        }
        self.order.push(name.clone());
        self.drivers.insert(name, driver);
        Ok(())
    }

    pub fn build(self) -> Registry {
        Registry {
            drivers: self.drivers,
            order: self.order,
        }
    }
}

// == Registry ==
#[derive(Debug)]
pub struct Registry {
    drivers: HashMap<String, Arc<dyn Driver>>,
    order: Vec<String>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Opens every configured storage, in declaration order.
    ///
    /// Drivers opened before a failure are shut down again before the error
    /// is returned.
    pub async fn from_config(config: &StoragesConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut builder = RegistryBuilder::new();

        for (name, driver_config) in &config.storages {
            let opened = match driver::open(name, driver_config, clock.clone()).await {
                Ok(driver) => builder.register(name.clone(), driver),
                Err(e) => Err(e),
            };
            if let Err(e) = opened {
                builder.build().shutdown().await;
                return Err(e);
            }
            info!(storage = %name, "storage registered");
        }

        Ok(builder.build())
    }

    /// Looks up the driver bound to `name`.
    pub fn resolve(&self, name: &str) -> Result<&Arc<dyn Driver>> {
        self.drivers.get(name).ok_or_else(|| KvError::NotFound {
            storage: name.to_string(),
        })
    }

    /// Storage names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Stops background work of every driver.
    pub async fn shutdown(&self) {
        for name in &self.order {
            if let Some(driver) = self.drivers.get(name) {
                driver.shutdown().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::{DriverConfig, MemoryConfig};
    use crate::driver::{DriverKind, MemoryDriver};
    use std::time::Duration;

    fn memory() -> Arc<dyn Driver> {
        let config = MemoryConfig {
            interval: Duration::ZERO,
            sweep_chunk: 16,
        };
        Arc::new(MemoryDriver::new("test", &config, Arc::new(SystemClock)))
    }

    #[test]
    fn test_register_and_resolve() {
        let mut builder = Registry::builder();
        builder.register("cache", memory()).unwrap();
        let registry = builder.build();

        let driver = registry.resolve("cache").unwrap();
        assert_eq!(driver.kind(), DriverKind::Memory);
    }

    #[test]
    fn test_duplicate_name_is_config_error() {
        let mut builder = Registry::builder();
        builder.register("cache", memory()).unwrap();

        let err = builder.register("cache", memory()).unwrap_err();
        assert!(matches!(err, KvError::Config(_)));
    }

    #[test]
    fn test_resolve_unknown_is_not_found() {
        let registry = Registry::builder().build();
        assert_eq!(
            registry.resolve("nope").unwrap_err(),
            KvError::NotFound {
                storage: "nope".to_string()
            }
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_from_config_keeps_order() {
        let memory = DriverConfig::Memory(MemoryConfig {
            interval: Duration::from_millis(50),
            sweep_chunk: 16,
        });
        let config = StoragesConfig {
            storages: vec![
                ("b".to_string(), memory.clone()),
                ("a".to_string(), memory),
            ],
        };

        let registry = Registry::from_config(&config, Arc::new(SystemClock))
            .await
            .unwrap();

        assert_eq!(registry.names(), ["b".to_string(), "a".to_string()]);
        assert_eq!(registry.len(), 2);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_from_config_rejects_duplicates() {
        let memory = DriverConfig::Memory(MemoryConfig::default());
        let config = StoragesConfig {
            storages: vec![
                ("cache".to_string(), memory.clone()),
                ("cache".to_string(), memory),
            ],
        };

        let err = Registry::from_config(&config, Arc::new(SystemClock))
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::Config(msg) if msg.contains("duplicate")));
    }
}
