//! Configuration Module
//!
//! Server settings come from environment variables. Storage definitions come
//! from a YAML file: an ordered mapping of storage name to driver options.
//!
//! ```yaml
//! storages:
//!   cache:
//!     driver: memory
//!     interval: 1s
//!   shared:
//!     driver: redis
//!     url: redis://127.0.0.1:6379
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::DEFAULT_SWEEP_CHUNK;
use crate::error::KvError;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Path of the YAML storage definitions
    pub storages_path: PathBuf,
    /// Wrap every dispatched call in a tracing span
    pub trace_spans: bool,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `KV_CONFIG` - storage definitions file (default: kv.yaml)
    /// - `KV_TRACE_SPANS` - per-call spans, `true`/`false` (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_port),
            storages_path: env::var("KV_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(defaults.storages_path),
            trace_spans: env::var("KV_TRACE_SPANS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.trace_spans),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            storages_path: PathBuf::from("kv.yaml"),
            trace_spans: true,
        }
    }
}

// == Storage Definitions ==
/// Storages in declaration order.
#[derive(Debug, Clone, Default)]
pub struct StoragesConfig {
    pub storages: Vec<(String, DriverConfig)>,
}

#[derive(Deserialize)]
struct RawStorages {
    #[serde(default)]
    storages: serde_yaml::Mapping,
}

impl StoragesConfig {
    /// Reads and parses the storage definitions file.
    pub fn load(path: &Path) -> Result<Self, KvError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| KvError::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// Parses storage definitions, keeping the order they were written in.
    pub fn parse(text: &str) -> Result<Self, KvError> {
        let raw: RawStorages =
            serde_yaml::from_str(text).map_err(|e| KvError::Config(e.to_string()))?;

        let mut storages = Vec::with_capacity(raw.storages.len());
        for (name, options) in raw.storages {
            let name = name
                .as_str()
                .ok_or_else(|| KvError::Config(format!("storage name must be a string: {name:?}")))?
                .to_string();
            let driver: DriverConfig = serde_yaml::from_value(options)
                .map_err(|e| KvError::Config(format!("storage {name}: {e}")))?;
            driver
                .validate()
                .map_err(|e| KvError::Config(format!("storage {name}: {e}")))?;
            storages.push((name, driver));
        }

        Ok(Self { storages })
    }
}

// == Driver Options ==
/// Options for one storage, tagged by driver kind.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum DriverConfig {
    Memory(MemoryConfig),
    Redb(RedbConfig),
    Redis(RedisConfig),
    Memcached(MemcachedConfig),
}

impl DriverConfig {
    fn validate(&self) -> Result<(), String> {
        match self {
            DriverConfig::Memcached(cfg) if cfg.addrs.is_empty() => {
                Err("memcached needs at least one address".to_string())
            }
            DriverConfig::Redis(cfg) if cfg.url.is_empty() => {
                Err("redis url cannot be empty".to_string())
            }
            DriverConfig::Redb(cfg) if cfg.file.as_os_str().is_empty() => {
                Err("redb file cannot be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Sweep interval; zero disables the background sweep
    #[serde(with = "humantime_serde", default = "default_memory_interval")]
    pub interval: Duration,
    /// Entries removed per lock acquisition
    #[serde(default = "default_sweep_chunk")]
    pub sweep_chunk: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            interval: default_memory_interval(),
            sweep_chunk: default_sweep_chunk(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedbConfig {
    /// Database file, created if missing
    pub file: PathBuf,
    /// Sweep interval; zero disables the background sweep
    #[serde(with = "humantime_serde", default = "default_redb_interval")]
    pub interval: Duration,
    #[serde(default = "default_sweep_chunk")]
    pub sweep_chunk: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemcachedConfig {
    #[serde(default = "default_memcached_addrs")]
    pub addrs: Vec<String>,
}

fn default_memory_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_redb_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_sweep_chunk() -> usize {
    DEFAULT_SWEEP_CHUNK
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_memcached_addrs() -> Vec<String> {
    vec!["memcache://127.0.0.1:11211".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.storages_path, PathBuf::from("kv.yaml"));
        assert!(config.trace_spans);
    }

    #[test]
    fn test_parse_keeps_declaration_order() {
        let yaml = r#"
storages:
  zeta:
    driver: memory
    interval: 250ms
  alpha:
    driver: redis
  mid:
    driver: memcached
    addrs: ["memcache://10.0.0.1:11211"]
  disk:
    driver: redb
    file: /tmp/kv.redb
"#;
        let config = StoragesConfig::parse(yaml).unwrap();
        let names: Vec<&str> = config.storages.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha", "mid", "disk"]);

        assert_eq!(
            config.storages[0].1,
            DriverConfig::Memory(MemoryConfig {
                interval: Duration::from_millis(250),
                sweep_chunk: DEFAULT_SWEEP_CHUNK,
            })
        );
        assert_eq!(
            config.storages[1].1,
            DriverConfig::Redis(RedisConfig {
                url: default_redis_url(),
            })
        );
        match &config.storages[3].1 {
            DriverConfig::Redb(cfg) => {
                assert_eq!(cfg.file, PathBuf::from("/tmp/kv.redb"));
                assert_eq!(cfg.interval, Duration::from_secs(60));
            }
            other => panic!("unexpected driver: {other:?}"),
        }
    }

    #[test]
    fn test_zero_interval_is_accepted() {
        let yaml = "storages:\n  cache:\n    driver: memory\n    interval: 0s\n";
        let config = StoragesConfig::parse(yaml).unwrap();
        match &config.storages[0].1 {
            DriverConfig::Memory(cfg) => assert!(cfg.interval.is_zero()),
            other => panic!("unexpected driver: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_driver_kind_is_config_error() {
        let yaml = "storages:\n  cache:\n    driver: boltdb\n";
        let err = StoragesConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, KvError::Config(msg) if msg.contains("cache")));
    }

    #[test]
    fn test_unknown_option_is_config_error() {
        let yaml = "storages:\n  cache:\n    driver: memory\n    intreval: 1s\n";
        assert!(matches!(
            StoragesConfig::parse(yaml),
            Err(KvError::Config(_))
        ));
    }

    #[test]
    fn test_empty_memcached_addrs_is_config_error() {
        let yaml = "storages:\n  mc:\n    driver: memcached\n    addrs: []\n";
        assert!(matches!(
            StoragesConfig::parse(yaml),
            Err(KvError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = StoragesConfig::load(Path::new("/nonexistent/kv.yaml")).unwrap_err();
        assert!(matches!(err, KvError::Config(_)));
    }

    #[test]
    fn test_empty_document_has_no_storages() {
        let config = StoragesConfig::parse("storages: {}\n").unwrap();
        assert!(config.storages.is_empty());
    }
}
