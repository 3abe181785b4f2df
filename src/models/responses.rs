//! Response DTOs for the key-value API

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::driver::{DriverKind, Operation};
use crate::error::KvError;
use crate::models::WireItem;

/// Body returned by `POST /v1/kv`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub items: Vec<WireItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl RpcResponse {
    pub fn ok(items: Vec<WireItem>) -> Self {
        Self { items, error: None }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn failed(error: ErrorBody) -> Self {
        Self {
            items: Vec::new(),
            error: Some(error),
        }
    }
}

/// Structured error sent to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// One of `NotFound`, `UnsupportedOperation`, `DriverError`,
    /// `InvalidRequest`, `Config`
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    pub message: String,
}

impl From<&KvError> for ErrorBody {
    fn from(err: &KvError) -> Self {
        let operation = match err {
            KvError::UnsupportedOperation { operation, .. } => Some(*operation),
            _ => None,
        };
        Self {
            kind: err.kind().to_string(),
            storage: err.storage().map(str::to_string),
            operation,
            message: err.to_string(),
        }
    }
}

/// One entry of `GET /v1/storages`.
#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub name: String,
    pub driver: DriverKind,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoragesResponse {
    pub storages: Vec<StorageInfo>,
}

/// Body of `GET /v1/storages/:name/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub storage: String,
    /// `null` for drivers that keep no statistics
    pub stats: Option<CacheStats>,
    pub hit_rate: Option<f64>,
}

impl StatsResponse {
    pub fn new(storage: impl Into<String>, stats: Option<CacheStats>) -> Self {
        let hit_rate = stats.as_ref().map(CacheStats::hit_rate);
        Self {
            storage: storage.into(),
            stats,
            hit_rate,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// Current time, RFC 3339
    pub timestamp: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
