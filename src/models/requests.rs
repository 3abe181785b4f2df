//! Request DTOs for the key-value API
//!
//! Values travel base64-encoded; ttls travel as RFC 3339 instants.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::driver::Operation;
use crate::error::KvError;

/// Body of `POST /v1/kv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Name of the target storage
    pub storage: String,
    pub operation: Operation,
    #[serde(default)]
    pub items: Vec<WireItem>,
}

impl RpcRequest {
    pub fn new(storage: impl Into<String>, operation: Operation, items: Vec<WireItem>) -> Self {
        Self {
            storage: storage.into(),
            operation,
            items,
        }
    }

    /// Keys of all items, in request order.
    pub fn keys(&self) -> Result<Vec<String>, KvError> {
        self.items
            .iter()
            .map(|item| item.checked_key().map(str::to_string))
            .collect()
    }
}

/// One key with optional value and ttl, used in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireItem {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<DateTime<Utc>>,
}

impl WireItem {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            ttl: None,
        }
    }

    /// Item carrying `value`, base64-encoded.
    pub fn with_value(mut self, value: impl AsRef<[u8]>) -> Self {
        self.value = Some(STANDARD.encode(value));
        self
    }

    pub fn with_ttl(mut self, ttl: Option<DateTime<Utc>>) -> Self {
        self.ttl = ttl;
        self
    }

    /// The key, rejected when empty.
    pub fn checked_key(&self) -> Result<&str, KvError> {
        if self.key.is_empty() {
            return Err(KvError::InvalidRequest("key cannot be empty".to_string()));
        }
        Ok(&self.key)
    }

    /// Decoded value bytes. A missing value is an error.
    pub fn decode_value(&self) -> Result<Bytes, KvError> {
        let encoded = self.value.as_deref().ok_or_else(|| {
            KvError::InvalidRequest(format!("missing value for key {}", self.key))
        })?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(|e| KvError::InvalidRequest(format!("value of key {} is not base64: {e}", self.key)))
    }

    /// The ttl. A missing ttl is an error.
    pub fn required_ttl(&self) -> Result<DateTime<Utc>, KvError> {
        self.ttl
            .ok_or_else(|| KvError::InvalidRequest(format!("missing ttl for key {}", self.key)))
    }
}
