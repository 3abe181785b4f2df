//! Error types for the key-value service
//!
//! `KvError` is what callers of the dispatcher see. `DriverError` is the only
//! error type a storage driver may return; backend client errors are mapped
//! into it inside each driver.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::driver::Operation;
use crate::models::{ErrorBody, RpcResponse};

// == Driver Error ==
/// Backend failure reported by a driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Backend unreachable, connection dropped or timed out
    #[error("connection failure: {0}")]
    Connection(String),

    /// Backend answered with something the driver could not use
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// Local storage or blocking pool failure
    #[error("storage failure: {0}")]
    Storage(String),

    /// Operation outside the driver's capability set
    #[error("operation {0} is not supported")]
    Unsupported(Operation),
}

// == Kv Error ==
/// Unified error type returned per call (or at startup for `Config`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// Invalid configuration; fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage name not present in the registry
    #[error("storage not found: {storage}")]
    NotFound { storage: String },

    /// Operation not in the storage driver's capability set
    #[error("operation {operation} is not supported by storage {storage}")]
    UnsupportedOperation {
        storage: String,
        operation: Operation,
    },

    /// Backend failure inside a driver
    #[error("driver error in storage {storage}: {source}")]
    Driver {
        storage: String,
        #[source]
        source: DriverError,
    },

    /// Request payload could not be decoded
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl KvError {
    /// Wraps a driver failure, promoting `Unsupported` to the structured kind.
    pub fn from_driver(storage: &str, source: DriverError) -> Self {
        match source {
            DriverError::Unsupported(operation) => KvError::UnsupportedOperation {
                storage: storage.to_string(),
                operation,
            },
            source => KvError::Driver {
                storage: storage.to_string(),
                source,
            },
        }
    }

    /// Stable name of the error kind, as sent on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            KvError::Config(_) => "Config",
            KvError::NotFound { .. } => "NotFound",
            KvError::UnsupportedOperation { .. } => "UnsupportedOperation",
            KvError::Driver { .. } => "DriverError",
            KvError::InvalidRequest(_) => "InvalidRequest",
        }
    }

    pub fn storage(&self) -> Option<&str> {
        match self {
            KvError::NotFound { storage }
            | KvError::UnsupportedOperation { storage, .. }
            | KvError::Driver { storage, .. } => Some(storage),
            KvError::Config(_) | KvError::InvalidRequest(_) => None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            KvError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            KvError::NotFound { .. } => StatusCode::NOT_FOUND,
            KvError::UnsupportedOperation { .. } => StatusCode::NOT_IMPLEMENTED,
            KvError::Driver { .. } => StatusCode::BAD_GATEWAY,
            KvError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for KvError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(RpcResponse::failed(ErrorBody::from(&self)));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the service.
pub type Result<T> = std::result::Result<T, KvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_driver_error_is_promoted() {
        let err = KvError::from_driver("cache2", DriverError::Unsupported(Operation::Ttl));
        assert_eq!(
            err,
            KvError::UnsupportedOperation {
                storage: "cache2".to_string(),
                operation: Operation::Ttl,
            }
        );
        assert_eq!(err.to_string(), "operation TTL is not supported by storage cache2");
    }

    #[test]
    fn test_driver_error_keeps_cause() {
        let err = KvError::from_driver("shared", DriverError::Connection("refused".into()));
        assert_eq!(err.kind(), "DriverError");
        assert_eq!(err.storage(), Some("shared"));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_status_codes() {
        let not_found = KvError::NotFound {
            storage: "x".into(),
        };
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            KvError::InvalidRequest("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
