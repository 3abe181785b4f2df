//! Request and response models for the key-value API
//!
//! Wire shapes of the RPC endpoint and the read-only inspection endpoints.

pub mod requests;
pub mod responses;

pub use requests::{RpcRequest, WireItem};
pub use responses::{
    ErrorBody, HealthResponse, RpcResponse, StatsResponse, StorageInfo, StoragesResponse,
};
