//! Dispatch Module
//!
//! Routes one RPC request to the storage it names: resolve the storage, check
//! the operation against its capabilities, decode the items, call the driver
//! and encode the result.
//!
//! Multi-key operations are applied key by key. They are not transactional
//! and a driver failure can leave a batch partially applied.

mod traced;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::driver::{Driver, Item, Operation};
use crate::error::{DriverError, KvError, Result};
use crate::models::{RpcRequest, RpcResponse, WireItem};
use crate::registry::Registry;

pub use self::traced::Traced;

/// Anything that can answer an RPC request.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, request: RpcRequest) -> Result<RpcResponse>;
}

/// Stateless dispatcher over a read-only registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    async fn invoke(&self, driver: &dyn Driver, request: &RpcRequest) -> Result<RpcResponse> {
        let storage = request.storage.as_str();
        let driver_err = |e: DriverError| {
            let err = KvError::from_driver(storage, e);
            warn!(
                storage = %storage,
                operation = %request.operation,
                error = %err,
                "driver call failed"
            );
            err
        };

        match request.operation {
            Operation::Has => {
                let keys = request.keys()?;
                let present = driver.has(&keys).await.map_err(driver_err)?;
                let items = keys
                    .into_iter()
                    .filter(|key| present.get(key).copied().unwrap_or(false))
                    .map(WireItem::key)
                    .collect();
                Ok(RpcResponse::ok(items))
            }
            Operation::MGet => {
                let keys = request.keys()?;
                let found = driver.get(&keys).await.map_err(driver_err)?;
                let items = found
                    .into_iter()
                    .map(|(key, value)| WireItem::key(key).with_value(value))
                    .collect();
                Ok(RpcResponse::ok(items))
            }
            Operation::Set => {
                let items = decode_set(&request.items)?;
                driver.set(items).await.map_err(driver_err)?;
                Ok(RpcResponse::empty())
            }
            Operation::MExpire => {
                let items = request
                    .items
                    .iter()
                    .map(|item| Ok((item.checked_key()?.to_string(), item.required_ttl()?)))
                    .collect::<Result<Vec<_>>>()?;
                driver.mexpire(items).await.map_err(driver_err)?;
                Ok(RpcResponse::empty())
            }
            Operation::Ttl => {
                let keys = request.keys()?;
                let ttls = driver.ttl(&keys).await.map_err(driver_err)?;
                let items = ttls
                    .into_iter()
                    .map(|(key, at)| WireItem::key(key).with_ttl(at))
                    .collect();
                Ok(RpcResponse::ok(items))
            }
            Operation::Delete => {
                let keys = request.keys()?;
                driver.delete(&keys).await.map_err(driver_err)?;
                Ok(RpcResponse::empty())
            }
            Operation::Clear => {
                driver.clear().await.map_err(driver_err)?;
                Ok(RpcResponse::empty())
            }
        }
    }
}

fn decode_set(items: &[WireItem]) -> Result<Vec<Item>> {
    items
        .iter()
        .map(|item| {
            Ok(Item {
                key: item.checked_key()?.to_string(),
                value: item.decode_value()?,
                ttl: item.ttl,
            })
        })
        .collect()
}

#[async_trait]
impl Dispatch for Dispatcher {
    async fn dispatch(&self, request: RpcRequest) -> Result<RpcResponse> {
        let driver = self.registry.resolve(&request.storage)?;

        if !driver.capabilities().supports(request.operation) {
            return Err(KvError::UnsupportedOperation {
                storage: request.storage.clone(),
                operation: request.operation,
            });
        }

        self.invoke(driver.as_ref(), &request).await
    }
}
