//! KV Gateway - named key-value storages behind one RPC surface
//!
//! Storages are configured by name and served by pluggable drivers: an
//! in-process table with lazy and active expiration, an embedded redb file,
//! and external Redis or memcached servers.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod models;
pub mod registry;
pub mod tasks;

pub use api::{create_router, AppState};
pub use config::{Config, StoragesConfig};
pub use dispatch::{Dispatch, Dispatcher, Traced};
pub use driver::{Capabilities, Driver, Operation};
pub use error::{DriverError, KvError};
pub use registry::Registry;
