//! API Module
//!
//! HTTP handlers and routing for the key-value service.
//!
//! # Endpoints
//! - `POST /v1/kv` - RPC entry point (`{storage, operation, items}`)
//! - `GET /v1/storages` - Registered storages
//! - `GET /v1/storages/:name/stats` - Memory table statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::AppState;
pub use routes::create_router;
