//! API Handlers
//!
//! HTTP request handlers for the RPC endpoint and the read-only inspection
//! endpoints.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};

use crate::dispatch::{Dispatch, Dispatcher, Traced};
use crate::error::{KvError, Result};
use crate::models::{
    HealthResponse, RpcRequest, RpcResponse, StatsResponse, StorageInfo, StoragesResponse,
};
use crate::registry::Registry;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<dyn Dispatch>,
    pub registry: Arc<Registry>,
}

impl AppState {
    /// Builds the dispatcher over `registry`, wrapped in `Traced` when
    /// `trace_spans` is set.
    pub fn new(registry: Arc<Registry>, trace_spans: bool) -> Self {
        let dispatcher = Dispatcher::new(registry.clone());
        let dispatcher: Arc<dyn Dispatch> = if trace_spans {
            Arc::new(Traced::new(dispatcher))
        } else {
            Arc::new(dispatcher)
        };
        Self {
            dispatcher,
            registry,
        }
    }
}

/// Handler for POST /v1/kv
pub async fn rpc_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RpcRequest>, JsonRejection>,
) -> Result<Json<RpcResponse>> {
    let Json(request) = payload.map_err(|e| KvError::InvalidRequest(e.body_text()))?;

    let response = state.dispatcher.dispatch(request).await?;
    Ok(Json(response))
}

/// Handler for GET /v1/storages
pub async fn storages_handler(State(state): State<AppState>) -> Result<Json<StoragesResponse>> {
    let storages = state
        .registry
        .names()
        .iter()
        .map(|name| {
            let driver = state.registry.resolve(name)?;
            Ok(StorageInfo {
                name: name.clone(),
                driver: driver.kind(),
                operations: driver.capabilities().operations(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Json(StoragesResponse { storages }))
}

/// Handler for GET /v1/storages/:name/stats
pub async fn stats_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StatsResponse>> {
    let stats = state.registry.resolve(&name)?.stats();
    Ok(Json(StatsResponse::new(name, stats)))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
