//! Span-per-call wrapper around any `Dispatch`.

use async_trait::async_trait;
use tracing::{field, info_span, Instrument};

use crate::error::Result;
use crate::models::{RpcRequest, RpcResponse};

use super::Dispatch;

/// Opens a `kv.dispatch` span for every call and records the error, if any.
/// The wrapped result is passed through untouched.
#[derive(Debug, Clone)]
pub struct Traced<D> {
    inner: D,
}

impl<D> Traced<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<D: Dispatch> Dispatch for Traced<D> {
    async fn dispatch(&self, request: RpcRequest) -> Result<RpcResponse> {
        let span = info_span!(
            "kv.dispatch",
            storage = %request.storage,
            operation = %request.operation,
            items = request.items.len(),
            error = field::Empty,
        );

        let result = self
            .inner
            .dispatch(request)
            .instrument(span.clone())
            .await;

        if let Err(e) = &result {
            span.record("error", field::display(e));
        }
        result
    }
}
