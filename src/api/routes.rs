//! API Routes
//!
//! Configures the Axum router with every endpoint.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{health_handler, rpc_handler, stats_handler, storages_handler, AppState};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `POST /v1/kv` - Run one operation against a storage
/// - `GET /v1/storages` - List storages with their driver kind and operations
/// - `GET /v1/storages/:name/stats` - Table statistics of one storage
/// - `GET /health` - Health check endpoint
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/kv", post(rpc_handler))
        .route("/v1/storages", get(storages_handler))
        .route("/v1/storages/:name/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::MemoryConfig;
    use crate::driver::MemoryDriver;
    use crate::registry::Registry;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        let config = MemoryConfig {
            interval: std::time::Duration::ZERO,
            sweep_chunk: 16,
        };
        let mut builder = Registry::builder();
        builder
            .register(
                "cache",
                Arc::new(MemoryDriver::new("cache", &config, Arc::new(SystemClock))),
            )
            .unwrap();
        create_router(AppState::new(Arc::new(builder.build()), true))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_storages_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/storages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rpc_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/kv")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"storage":"cache","operation":"Set","items":[{"key":"a","value":"aGVsbG8="}]}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_not_found() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/storages/nonexistent/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/kv")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"storage":"cache","operation":"Explode"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
