//! HTTP route handlers.
//!
//! Two fixed status routes. Anything else falls through to axum's default
//! 404 (unknown path) or 405 (known path, wrong method).
//!
//! Request tracing is enabled via middleware that generates a unique request ID
//! for each incoming request, allowing correlation of all logs within a request.

pub mod health;
pub mod home;

use std::time::Duration;

use axum::{http::StatusCode, middleware, routing::get, Router};
use http::header::{HeaderValue, CACHE_CONTROL};
use tower_http::{set_header::SetResponseHeaderLayer, timeout::TimeoutLayer};

use crate::config::{ServerConfig, CACHE_CONTROL_NO_STORE};
use crate::middleware::request_id_layer;

/// Creates the Axum router with both status routes and the middleware stack.
pub fn create_router(server: &ServerConfig) -> Router {
    // Status routes - no caching, always fresh for liveness probes
    let status_routes = Router::new()
        .route("/", get(home::index))
        .route("/health", get(health::health))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_NO_STORE),
        ));

    with_request_layers(Router::new().merge(status_routes), server)
}

/// Wraps `router` in the per-request middleware stack.
fn with_request_layers(router: Router, server: &ServerConfig) -> Router {
    router
        // Per-request wall-clock limit, answers 408 when exceeded
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(server.timeout_seconds),
        ))
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn(request_id_layer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request},
    };
    use tower::ServiceExt;

    fn app() -> Router {
        create_router(&ServerConfig::default())
    }

    async fn send(method: Method, uri: &str) -> (StatusCode, http::HeaderMap, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    #[tokio::test]
    async fn test_root_returns_service_status() {
        let (status, headers, body) = send(Method::GET, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
        assert_eq!(body, br#"{"status":"healthy","service":"dance-monkey-api"}"#);
    }

    #[tokio::test]
    async fn test_health_returns_ok() {
        let (status, headers, body) = send(Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(CACHE_CONTROL).unwrap(), "no-store");
        assert_eq!(body, br#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (status, _, _) = send(Method::GET, "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wrong_method_is_rejected() {
        let (status, _, _) = send(Method::POST, "/health").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_slow_request_times_out() {
        async fn slow() -> &'static str {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "too late"
        }

        let server = ServerConfig {
            timeout_seconds: 1,
            ..ServerConfig::default()
        };
        let app = with_request_layers(Router::new().route("/slow", get(slow)), &server);

        let request = Request::builder().uri("/slow").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_repeated_requests_are_byte_identical() {
        let (_, _, first) = send(Method::GET, "/").await;
        for _ in 0..5 {
            let (_, _, next) = send(Method::GET, "/").await;
            assert_eq!(first, next);
        }
    }
}
