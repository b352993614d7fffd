//! Request ID and access log middleware.
//!
//! Generates a UUID v4 for each incoming request and creates a tracing span
//! that wraps the entire request lifecycle. When the response is ready, a single
//! access log line is emitted with the client address, status, size, referer,
//! user agent and duration.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use http::header::{CONTENT_LENGTH, REFERER, USER_AGENT};
use http::HeaderMap;
use tracing::Instrument;
use uuid::Uuid;

/// Extension type for accessing request ID in handlers if needed.
#[derive(Clone, Debug)]
pub struct RequestId(pub Uuid);

fn header_str<'a>(headers: &'a HeaderMap, name: http::header::HeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

/// Middleware that generates a request ID, creates a request span, and logs
/// the completed request.
///
/// This should be the outermost middleware layer so the span wraps
/// all request processing, including the timeout layer and handlers.
pub async fn request_id_layer(mut request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    // Absent when the router is driven without a socket (tests)
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());
    let referer = header_str(request.headers(), REFERER).to_owned();
    let user_agent = header_str(request.headers(), USER_AGENT).to_owned();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
        duration_ms = tracing::field::Empty,
    );

    let start = Instant::now();
    request.extensions_mut().insert(RequestId(request_id));

    async move {
        let response = next.run(request).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        tracing::Span::current().record("duration_ms", duration_ms);
        tracing::info!(
            remote = %remote,
            status = response.status().as_u16(),
            bytes = %header_str(response.headers(), CONTENT_LENGTH),
            referer = %referer,
            user_agent = %user_agent,
            duration_ms,
            "Request completed"
        );

        response
    }
    .instrument(span)
    .await
}
