//! Axum middleware for request tracking.
//!
//! # Flow
//!
//! 1. **Extract** the request id from the `X-Request-ID` header (or generate a UUID v4)
//! 2. **Store** it in request extensions for handler access
//! 3. **Create tracing span** with a `request_id` field
//! 4. **Echo** it in the response `X-Request-ID` header
//!
//! Client-supplied ids are kept verbatim when they are short printable ASCII,
//! so callers can correlate their own logs with ours.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use relay_web::middleware::request_id_layer;
//!
//! let app = Router::new()
//!     .route("/api/v1/health", get(health))
//!     .layer(request_id_layer());
//! ```

use axum::{extract::Request, http::HeaderValue, response::Response};
use std::fmt;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for the request id.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Longest client-supplied id we accept.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Request id stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    /// The id as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_header(value: &HeaderValue) -> Option<Self> {
        let value = value.to_str().ok()?.trim();
        let acceptable = !value.is_empty()
            && value.len() <= MAX_REQUEST_ID_LEN
            && value.bytes().all(|b| b.is_ascii_graphic());
        acceptable.then(|| Self(value.to_string()))
    }

    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Create a layer that adds request id tracking to all requests.
#[must_use]
pub const fn request_id_layer() -> RequestIdLayer {
    RequestIdLayer
}

/// Layer for request id tracking.
#[derive(Clone, Debug)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdMiddleware { inner }
    }
}

/// Middleware service for request id tracking.
#[derive(Clone, Debug)]
pub struct RequestIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for RequestIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(RequestId::from_header)
            .unwrap_or_else(RequestId::generate);

        req.extensions_mut().insert(request_id.clone());

        let span = tracing::info_span!(
            "http_request",
            request_id = %request_id,
            method = %req.method(),
            uri = %req.uri(),
        );

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span).await?;

            if let Ok(header_value) = HeaderValue::from_str(request_id.as_str()) {
                response
                    .headers_mut()
                    .insert(REQUEST_ID_HEADER, header_value);
            }

            Ok(response)
        })
    }
}

/// Extension trait for reading the request id from request extensions.
pub trait RequestIdExt {
    /// The request id, or `None` if the middleware is not installed.
    fn request_id(&self) -> Option<&RequestId>;
}

impl RequestIdExt for Request {
    fn request_id(&self) -> Option<&RequestId> {
        self.extensions().get::<RequestId>()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(request_id_layer())
    }

    fn response_id(response: &Response) -> String {
        response
            .headers()
            .get(REQUEST_ID_HEADER)
            .expect("Request ID header should be present")
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_request_id_generated_if_missing() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();

        let response = app().oneshot(request).await.unwrap();

        assert!(Uuid::parse_str(&response_id(&response)).is_ok());
    }

    #[tokio::test]
    async fn test_request_id_preserved_from_request() {
        let request = Request::builder()
            .uri("/test")
            .header(REQUEST_ID_HEADER, "client-trace-42")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response_id(&response), "client-trace-42");
    }

    #[tokio::test]
    async fn test_request_id_in_extensions() {
        async fn handler(req: Request<Body>) -> String {
            req.request_id().map(ToString::to_string).unwrap_or_default()
        }

        let app = Router::new()
            .route("/test", get(handler))
            .layer(request_id_layer());
        let request = Request::builder()
            .uri("/test")
            .header(REQUEST_ID_HEADER, "abc")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        assert_eq!(&bytes[..], b"abc");
    }

    #[tokio::test]
    async fn test_oversized_id_is_replaced() {
        let long = "x".repeat(MAX_REQUEST_ID_LEN + 1);
        let request = Request::builder()
            .uri("/test")
            .header(REQUEST_ID_HEADER, long.as_str())
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        let id = response_id(&response);

        assert_ne!(id, long);
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
