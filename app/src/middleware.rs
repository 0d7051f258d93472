use axum::extract::{MatchedPath, Request};
use axum::http::header::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use uuid::Uuid;

/// Request ID middleware - adds a unique ID to each request
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    response.headers_mut().insert(
        HeaderName::from_static("x-request-id"),
        HeaderValue::from_str(&request_id).unwrap_or(HeaderValue::from_static("unknown")),
    );
    response
}

/// Request ID extractor
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Metrics middleware - tracks request counts and latency per matched path
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    let status = response.status();
    crate::telemetry::metrics::HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), &path, status.as_str()])
        .inc();
    crate::telemetry::metrics::HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method.as_str(), &path, status.as_str()])
        .observe(start.elapsed().as_secs_f64());

    response
}

/// Request logging middleware
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let start = Instant::now();
    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}

/// Create CORS layer from configuration. Stremio clients run in browsers
/// and apps all over, so the default is wide open.
pub fn create_cors_layer(config: &shared::config::CorsConfig) -> CorsLayer {
    let mut cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.allowed_origins.iter().any(|origin| origin == "*") {
        cors = cors.allow_origin(Any);
    } else {
        for origin in &config.allowed_origins {
            if let Ok(value) = origin.parse::<HeaderValue>() {
                cors = cors.allow_origin(value);
            }
        }
    }
    cors
}

/// Create tracing layer for request/response logging
pub fn create_trace_layer() -> TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id() {
        let id = Uuid::new_v4().to_string();
        let request_id = RequestId(id.clone());
        assert_eq!(request_id.0, id);
    }

    #[test]
    fn test_cors_layer_creation() {
        let config = shared::config::CorsConfig {
            allowed_origins: vec!["*".to_string()],
        };
        let _cors = create_cors_layer(&config);

        let config = shared::config::CorsConfig {
            allowed_origins: vec!["https://app.strem.io".to_string()],
        };
        let _cors = create_cors_layer(&config);
    }
}
