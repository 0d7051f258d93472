use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::get;
use axum::{middleware, Router};

use crate::middleware::{metrics_middleware, request_id_middleware, request_logging_middleware};
use crate::state::AppState;

/// Build the main application router: the addon's REST surface from the api
/// crate plus the operational endpoints, under shared middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let rest = api::rest::configure_routes(Router::new()).with_state(state.api.clone());

    let ops = Router::new()
        .route("/", get(root_redirect))
        .route("/metrics", get(crate::telemetry::metrics::metrics_handler))
        .route("/health", get(health_check))
        .route("/health/live", get(liveness_check))
        .route("/health/ready", get(readiness_check))
        .fallback(not_found)
        .with_state(state);

    Router::new()
        .merge(rest)
        .merge(ops)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_logging_middleware))
}

async fn root_redirect() -> Redirect {
    Redirect::temporary("/manifest.json")
}

async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let status = state.health_check().await;
    let code = if status.overall {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status)).into_response()
}

async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.health_check().await.overall {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "not_found",
            "message": "The requested resource was not found"
        })),
    )
        .into_response()
}
