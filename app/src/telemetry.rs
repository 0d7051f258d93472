use anyhow::{Context, Result};
use opentelemetry::global;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{Config as TraceConfig, Tracer};
use opentelemetry_sdk::Resource;
use shared::config::TelemetryConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize telemetry subsystem with tracing and optionally OpenTelemetry
pub fn init_telemetry(config: &TelemetryConfig) -> Result<()> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let pretty = config.log_format.eq_ignore_ascii_case("pretty");
    let pretty_layer = pretty.then(|| {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
    });
    let json_layer = (!pretty).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
    });

    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let tracer = init_tracer(config, endpoint)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .with(otel_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    tracing::info!(
        "Telemetry initialized - service: {}, environment: {}, log_level: {}",
        config.service_name,
        config.environment,
        config.log_level
    );
    Ok(())
}

/// Initialize OpenTelemetry tracer
fn init_tracer(config: &TelemetryConfig, endpoint: &str) -> Result<Tracer> {
    let exporter = opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint);

    let trace_config = TraceConfig::default().with_resource(Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.environment", config.environment.clone()),
    ]));

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(trace_config)
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .context("Failed to install OpenTelemetry tracer")?;

    Ok(tracer)
}

/// Shutdown telemetry subsystem gracefully
pub fn shutdown_telemetry() {
    tracing::info!("Shutting down telemetry...");
    global::shutdown_tracer_provider();
}

/// Prometheus metrics registry and exporter
pub mod metrics {
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::sync::Arc;

    use crate::state::AppState;

    lazy_static::lazy_static! {
        pub static ref HTTP_REQUESTS_TOTAL: prometheus::IntCounterVec =
            prometheus::IntCounterVec::new(
                prometheus::opts!("http_requests_total", "Total number of HTTP requests"),
                &["method", "path", "status"]
            ).unwrap();

        pub static ref HTTP_REQUEST_DURATION_SECONDS: prometheus::HistogramVec =
            prometheus::HistogramVec::new(
                prometheus::HistogramOpts::new(
                    "http_request_duration_seconds",
                    "HTTP request duration in seconds"
                ),
                &["method", "path", "status"]
            ).unwrap();
    }

    /// Build the process-wide metrics registry. Owned by the entry point
    /// and injected into app state; nothing registers behind its back.
    pub fn build_registry() -> anyhow::Result<Registry> {
        let registry = Registry::new();
        registry.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
        registry.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))?;
        db::register_metrics(&registry)?;
        media::register_metrics(&registry)?;
        search::register_metrics(&registry)?;
        api::register_metrics(&registry)?;
        Ok(registry)
    }

    /// Handler for the Prometheus metrics endpoint
    pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
        let encoder = TextEncoder::new();
        let metric_families = state.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics")
                .into_response();
        }

        let output = String::from_utf8(buffer).unwrap_or_default();
        (StatusCode::OK, output).into_response()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_build_registry_registers_everything_once() {
            let registry = build_registry().expect("registry should build");
            assert!(!registry.gather().is_empty());
        }
    }
}
