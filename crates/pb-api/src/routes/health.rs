use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};

#[derive(Clone)]
struct HealthState {
    service: String,
    metrics: Option<PrometheusHandle>,
}

async fn health(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({
        "status": "UP",
        "service": state.service,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics(State(state): State<HealthState>) -> Response {
    match state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `/health` and `/metrics`, exempt from admission control
pub fn health_router(service: impl Into<String>, metrics_handle: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(HealthState {
            service: service.into(),
            metrics: metrics_handle,
        })
}
