//! Auxiliary HTTP handlers: health, host-app download, metrics, CORS.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::config::Config;
use crate::engine::Engine;

pub async fn health_check() -> &'static str {
    "OK"
}

/// Serve the Windows host-agent package if one is configured on disk.
pub async fn download_host_app(State(engine): State<Arc<Engine>>) -> Response {
    let Some(path) = engine.config.host_app_zip.clone() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "host app download is not configured"})),
        )
            .into_response();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "application/zip"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"host-app-win.zip\"",
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(err) => {
            warn!(path = %path.display(), %err, "host app package unreadable");
            (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "host app package is missing"})),
            )
                .into_response()
        }
    }
}

pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// CORS from the configured allow-list; `*` means any origin.
pub fn cors_layer(config: &Config) -> CorsLayer {
    if config.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
