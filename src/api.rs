//! Unified API router for YummyVerse
//!
//! ## Endpoint Map
//!
//! | Prefix                | Module  | Description                         |
//! |-----------------------|---------|-------------------------------------|
//! | `/health`             | api     | Liveness probe with queue counters  |
//! | `/api/v1/records/*`   | records | Record registration and artifacts   |

use crate::config::ServerConfig;
use crate::notify::{NotificationQueue, QueueStats};
use crate::records::{records_router, RecordsState};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// State behind the health probe
#[derive(Clone)]
struct HealthState {
    records: RecordsState,
    queue: Arc<NotificationQueue>,
}

/// Build the complete YummyVerse HTTP application
pub fn build_app(
    records_state: RecordsState,
    queue: Arc<NotificationQueue>,
    server: &ServerConfig,
) -> Router {
    let health = Router::new()
        .route("/health", get(health_check))
        .with_state(HealthState {
            records: records_state.clone(),
            queue,
        });

    Router::new()
        .merge(health)
        .merge(records_router(records_state))
        .layer(DefaultBodyLimit::max(server.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors(&server.cors_origins))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    records: usize,
    notifications: QueueStats,
}

async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        records: state.records.store.len().await,
        notifications: state.queue.stats(),
    })
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(parsed)
    }
}
