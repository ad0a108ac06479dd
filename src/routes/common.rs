//! Liveness, readiness and build info.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use serde_json::json;

#[derive(Serialize)]
struct Probe {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<&'static str>,
}

async fn health() -> Json<Probe> {
    Json(Probe { status: "ok", store: None, backend: None })
}

/// 503 while the document store cannot answer a trivial query.
async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.engine.store();
    let backend = Some(store.backend_name());
    match store.health_check().await {
        Ok(()) => (StatusCode::OK, Json(Probe { status: "ok", store: Some("ok"), backend })),
        Err(e) => {
            tracing::warn!(error = %e, backend = store.backend_name(), "store not ready");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Probe { status: "degraded", store: Some("unavailable"), backend }),
            )
        }
    }
}

async fn version(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "models": state.engine.registry().models.len(),
    }))
}

pub fn common_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/version", get(version))
        .with_state(state)
}
