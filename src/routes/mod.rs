//! Router assembly.

mod common;
mod entity;

pub use common::common_routes;
pub use entity::{entity_routes, model_routes};

use crate::extractors::trusted_header_principal;
use crate::settings::Settings;
use crate::state::AppState;
use axum::{middleware, Router};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Full application router: common, model and introspection routes plus the HTTP layers.
pub fn app_router(state: AppState, settings: &Settings) -> Router {
    let mut app = Router::new()
        .merge(common_routes(state.clone()))
        .merge(model_routes(state.clone()))
        .merge(entity_routes(state));
    if settings.trust_principal_headers {
        tracing::warn!("trusting principal headers; do not expose without an authenticating proxy");
        app = app.layer(middleware::from_fn(trusted_header_principal));
    }
    app.layer(RequestBodyLimitLayer::new(settings.body_limit_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
