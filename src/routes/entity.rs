//! Model routes. Handlers resolve the model by the `:model` path segment.

use crate::handlers::{call, entity, meta};
use crate::state::AppState;
use axum::{routing::get, Router};

/// `/api/:model` CRUD and `/call/...` methods.
pub fn entity_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/:model", get(entity::list).post(entity::create))
        .route(
            "/api/:model/:id",
            get(entity::read)
                .put(entity::update)
                .patch(entity::update)
                .delete(entity::delete),
        )
        .route(
            "/call/:model/:method",
            get(call::collection_get).post(call::collection_post),
        )
        .route("/call/:model/:id/:method", get(call::item))
        .with_state(state)
}

/// `/model` introspection.
pub fn model_routes(state: AppState) -> Router {
    Router::new()
        .route("/model", get(meta::models))
        .route("/model/:model", get(meta::model_schema))
        .with_state(state)
}
