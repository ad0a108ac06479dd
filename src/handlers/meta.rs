//! Model introspection.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

pub async fn models(State(state): State<AppState>) -> Json<Value> {
    Json(state.engine.models())
}

pub async fn model_schema(
    State(state): State<AppState>,
    Path(model): Path<String>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(state.engine.model_schema(&model)?))
}
