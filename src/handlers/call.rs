//! Model method handlers under `/call`.

use crate::error::AppError;
use crate::extractors::{CurrentPrincipal, QueryParams, RequestBody};
use crate::service::deserialize::deserialize;
use crate::service::Verb;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

/// `GET /call/:model/:method`: query parameters are the method's input.
pub async fn collection_get(
    State(state): State<AppState>,
    Path((model, method)): Path<(String, String)>,
    CurrentPrincipal(principal): CurrentPrincipal,
    QueryParams(params): QueryParams,
) -> Result<Json<Value>, AppError> {
    let input = Value::Object(params.nested().clone());
    let out = state
        .engine
        .call_collection(&model, &method, Verb::Read, input, principal)
        .await?;
    Ok(Json(out))
}

/// `POST /call/:model/:method`: the nested body is the method's input.
pub async fn collection_post(
    State(state): State<AppState>,
    Path((model, method)): Path<(String, String)>,
    CurrentPrincipal(principal): CurrentPrincipal,
    RequestBody(body): RequestBody,
) -> Result<Json<Value>, AppError> {
    let input = Value::Object(deserialize(body));
    let out = state
        .engine
        .call_collection(&model, &method, Verb::Create, input, principal)
        .await?;
    Ok(Json(out))
}

pub async fn item(
    State(state): State<AppState>,
    Path((model, id, method)): Path<(String, String, String)>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> Result<Json<Value>, AppError> {
    Ok(Json(state.engine.call_item(&model, &method, &id, principal).await?))
}
