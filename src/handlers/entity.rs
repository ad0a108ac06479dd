//! Model CRUD handlers: list, create, read, update, delete.

use crate::error::AppError;
use crate::extractors::{CurrentPrincipal, QueryParams, RequestBody};
use crate::service::Call;
use crate::state::AppState;
use axum::{
    extract::{OriginalUri, Path, State},
    Json,
};
use serde_json::Value;

pub async fn list(
    State(state): State<AppState>,
    Path(model): Path<String>,
    OriginalUri(uri): OriginalUri,
    CurrentPrincipal(principal): CurrentPrincipal,
    QueryParams(params): QueryParams,
) -> Result<Json<Value>, AppError> {
    let call = Call {
        model: &model,
        path: uri.path(),
        params,
        principal,
    };
    Ok(Json(state.engine.list(call).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Path(model): Path<String>,
    OriginalUri(uri): OriginalUri,
    CurrentPrincipal(principal): CurrentPrincipal,
    QueryParams(params): QueryParams,
    RequestBody(body): RequestBody,
) -> Result<Json<Value>, AppError> {
    let call = Call {
        model: &model,
        path: uri.path(),
        params,
        principal,
    };
    Ok(Json(state.engine.create(call, body).await?))
}

pub async fn read(
    State(state): State<AppState>,
    Path((model, id)): Path<(String, String)>,
    OriginalUri(uri): OriginalUri,
    CurrentPrincipal(principal): CurrentPrincipal,
    QueryParams(params): QueryParams,
) -> Result<Json<Value>, AppError> {
    let call = Call {
        model: &model,
        path: uri.path(),
        params,
        principal,
    };
    Ok(Json(state.engine.get(call, &id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path((model, id)): Path<(String, String)>,
    OriginalUri(uri): OriginalUri,
    CurrentPrincipal(principal): CurrentPrincipal,
    QueryParams(params): QueryParams,
    RequestBody(body): RequestBody,
) -> Result<Json<Value>, AppError> {
    let call = Call {
        model: &model,
        path: uri.path(),
        params,
        principal,
    };
    Ok(Json(state.engine.update(call, &id, body).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((model, id)): Path<(String, String)>,
    OriginalUri(uri): OriginalUri,
    CurrentPrincipal(principal): CurrentPrincipal,
    QueryParams(params): QueryParams,
    RequestBody(body): RequestBody,
) -> Result<Json<Value>, AppError> {
    let call = Call {
        model: &model,
        path: uri.path(),
        params,
        principal,
    };
    Ok(Json(state.engine.delete(call, &id, body).await?))
}
