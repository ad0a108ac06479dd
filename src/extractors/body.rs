//! Request body and query string extractors.
//!
//! Bodies may be JSON objects or `application/x-www-form-urlencoded`; both arrive as a flat
//! [`Document`] and are nested later by the mutation engine.

use crate::error::AppError;
use crate::query::params::collect_pairs;
use crate::query::RequestParams;
use crate::store::Document;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Query, Request},
    Form,
    http::{header::CONTENT_TYPE, request::Parts},
};
use serde_json::Value;

/// Flat request body. An empty body is an empty document.
#[derive(Clone, Debug, Default)]
pub struct RequestBody(pub Document);

#[async_trait]
impl<S> FromRequest<S> for RequestBody
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if is_form {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            return Ok(RequestBody(collect_pairs(&pairs)));
        }
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(RequestBody(Document::new()));
        }
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(RequestBody(map)),
            Ok(_) => Err(AppError::BadRequest("body must be a JSON object".into())),
            Err(e) => Err(AppError::BadRequest(format!("invalid JSON body: {}", e))),
        }
    }
}

/// Query string as [`RequestParams`], bracket keys nested.
#[derive(Clone, Debug, Default)]
pub struct QueryParams(pub RequestParams);

#[async_trait]
impl<S> FromRequestParts<S> for QueryParams
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        Ok(QueryParams(RequestParams::from_pairs(pairs)))
    }
}
