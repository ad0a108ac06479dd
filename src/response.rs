//! Standard response envelope helpers.

use serde::Serialize;
use serde_json::Value;

/// List response: total count, optional pagination metadata, echoed query options and data.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ListBody {
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub populate: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autopopulate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    pub data: Vec<Value>,
}

/// `{status: "ok", message, data?}` returned by mutations.
#[derive(Clone, Debug, Serialize)]
pub struct StatusBody<T> {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub fn ok_with_data<T: Serialize>(message: String, data: T) -> StatusBody<T> {
    StatusBody {
        status: "ok",
        message,
        data: Some(data),
    }
}

pub fn ok_message(message: String) -> StatusBody<Value> {
    StatusBody {
        status: "ok",
        message,
        data: None,
    }
}

pub fn error_body(message: String) -> Value {
    serde_json::json!({
        "status": "error",
        "message": message
    })
}
