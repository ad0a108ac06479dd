#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use modelrest::extractors::principal::{PRINCIPAL_ADMIN_HEADER, PRINCIPAL_ID_HEADER};
use modelrest::service::{EngineBuilder, MethodCall};
use modelrest::{
    app_router, parse_models, AppError, AppState, DocumentStore, Engine, InMemoryStore,
    ModelRegistry, Settings,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

pub const MODELS: &str = include_str!("../../example_consumer/models.json");

/// Acting principal for a request.
#[derive(Clone, Copy, Debug)]
pub enum As<'a> {
    Anon,
    User(&'a str),
    Admin(&'a str),
}

pub struct TestApp {
    pub router: Router,
    pub engine: Arc<Engine>,
    pub store: Arc<dyn DocumentStore>,
}

impl TestApp {
    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(req).await.expect("response");
        let status = response.status();
        (status, read_json(response).await)
    }

    pub async fn get(&self, uri: &str, who: As<'_>) -> (StatusCode, Value) {
        self.send(request("GET", uri, Body::empty(), None, who)).await
    }

    pub async fn post_json(&self, uri: &str, body: Value, who: As<'_>) -> (StatusCode, Value) {
        self.send(json_request("POST", uri, body, who)).await
    }

    pub async fn put_json(&self, uri: &str, body: Value, who: As<'_>) -> (StatusCode, Value) {
        self.send(json_request("PUT", uri, body, who)).await
    }

    pub async fn delete(&self, uri: &str, who: As<'_>) -> (StatusCode, Value) {
        self.send(request("DELETE", uri, Body::empty(), None, who)).await
    }
}

pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("json")
}

pub fn request(
    method: &str,
    uri: &str,
    body: Body,
    content_type: Option<&str>,
    who: As<'_>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(ct) = content_type {
        builder = builder.header("content-type", ct);
    }
    match who {
        As::Anon => {}
        As::User(id) => builder = builder.header(PRINCIPAL_ID_HEADER, id),
        As::Admin(id) => {
            builder = builder
                .header(PRINCIPAL_ID_HEADER, id)
                .header(PRINCIPAL_ADMIN_HEADER, "true")
        }
    }
    builder.body(body).expect("request")
}

pub fn json_request(method: &str, uri: &str, body: Value, who: As<'_>) -> Request<Body> {
    request(
        method,
        uri,
        Body::from(body.to_string()),
        Some("application/json"),
        who,
    )
}

pub fn form_request(method: &str, uri: &str, body: &str, who: As<'_>) -> Request<Body> {
    request(
        method,
        uri,
        Body::from(body.to_string()),
        Some("application/x-www-form-urlencoded"),
        who,
    )
}

async fn hello(_call: MethodCall) -> Result<Value, AppError> {
    Ok(json!("Testing OKAY!"))
}

async fn describe(call: MethodCall) -> Result<Value, AppError> {
    let item = call.item.unwrap_or_default();
    Ok(json!({
        "foo": item.get("foo").cloned().unwrap_or(Value::Null),
        "caller": call.principal.map(|p| p.id),
    }))
}

pub fn registry() -> ModelRegistry {
    ModelRegistry::builder()
        .models(parse_models(MODELS).expect("models"))
        .method("test", "test", hello)
        .method("test", "describe", describe)
        .build()
        .expect("registry")
}

pub async fn app() -> TestApp {
    app_with(|b| b).await
}

pub async fn app_with(configure: impl FnOnce(EngineBuilder) -> EngineBuilder) -> TestApp {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
    let builder = Engine::builder(Arc::new(registry()), store.clone());
    let engine = configure(builder).build();
    engine.prepare().await.expect("prepare");
    let engine = Arc::new(engine);
    let settings = Settings {
        trust_principal_headers: true,
        ..Settings::default()
    };
    let router = app_router(
        AppState {
            engine: engine.clone(),
        },
        &settings,
    );
    TestApp {
        router,
        engine,
        store,
    }
}

pub fn id_of(created: &Value) -> String {
    created["data"]["_id"].as_str().expect("created id").to_string()
}
