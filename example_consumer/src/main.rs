//! Example consumer: a separate Rust project that serves models.json through modelrest.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Set `MODELS_PATH=example_consumer/models.json` when running from the repo root.
//! Set `DATABASE_URL` to use Postgres; otherwise records live in memory.
//! Set `TRUST_PRINCIPAL_HEADERS=true` to act as a principal via `X-Principal-Id`.

use modelrest::{
    app_router, parse_models, AppError, AppState, DocumentStore, Engine, InMemoryStore,
    MethodCall, ModelRegistry, PgDocumentStore, Settings,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

async fn test_method(_call: MethodCall) -> Result<Value, AppError> {
    Ok(json!("Testing OKAY!"))
}

async fn describe(call: MethodCall) -> Result<Value, AppError> {
    let item = call.item.unwrap_or_default();
    Ok(json!({
        "model": call.model,
        "foo": item.get("foo").cloned().unwrap_or(Value::Null),
        "caller": call.principal.map(|p| p.id),
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("modelrest=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let models = parse_models(&tokio::fs::read_to_string(&settings.models_path).await?)?;
    let registry = ModelRegistry::builder()
        .models(models)
        .method("test", "test", test_method)
        .method("test", "describe", describe)
        .build()?;

    let store: Arc<dyn DocumentStore> = match &settings.database_url {
        Some(url) => Arc::new(PgDocumentStore::connect(url, settings.document_schema.clone()).await?),
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let engine = Engine::builder(Arc::new(registry), store)
        .cache_capacity(settings.cache_capacity)
        .base_url(settings.base_url.clone())
        .build();
    engine.prepare().await?;

    let app = app_router(AppState::new(engine), &settings);
    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("modelrest listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
