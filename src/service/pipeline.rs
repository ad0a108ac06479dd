//! Request pipeline: resolve model, run hooks, check permissions, then read through the cache or
//! mutate and flush it.

use crate::cache::{signature, Lookup, ResponseCache};
use crate::config::{Model, ModelRegistry};
use crate::error::AppError;
use crate::extractors::principal::Principal;
use crate::query::{compile, QueryDescriptor, RequestParams};
use crate::response::{ok_message, ok_with_data, ListBody};
use crate::service::crud::{CrudService, Page};
use crate::service::hooks::{
    Action, DeleteKind, HookFlow, HookRequest, Hooks, MutationCallbacks, NoopCallbacks,
};
use crate::service::methods::{MethodCall, MethodScope};
use crate::service::permission::{can_perform, owns, strip_admin_elevation, Access, Verb};
use crate::store::{Document, DocumentStore, StoreResult, ID_FIELD};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

const SILENCE_PARAM: &str = "_silence";
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;
pub const DEFAULT_BASE_URL: &str = "http://localhost:3001";

pub struct Engine {
    registry: Arc<ModelRegistry>,
    crud: CrudService,
    cache: ResponseCache,
    hooks: Hooks,
    callbacks: Arc<dyn MutationCallbacks>,
    base_url: String,
}

pub struct EngineBuilder {
    registry: Arc<ModelRegistry>,
    store: Arc<dyn DocumentStore>,
    cache_capacity: u64,
    hooks: Hooks,
    callbacks: Arc<dyn MutationCallbacks>,
    base_url: String,
}

impl EngineBuilder {
    pub fn cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn callbacks(mut self, callbacks: impl MutationCallbacks + 'static) -> Self {
        self.callbacks = Arc::new(callbacks);
        self
    }

    /// Prefix for `next`/`prev` links in list responses.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            crud: CrudService::new(self.registry.clone(), self.store),
            registry: self.registry,
            cache: ResponseCache::new(self.cache_capacity),
            hooks: self.hooks,
            callbacks: self.callbacks,
            base_url: self.base_url,
        }
    }
}

/// Parameters shared by every pipeline entry point.
pub struct Call<'a> {
    pub model: &'a str,
    /// Request path, used in cache signatures and page links.
    pub path: &'a str,
    pub params: RequestParams,
    pub principal: Option<Principal>,
}

impl Engine {
    pub fn builder(registry: Arc<ModelRegistry>, store: Arc<dyn DocumentStore>) -> EngineBuilder {
        EngineBuilder {
            registry,
            store,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            hooks: Hooks::default(),
            callbacks: Arc::new(NoopCallbacks),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        self.crud.store()
    }

    /// Create collections and indexes for every registered model.
    pub async fn prepare(&self) -> StoreResult<()> {
        self.store().prepare(&self.registry.collection_specs()).await
    }

    fn model(&self, name: &str) -> Result<Arc<Model>, AppError> {
        self.registry
            .model(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Model {} not found", name)))
    }

    fn authorize(&self, model: &Model, principal: Option<&Principal>, verb: Verb) -> Result<Access, AppError> {
        let access = can_perform(model, principal, verb);
        if !access.allowed {
            tracing::warn!(
                model = %model.name,
                verb = %verb,
                principal = principal.map(|p| p.id.as_str()).unwrap_or("-"),
                "permission denied"
            );
            return Err(AppError::Forbidden(format!("Not allowed to {} {}", verb, model.name)));
        }
        Ok(access)
    }

    /// Run pre hooks. `Err(payload)` means a hook answered the request itself.
    async fn before(
        &self,
        action: Action,
        call: Call<'_>,
        item_id: Option<&str>,
        body: Document,
    ) -> Result<Result<(HookRequest, RequestParams), Value>, AppError> {
        let mut req = HookRequest {
            action,
            model: call.model.to_string(),
            principal: call.principal,
            item_id: item_id.map(str::to_string),
            params: call.params.pairs().to_vec(),
            body,
        };
        match self.hooks.run_pre(&mut req).await? {
            HookFlow::Respond(payload) => Ok(Err(payload)),
            HookFlow::Continue => {
                let params = if req.params.as_slice() == call.params.pairs() {
                    call.params
                } else {
                    RequestParams::from_pairs(req.params.clone())
                };
                Ok(Ok((req, params)))
            }
        }
    }

    async fn after(&self, req: &HookRequest, mut payload: Value) -> Result<Value, AppError> {
        self.hooks.run_post(req, &mut payload).await?;
        Ok(payload)
    }

    pub async fn list(&self, call: Call<'_>) -> Result<Value, AppError> {
        let model = self.model(call.model)?;
        let path = call.path;
        let (req, params) = match self.before(Action::List, call, None, Document::new()).await? {
            Ok(next) => next,
            Err(payload) => return Ok(payload),
        };
        let principal = req.principal.as_ref();
        let access = self.authorize(&model, principal, Verb::Read)?;
        let owner = owner_scope(access, principal);

        let desc = compile(&model, &params, owner)?;
        tracing::debug!(model = %model.name, query = ?desc.find, "compiled list query");
        let sig = signature("GET", path, &params, owner);
        let payload = match self.cache.lookup(&model.name, &sig) {
            Lookup::Hit(payload) => payload.as_ref().clone(),
            Lookup::Miss(slot) => {
                let page = self.crud.list(&model, &desc).await?;
                let body = self.list_body(path, &params, &desc, page);
                let payload = serde_json::to_value(body)
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                self.cache.store(slot, payload).as_ref().clone()
            }
        };
        self.after(&req, payload).await
    }

    fn list_body(&self, path: &str, params: &RequestParams, desc: &QueryDescriptor, page: Page) -> ListBody {
        let count = page.count;
        let mut body = ListBody {
            count,
            sort: desc.echo.sort.clone(),
            populate: desc.echo.populate.clone(),
            autopopulate: desc.echo.autopopulate.then_some(true),
            search: desc.echo.search.clone(),
            data: page.records.into_iter().map(Value::Object).collect(),
            ..Default::default()
        };
        if let Some(p) = desc.pagination {
            body.limit = Some(p.limit);
            body.page = Some(p.page);
            body.page_count = Some(p.page_count(count));
            if p.has_next(count) {
                body.next = Some(params.page_link(&self.base_url, path, p.page + 1));
            }
            if p.has_prev() {
                body.prev = Some(params.page_link(&self.base_url, path, p.page - 1));
            }
        }
        body
    }

    pub async fn get(&self, call: Call<'_>, id: &str) -> Result<Value, AppError> {
        let model = self.model(call.model)?;
        let path = call.path;
        let (req, params) = match self.before(Action::Get, call, Some(id), Document::new()).await? {
            Ok(next) => next,
            Err(payload) => return Ok(payload),
        };
        let principal = req.principal.as_ref();
        let access = self.authorize(&model, principal, Verb::Read)?;
        let owner = owner_scope(access, principal);

        let desc = compile(&model, &params, owner)?;
        let sig = signature("GET", path, &params, owner);
        let payload = match self.cache.lookup(&model.name, &sig) {
            Lookup::Hit(payload) => payload.as_ref().clone(),
            Lookup::Miss(slot) => {
                let scoped = if access.owner_scoped { principal } else { None };
                let record = self
                    .crud
                    .read_expanded(&model, id, &desc, params.flag("showDeleted"), scoped)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("{} {} not found", model.name, id)))?;
                self.cache.store(slot, Value::Object(record)).as_ref().clone()
            }
        };
        self.after(&req, payload).await
    }

    pub async fn create(&self, call: Call<'_>, mut body: Document) -> Result<Value, AppError> {
        let started = Instant::now();
        let model = self.model(call.model)?;
        strip_admin_elevation(&model.name, call.principal.as_ref(), &mut body);
        let (mut req, params) = match self.before(Action::Create, call, None, body).await? {
            Ok(next) => next,
            Err(payload) => return Ok(payload),
        };
        let principal = req.principal.clone();
        self.authorize(&model, principal.as_ref(), Verb::Create)?;

        let silenced = is_silenced(&params, &req.body);
        let body = std::mem::take(&mut req.body);
        let mut record = self.crud.create(&model, body, principal.as_ref()).await?;
        self.cache.flush(&model.name);
        if !silenced {
            self.callbacks.post(&model.name, &record, principal.as_ref());
        }
        log_mutation(Action::Create, &model.name, &record, principal.as_ref(), None, started);

        model.schema.strip_sensitive(&mut record);
        let payload = to_value(ok_with_data(format!("{} created", model.name), Value::Object(record)))?;
        self.after(&req, payload).await
    }

    pub async fn update(&self, call: Call<'_>, id: &str, mut body: Document) -> Result<Value, AppError> {
        let started = Instant::now();
        let model = self.model(call.model)?;
        strip_admin_elevation(&model.name, call.principal.as_ref(), &mut body);
        let (mut req, params) = match self.before(Action::Update, call, Some(id), body).await? {
            Ok(next) => next,
            Err(payload) => return Ok(payload),
        };
        let principal = req.principal.clone();
        let access = self.authorize(&model, principal.as_ref(), Verb::Update)?;

        let silenced = is_silenced(&params, &req.body);
        let body = std::mem::take(&mut req.body);
        let mut record = self
            .crud
            .update(&model, id, body, principal.as_ref(), access.owner_scoped)
            .await?;
        self.cache.flush(&model.name);
        if !silenced {
            self.callbacks.put(&model.name, &record, principal.as_ref());
        }
        log_mutation(Action::Update, &model.name, &record, principal.as_ref(), None, started);

        model.schema.strip_sensitive(&mut record);
        let payload = to_value(ok_with_data(format!("{} updated", model.name), Value::Object(record)))?;
        self.after(&req, payload).await
    }

    /// The body is only consulted for `_silence`.
    pub async fn delete(&self, call: Call<'_>, id: &str, body: Document) -> Result<Value, AppError> {
        let started = Instant::now();
        let model = self.model(call.model)?;
        let (req, params) = match self.before(Action::Delete, call, Some(id), body).await? {
            Ok(next) => next,
            Err(payload) => return Ok(payload),
        };
        let principal = req.principal.as_ref();
        let access = self.authorize(&model, principal, Verb::Delete)?;

        let (record, kind) = self
            .crud
            .delete(&model, id, principal, access.owner_scoped)
            .await?;
        self.cache.flush(&model.name);
        if !is_silenced(&params, &req.body) {
            self.callbacks.delete(&model.name, &record, principal, kind);
        }
        log_mutation(Action::Delete, &model.name, &record, principal, Some(kind), started);

        let payload = to_value(ok_message(format!("{} deleted", model.name)))?;
        self.after(&req, payload).await
    }

    /// Invoke a collection-scoped method. `verb` is `Read` for GET and `Create` for POST.
    pub async fn call_collection(
        &self,
        model_name: &str,
        method: &str,
        verb: Verb,
        body: Value,
        principal: Option<Principal>,
    ) -> Result<Value, AppError> {
        let model = self.model(model_name)?;
        let bound = model
            .methods
            .resolve(method, MethodScope::Collection)
            .cloned()
            .ok_or_else(|| method_not_found(&model, method))?;
        self.authorize(&model, principal.as_ref(), verb)?;
        tracing::debug!(model = %model.name, method = %method, "calling collection method");
        bound
            .handler
            .call(MethodCall {
                model: model.name.clone(),
                store: self.store().clone(),
                body,
                item: None,
                principal,
            })
            .await
    }

    /// Invoke an item-scoped method on record `id`.
    pub async fn call_item(
        &self,
        model_name: &str,
        method: &str,
        id: &str,
        principal: Option<Principal>,
    ) -> Result<Value, AppError> {
        let model = self.model(model_name)?;
        let bound = model
            .methods
            .resolve(method, MethodScope::Item)
            .cloned()
            .ok_or_else(|| method_not_found(&model, method))?;
        let access = self.authorize(&model, principal.as_ref(), Verb::Read)?;
        let item = self
            .crud
            .read(&model, id, false)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {} not found", model.name, id)))?;
        if access.owner_scoped && !owns(&item, principal.as_ref()) {
            return Err(AppError::Forbidden(format!("Not allowed to read {} {}", model.name, id)));
        }
        tracing::debug!(model = %model.name, method = %method, id = %id, "calling item method");
        bound
            .handler
            .call(MethodCall {
                model: model.name.clone(),
                store: self.store().clone(),
                body: Value::Null,
                item: Some(item),
                principal,
            })
            .await
    }

    /// Models exposing any permission: `[{model, perms}]`.
    pub fn models(&self) -> Value {
        Value::Array(
            self.registry
                .models
                .iter()
                .filter(|m| !m.perms.is_empty())
                .map(|m| json!({ "model": m.name, "perms": m.perms.describe() }))
                .collect(),
        )
    }

    pub fn model_schema(&self, name: &str) -> Result<Value, AppError> {
        Ok(self.model(name)?.schema.describe())
    }
}

fn owner_scope(access: Access, principal: Option<&Principal>) -> Option<&str> {
    if access.owner_scoped {
        principal.map(|p| p.id.as_str())
    } else {
        None
    }
}

fn is_silenced(params: &RequestParams, body: &Document) -> bool {
    params.contains(SILENCE_PARAM) || body.contains_key(SILENCE_PARAM)
}

fn method_not_found(model: &Model, method: &str) -> AppError {
    AppError::NotFound(format!("Method {} not found on {}", method, model.name))
}

fn to_value(body: impl serde::Serialize) -> Result<Value, AppError> {
    serde_json::to_value(body).map_err(|e| AppError::Internal(e.to_string()))
}

fn log_mutation(
    action: Action,
    model: &str,
    record: &Document,
    principal: Option<&Principal>,
    kind: Option<DeleteKind>,
    started: Instant,
) {
    tracing::info!(
        action = ?action,
        model = %model,
        id = record.get(ID_FIELD).and_then(serde_json::Value::as_str).unwrap_or("-"),
        principal = principal.map(|p| p.id.as_str()).unwrap_or("-"),
        soft = matches!(kind, Some(DeleteKind::Soft)),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "mutation applied"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_models;
    use crate::store::{InMemoryStore, OWNER_FIELD, VERSION_FIELD};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const MODELS: &str = r#"[
        { "name": "test", "fields": [
            { "name": "foo", "type": "string" },
            { "name": "password", "type": "string" }
        ], "perms": { "admin": "crud", "owner": "rud", "user": "c", "all": "" },
          "methods": [{ "name": "hello" }, { "name": "foo_of", "scope": "item" }] },
        { "name": "open", "fields": [{ "name": "foo", "type": "string" }], "perms": { "all": "crud" } },
        { "name": "hidden", "fields": [] }
    ]"#;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl MutationCallbacks for Arc<Recorder> {
        fn post(&self, model: &str, _record: &Document, _principal: Option<&Principal>) {
            self.0.lock().unwrap().push(format!("post {}", model));
        }
        fn delete(&self, model: &str, _record: &Document, _principal: Option<&Principal>, kind: DeleteKind) {
            self.0.lock().unwrap().push(format!("delete {} {:?}", model, kind));
        }
    }

    struct Deny;

    #[async_trait]
    impl crate::service::hooks::PreHook for Deny {
        async fn before(&self, _req: &mut HookRequest) -> Result<HookFlow, AppError> {
            Ok(HookFlow::Respond(json!({ "denied": true })))
        }
    }

    async fn engine_with(hooks: Hooks, recorder: Arc<Recorder>) -> Engine {
        let registry = ModelRegistry::builder()
            .models(parse_models(MODELS).unwrap())
            .method("test", "hello", |_call: MethodCall| async {
                Ok::<_, AppError>(json!("hello"))
            })
            .method("test", "foo_of", |call: MethodCall| async move {
                Ok::<_, AppError>(call.item.and_then(|i| i.get("foo").cloned()).unwrap_or(Value::Null))
            })
            .build()
            .unwrap();
        let engine = Engine::builder(Arc::new(registry), Arc::new(InMemoryStore::new()))
            .hooks(hooks)
            .callbacks(recorder)
            .build();
        engine.prepare().await.unwrap();
        engine
    }

    async fn engine() -> Engine {
        engine_with(Hooks::default(), Arc::new(Recorder::default())).await
    }

    fn call_at<'a>(
        model: &'a str,
        path: &'a str,
        principal: Option<Principal>,
        pairs: &[(&str, &str)],
    ) -> Call<'a> {
        Call {
            model,
            path,
            params: RequestParams::from_pairs(
                pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ),
            principal,
        }
    }

    fn call<'a>(model: &'a str, principal: Option<Principal>, pairs: &[(&str, &str)]) -> Call<'a> {
        let path = match model {
            "open" => "/api/open",
            _ => "/api/test",
        };
        call_at(model, path, principal, pairs)
    }

    fn body(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn unknown_model_is_not_found() {
        let e = engine().await;
        let err = e.list(call("nope", None, &[])).await.unwrap_err();
        assert_eq!(err.to_string(), "Model nope not found");
    }

    #[tokio::test]
    async fn owner_scoped_list_only_returns_own_records() {
        let e = engine().await;
        let u1 = Principal::new("u1");
        let u2 = Principal::new("u2");
        e.create(call("test", Some(u1.clone()), &[]), body(json!({ "foo": "a", "password": "s" })))
            .await
            .unwrap();
        e.create(call("test", Some(u2.clone()), &[]), body(json!({ "foo": "b" })))
            .await
            .unwrap();

        let list = e.list(call("test", Some(u1), &[])).await.unwrap();
        assert_eq!(list["count"], json!(1));
        assert_eq!(list["data"][0]["foo"], json!("a"));
        assert!(list["data"][0].get("password").is_none());

        let err = e.list(call("test", None, &[])).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn mutations_fire_callbacks_unless_silenced() {
        let recorder = Arc::new(Recorder::default());
        let e = engine_with(Hooks::default(), recorder.clone()).await;
        let created = e
            .create(call("open", None, &[]), body(json!({ "foo": "a" })))
            .await
            .unwrap();
        assert_eq!(created["message"], json!("open created"));
        assert_eq!(created["data"][VERSION_FIELD], json!(0));
        assert!(created["data"].get(OWNER_FIELD).is_none());
        e.create(call("open", None, &[("_silence", "1")]), Document::new())
            .await
            .unwrap();
        let quiet = e
            .create(call("open", None, &[]), body(json!({ "foo": "q" })))
            .await
            .unwrap();
        let quiet_id = quiet["data"][ID_FIELD].as_str().unwrap();
        let quiet_path = format!("/api/open/{}", quiet_id);
        e.delete(call_at("open", &quiet_path, None, &[]), quiet_id, body(json!({ "_silence": true })))
            .await
            .unwrap();

        let id = created["data"][ID_FIELD].as_str().unwrap();
        let path = format!("/api/open/{}", id);
        let deleted = e.delete(call_at("open", &path, None, &[]), id, Document::new()).await.unwrap();
        assert_eq!(deleted, json!({ "status": "ok", "message": "open deleted" }));
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                "post open".to_string(),
                "post open".to_string(),
                "delete open Hard".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn item_reads_are_cached_under_their_own_path() {
        let e = engine().await;
        let created = e
            .create(call("open", None, &[]), body(json!({ "foo": "a" })))
            .await
            .unwrap();
        let id = created["data"][ID_FIELD].as_str().unwrap();
        let path = format!("/api/open/{}", id);

        let list = e.list(call("open", None, &[])).await.unwrap();
        assert_eq!(list["count"], json!(1));
        let item = e.get(call_at("open", &path, None, &[]), id).await.unwrap();
        assert_eq!(item["foo"], json!("a"));
        assert!(item.get("count").is_none());
        assert_eq!(e.cache().entry_count(), 2);

        let sig = signature("GET", &path, &RequestParams::default(), None);
        assert!(matches!(e.cache().lookup("open", &sig), Lookup::Hit(_)));

        e.update(call_at("open", &path, None, &[]), id, body(json!({ "foo": "b" })))
            .await
            .unwrap();
        let item = e.get(call_at("open", &path, None, &[]), id).await.unwrap();
        assert_eq!(item["foo"], json!("b"));
    }

    #[tokio::test]
    async fn pre_hook_short_circuits_before_permissions() {
        let hooks = Hooks::default().pre(Action::List, Deny);
        let e = engine_with(hooks, Arc::new(Recorder::default())).await;
        let out = e.list(call("test", None, &[])).await.unwrap();
        assert_eq!(out, json!({ "denied": true }));
    }

    #[tokio::test]
    async fn methods_respect_scope() {
        let e = engine().await;
        let u1 = Principal::new("u1");
        let out = e
            .call_collection("test", "hello", Verb::Create, Value::Null, Some(u1.clone()))
            .await
            .unwrap();
        assert_eq!(out, json!("hello"));
        assert!(matches!(
            e.call_collection("test", "foo_of", Verb::Create, Value::Null, Some(u1.clone())).await,
            Err(AppError::NotFound(_))
        ));

        let created = e
            .create(call("test", Some(u1.clone()), &[]), body(json!({ "foo": "x" })))
            .await
            .unwrap();
        let id = created["data"][ID_FIELD].as_str().unwrap();
        let out = e.call_item("test", "foo_of", id, Some(u1)).await.unwrap();
        assert_eq!(out, json!("x"));
        assert!(matches!(
            e.call_item("test", "foo_of", id, Some(Principal::new("u2"))).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn introspection_lists_models_with_permissions() {
        let e = engine().await;
        let models = e.models();
        let names: Vec<_> = models.as_array().unwrap().iter().map(|m| m["model"].clone()).collect();
        assert_eq!(names, vec![json!("test"), json!("open")]);
        assert!(e.model_schema("test").unwrap().get("foo").is_some());
        assert!(matches!(e.model_schema("nope"), Err(AppError::NotFound(_))));
    }
}
