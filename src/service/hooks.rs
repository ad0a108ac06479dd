//! Extension points around the five CRUD actions.
//!
//! - [`PreHook`]s run after the model is resolved and before the permission check. They may
//!   rewrite the request or answer it outright.
//! - [`PostHook`]s run on every successful response, cached or not, and may rewrite the payload.
//! - [`MutationCallbacks`] fire after a mutation has persisted and the cache was flushed, unless
//!   the request carries `_silence`.

use crate::error::AppError;
use crate::extractors::principal::Principal;
use crate::store::Document;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    List,
    Get,
    Create,
    Update,
    Delete,
}

/// Owned view of the request handed to hooks.
#[derive(Clone, Debug)]
pub struct HookRequest {
    pub action: Action,
    pub model: String,
    pub principal: Option<Principal>,
    pub item_id: Option<String>,
    /// Query parameters as decoded pairs.
    pub params: Vec<(String, String)>,
    /// Flat body for create and update; empty otherwise.
    pub body: Document,
}

pub enum HookFlow {
    Continue,
    /// Skip the action and answer with this payload.
    Respond(Value),
}

#[async_trait]
pub trait PreHook: Send + Sync {
    async fn before(&self, req: &mut HookRequest) -> Result<HookFlow, AppError>;
}

#[async_trait]
pub trait PostHook: Send + Sync {
    async fn after(&self, req: &HookRequest, payload: &mut Value) -> Result<(), AppError>;
}

#[derive(Clone, Default)]
pub struct Hooks {
    pre: HashMap<Action, Vec<Arc<dyn PreHook>>>,
    post: HashMap<Action, Vec<Arc<dyn PostHook>>>,
}

impl Hooks {
    pub fn pre(mut self, action: Action, hook: impl PreHook + 'static) -> Self {
        self.pre.entry(action).or_default().push(Arc::new(hook));
        self
    }

    pub fn post(mut self, action: Action, hook: impl PostHook + 'static) -> Self {
        self.post.entry(action).or_default().push(Arc::new(hook));
        self
    }

    /// Run pre hooks in registration order; the first `Respond` wins.
    pub async fn run_pre(&self, req: &mut HookRequest) -> Result<HookFlow, AppError> {
        for hook in self.pre.get(&req.action).into_iter().flatten() {
            if let HookFlow::Respond(v) = hook.before(req).await? {
                return Ok(HookFlow::Respond(v));
            }
        }
        Ok(HookFlow::Continue)
    }

    pub async fn run_post(&self, req: &HookRequest, payload: &mut Value) -> Result<(), AppError> {
        for hook in self.post.get(&req.action).into_iter().flatten() {
            hook.after(req, payload).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("pre", &self.pre.values().map(Vec::len).sum::<usize>())
            .field("post", &self.post.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteKind {
    Soft,
    Hard,
}

/// Notified after each persisted mutation.
pub trait MutationCallbacks: Send + Sync {
    fn post(&self, _model: &str, _record: &Document, _principal: Option<&Principal>) {}
    fn put(&self, _model: &str, _record: &Document, _principal: Option<&Principal>) {}
    fn delete(&self, _model: &str, _record: &Document, _principal: Option<&Principal>, _kind: DeleteKind) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCallbacks;

impl MutationCallbacks for NoopCallbacks {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Tag(&'static str);

    #[async_trait]
    impl PreHook for Tag {
        async fn before(&self, req: &mut HookRequest) -> Result<HookFlow, AppError> {
            req.params.push(("tag".into(), self.0.into()));
            Ok(HookFlow::Continue)
        }
    }

    struct Block;

    #[async_trait]
    impl PreHook for Block {
        async fn before(&self, _req: &mut HookRequest) -> Result<HookFlow, AppError> {
            Ok(HookFlow::Respond(json!("blocked")))
        }
    }

    struct Stamp;

    #[async_trait]
    impl PostHook for Stamp {
        async fn after(&self, _req: &HookRequest, payload: &mut Value) -> Result<(), AppError> {
            payload["stamped"] = json!(true);
            Ok(())
        }
    }

    fn request(action: Action) -> HookRequest {
        HookRequest {
            action,
            model: "test".into(),
            principal: None,
            item_id: None,
            params: Vec::new(),
            body: Document::new(),
        }
    }

    #[tokio::test]
    async fn pre_hooks_run_in_order_until_respond() {
        let hooks = Hooks::default()
            .pre(Action::List, Tag("a"))
            .pre(Action::List, Block)
            .pre(Action::List, Tag("b"));
        let mut req = request(Action::List);
        let flow = hooks.run_pre(&mut req).await.unwrap();
        assert!(matches!(flow, HookFlow::Respond(ref v) if v == "blocked"));
        assert_eq!(req.params, vec![("tag".to_string(), "a".to_string())]);

        let mut other = request(Action::Get);
        assert!(matches!(hooks.run_pre(&mut other).await.unwrap(), HookFlow::Continue));
    }

    #[tokio::test]
    async fn post_hooks_rewrite_payload() {
        let hooks = Hooks::default().post(Action::Get, Stamp);
        let mut payload = json!({ "_id": "x" });
        hooks.run_post(&request(Action::Get), &mut payload).await.unwrap();
        assert_eq!(payload, json!({ "_id": "x", "stamped": true }));
    }
}
