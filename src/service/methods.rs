//! Named model methods callable through `/call`.

use crate::error::AppError;
use crate::extractors::principal::Principal;
use crate::store::{Document, DocumentStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodScope {
    /// Called on the model: `/call/:model/:method`.
    #[default]
    Collection,
    /// Called on one record: `/call/:model/:id/:method`.
    Item,
}

/// Everything a method gets to work with.
#[derive(Clone)]
pub struct MethodCall {
    pub model: String,
    pub store: Arc<dyn DocumentStore>,
    /// Request body (POST) or query parameters (GET).
    pub body: Value,
    /// The loaded record for item-scoped calls.
    pub item: Option<Document>,
    pub principal: Option<Principal>,
}

#[async_trait]
pub trait ModelMethod: Send + Sync {
    async fn call(&self, call: MethodCall) -> Result<Value, AppError>;
}

#[async_trait]
impl<F, Fut> ModelMethod for F
where
    F: Fn(MethodCall) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, AppError>> + Send + 'static,
{
    async fn call(&self, call: MethodCall) -> Result<Value, AppError> {
        (self)(call).await
    }
}

#[derive(Clone)]
pub struct BoundMethod {
    pub scope: MethodScope,
    pub handler: Arc<dyn ModelMethod>,
}

#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, BoundMethod>,
}

impl MethodTable {
    pub fn insert(&mut self, name: String, scope: MethodScope, handler: Arc<dyn ModelMethod>) {
        self.methods.insert(name, BoundMethod { scope, handler });
    }

    pub fn get(&self, name: &str) -> Option<&BoundMethod> {
        self.methods.get(name)
    }

    /// Method `name` if it is declared with `scope`.
    pub fn resolve(&self, name: &str, scope: MethodScope) -> Option<&BoundMethod> {
        self.get(name).filter(|m| m.scope == scope)
    }
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.methods.keys().collect();
        names.sort();
        f.debug_struct("MethodTable").field("methods", &names).finish()
    }
}
