//! Generic CRUD execution against a [`DocumentStore`].

use crate::config::{Model, ModelRegistry};
use crate::error::AppError;
use crate::extractors::principal::Principal;
use crate::query::{Populate, QueryDescriptor};
use crate::service::deserialize::{deserialize, populate};
use crate::service::hooks::DeleteKind;
use crate::service::permission::owns;
use crate::service::validation::RecordValidator;
use crate::store::{Document, DocumentStore, DELETED_FIELD, ID_FIELD, OWNER_FIELD, VERSION_FIELD};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of a list query: one page of records plus the unpaginated total.
#[derive(Debug)]
pub struct Page {
    pub records: Vec<Document>,
    pub count: u64,
}

#[derive(Clone)]
pub struct CrudService {
    registry: Arc<ModelRegistry>,
    store: Arc<dyn DocumentStore>,
}

impl CrudService {
    pub fn new(registry: Arc<ModelRegistry>, store: Arc<dyn DocumentStore>) -> Self {
        CrudService { registry, store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Run the compiled query and its count, then expand requested relations.
    pub async fn list(&self, model: &Model, desc: &QueryDescriptor) -> Result<Page, AppError> {
        let mut records = self.store.find(&model.name, &desc.find).await?;
        let count = self.store.count(&model.name, &desc.find).await?;
        self.expand(&mut records, &desc.populate).await?;
        for r in records.iter_mut() {
            model.schema.strip_sensitive(r);
        }
        Ok(Page { records, count })
    }

    /// Fetch one record. Soft-deleted records are hidden unless `show_deleted`.
    pub async fn read(
        &self,
        model: &Model,
        id: &str,
        show_deleted: bool,
    ) -> Result<Option<Document>, AppError> {
        let record = self.store.find_by_id(&model.name, id).await?;
        Ok(record.filter(|r| show_deleted || !is_deleted(r)))
    }

    /// Fetch one record for output: relations expanded, projection applied, sensitive fields stripped.
    ///
    /// With `owner` set, a record owned by someone else is `Forbidden`.
    pub async fn read_expanded(
        &self,
        model: &Model,
        id: &str,
        desc: &QueryDescriptor,
        show_deleted: bool,
        owner: Option<&Principal>,
    ) -> Result<Option<Document>, AppError> {
        let Some(record) = self.read(model, id, show_deleted).await? else {
            return Ok(None);
        };
        if owner.is_some() && !owns(&record, owner) {
            return Err(AppError::Forbidden(format!("Not allowed to read {} {}", model.name, id)));
        }
        let mut records = vec![crate::store::project(record, desc.find.projection.as_deref())];
        self.expand(&mut records, &desc.populate).await?;
        let mut record = records.pop().unwrap_or_default();
        model.schema.strip_sensitive(&mut record);
        Ok(Some(record))
    }

    /// Build a record from a flat body and persist it. `_owner_id` comes from the principal.
    pub async fn create(
        &self,
        model: &Model,
        body: Document,
        principal: Option<&Principal>,
    ) -> Result<Document, AppError> {
        let data = deserialize(body);
        let mut record = Document::new();
        populate(&mut record, &data, &model.schema)?;
        RecordValidator::apply_defaults(&mut record, &model.schema)?;
        RecordValidator::validate(&record, &model.schema)?;
        if let Some(p) = principal {
            record.insert(OWNER_FIELD.to_string(), Value::String(p.id.clone()));
        }
        record.insert(VERSION_FIELD.to_string(), Value::from(0u64));
        Ok(self.store.insert(&model.name, record).await?)
    }

    /// Apply a flat body onto an existing record and bump `_version`.
    ///
    /// With `owner_scoped`, only the record's owner may update it.
    pub async fn update(
        &self,
        model: &Model,
        id: &str,
        body: Document,
        principal: Option<&Principal>,
        owner_scoped: bool,
    ) -> Result<Document, AppError> {
        let mut record = self.load_for_write(model, id, principal, owner_scoped, true).await?;
        let data = deserialize(body);
        populate(&mut record, &data, &model.schema)?;
        RecordValidator::validate(&record, &model.schema)?;
        bump_version(&mut record);
        Ok(self.store.replace(&model.name, id, record).await?)
    }

    /// Soft-delete when the schema declares `_deleted`, otherwise remove the record.
    pub async fn delete(
        &self,
        model: &Model,
        id: &str,
        principal: Option<&Principal>,
        owner_scoped: bool,
    ) -> Result<(Document, DeleteKind), AppError> {
        let mut record = self.load_for_write(model, id, principal, owner_scoped, false).await?;
        if model.schema.soft_delete() {
            record.insert(DELETED_FIELD.to_string(), Value::Bool(true));
            bump_version(&mut record);
            let stored = self.store.replace(&model.name, id, record).await?;
            Ok((stored, DeleteKind::Soft))
        } else {
            if !self.store.remove(&model.name, id).await? {
                return Err(not_found(model, id));
            }
            Ok((record, DeleteKind::Hard))
        }
    }

    async fn load_for_write(
        &self,
        model: &Model,
        id: &str,
        principal: Option<&Principal>,
        owner_scoped: bool,
        include_deleted: bool,
    ) -> Result<Document, AppError> {
        let record = self
            .read(model, id, include_deleted)
            .await?
            .ok_or_else(|| not_found(model, id))?;
        if owner_scoped && !owns(&record, principal) {
            return Err(AppError::Forbidden(format!(
                "Not allowed to modify {} {}",
                model.name, id
            )));
        }
        Ok(record)
    }

    /// Replace relation ids with the referenced records, batch-loaded per relation.
    async fn expand(&self, records: &mut [Document], populate: &[Populate]) -> Result<(), AppError> {
        for p in populate {
            let ids = collect_ids(records, &p.field);
            if ids.is_empty() {
                continue;
            }
            let mut related = self.store.find_by_ids(&p.target, &ids).await?;
            if let Some(target) = self.registry.model(&p.target) {
                for r in related.iter_mut() {
                    target.schema.strip_sensitive(r);
                }
            }
            let by_id: HashMap<String, Value> = related
                .into_iter()
                .filter_map(|r| {
                    let id = r.get(ID_FIELD)?.as_str()?.to_string();
                    Some((id, Value::Object(r)))
                })
                .collect();
            for record in records.iter_mut() {
                let Some(raw) = record.get(&p.field) else { continue };
                let expanded = if p.many {
                    Value::Array(
                        raw.as_array()
                            .into_iter()
                            .flatten()
                            .filter_map(|v| v.as_str().and_then(|id| by_id.get(id)).cloned())
                            .collect(),
                    )
                } else {
                    raw.as_str()
                        .and_then(|id| by_id.get(id))
                        .cloned()
                        .unwrap_or(Value::Null)
                };
                record.insert(p.output.clone(), expanded);
            }
        }
        Ok(())
    }
}

fn collect_ids(records: &[Document], field: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for record in records {
        match record.get(field) {
            Some(Value::String(id)) => ids.push(id.clone()),
            Some(Value::Array(items)) => {
                ids.extend(items.iter().filter_map(Value::as_str).map(str::to_string))
            }
            _ => {}
        }
    }
    ids.sort();
    ids.dedup();
    ids
}

fn is_deleted(record: &Document) -> bool {
    matches!(record.get(DELETED_FIELD), Some(Value::Bool(true)))
}

fn bump_version(record: &mut Document) {
    let current = record.get(VERSION_FIELD).and_then(Value::as_u64).unwrap_or(0);
    record.insert(VERSION_FIELD.to_string(), Value::from(current + 1));
}

fn not_found(model: &Model, id: &str) -> AppError {
    AppError::NotFound(format!("{} {} not found", model.name, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_models;
    use crate::query::{compile, RequestParams};
    use crate::store::InMemoryStore;
    use serde_json::json;

    const MODELS: &str = r#"[
        { "name": "link", "fields": [
            { "name": "name", "type": "string" },
            { "name": "password", "type": "string" }
        ], "perms": { "all": "r" } },
        { "name": "test", "fields": [
            { "name": "foo", "type": "string", "default": "bar" },
            { "name": "age", "type": "number", "min": 0 },
            { "name": "link_id", "type": "objectid", "link": "link", "map_to": "link" },
            { "name": "links", "type": ["objectid"], "link": "link" }
        ], "perms": { "admin": "crud", "owner": "ud", "user": "cr", "all": "r" } },
        { "name": "soft", "fields": [
            { "name": "foo", "type": "string" },
            { "name": "_deleted", "type": "boolean", "default": false }
        ], "perms": { "user": "crud" } }
    ]"#;

    async fn service() -> (CrudService, Arc<ModelRegistry>) {
        let registry = Arc::new(
            ModelRegistry::builder()
                .models(parse_models(MODELS).unwrap())
                .build()
                .unwrap(),
        );
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
        store.prepare(&registry.collection_specs()).await.unwrap();
        (CrudService::new(registry.clone(), store), registry)
    }

    fn body(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn create_stamps_owner_version_and_defaults() {
        let (svc, reg) = service().await;
        let test = reg.model("test").unwrap();
        let p = Principal::new("u1");
        let rec = svc
            .create(test, body(json!({ "age": "3", "_version": 9, "bogus": 1 })), Some(&p))
            .await
            .unwrap();
        assert_eq!(rec["foo"], json!("bar"));
        assert_eq!(rec["age"], json!(3));
        assert_eq!(rec[VERSION_FIELD], json!(0));
        assert_eq!(rec[OWNER_FIELD], json!("u1"));
        assert!(rec.get("bogus").is_none());
        assert!(rec[ID_FIELD].is_string());
    }

    #[tokio::test]
    async fn failed_validation_persists_nothing() {
        let (svc, reg) = service().await;
        let test = reg.model("test").unwrap();
        let err = svc.create(test, body(json!({ "age": "-1" })), None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let desc = compile(test, &RequestParams::default(), None).unwrap();
        assert_eq!(svc.list(test, &desc).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn updates_bump_version_and_clear_fields() {
        let (svc, reg) = service().await;
        let test = reg.model("test").unwrap();
        let rec = svc.create(test, body(json!({ "age": 1 })), None).await.unwrap();
        let id = rec[ID_FIELD].as_str().unwrap().to_string();
        for n in 1..=3u64 {
            let updated = svc
                .update(test, &id, body(json!({ "age": n.to_string() })), None, false)
                .await
                .unwrap();
            assert_eq!(updated[VERSION_FIELD], json!(n));
        }
        let cleared = svc.update(test, &id, body(json!({ "foo": "" })), None, false).await.unwrap();
        assert_eq!(cleared["foo"], Value::Null);
        assert_eq!(cleared["age"], json!(3));
    }

    #[tokio::test]
    async fn owner_scoped_update_rejects_foreign_records() {
        let (svc, reg) = service().await;
        let test = reg.model("test").unwrap();
        let owner = Principal::new("u1");
        let other = Principal::new("u2");
        let rec = svc.create(test, Document::new(), Some(&owner)).await.unwrap();
        let id = rec[ID_FIELD].as_str().unwrap();
        let err = svc
            .update(test, id, body(json!({ "foo": "x" })), Some(&other), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        svc.update(test, id, body(json!({ "foo": "x" })), Some(&owner), true)
            .await
            .unwrap();
        assert!(matches!(
            svc.update(test, "missing", Document::new(), None, false).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn soft_and_hard_delete() {
        let (svc, reg) = service().await;
        let soft = reg.model("soft").unwrap();
        let rec = svc.create(soft, body(json!({ "foo": "a" })), None).await.unwrap();
        let id = rec[ID_FIELD].as_str().unwrap();
        let (deleted, kind) = svc.delete(soft, id, None, false).await.unwrap();
        assert_eq!(kind, DeleteKind::Soft);
        assert_eq!(deleted[DELETED_FIELD], json!(true));
        assert_eq!(deleted[VERSION_FIELD], json!(1));
        assert!(svc.read(soft, id, false).await.unwrap().is_none());
        assert!(svc.read(soft, id, true).await.unwrap().is_some());
        assert!(matches!(
            svc.delete(soft, id, None, false).await,
            Err(AppError::NotFound(_))
        ));

        let restored = svc
            .update(soft, id, body(json!({ "_deleted": "false" })), None, false)
            .await
            .unwrap();
        assert_eq!(restored[DELETED_FIELD], json!(false));
        assert_eq!(restored[VERSION_FIELD], json!(2));
        assert!(svc.read(soft, id, false).await.unwrap().is_some());

        let test = reg.model("test").unwrap();
        let rec = svc.create(test, Document::new(), None).await.unwrap();
        let id = rec[ID_FIELD].as_str().unwrap();
        let (_, kind) = svc.delete(test, id, None, false).await.unwrap();
        assert_eq!(kind, DeleteKind::Hard);
        assert!(svc.read(test, id, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn populate_expands_and_strips_related_records() {
        let (svc, reg) = service().await;
        let link = reg.model("link").unwrap();
        let test = reg.model("test").unwrap();
        let a = svc.create(link, body(json!({ "name": "a", "password": "x" })), None).await.unwrap();
        let b = svc.create(link, body(json!({ "name": "b" })), None).await.unwrap();
        let (a_id, b_id) = (a[ID_FIELD].clone(), b[ID_FIELD].clone());
        svc.create(
            test,
            body(json!({ "link_id": a_id, "links[0]": b_id, "links[1]": a_id })),
            None,
        )
        .await
        .unwrap();

        let params = RequestParams::from_pairs(vec![("autopopulate".into(), "true".into())]);
        let desc = compile(test, &params, None).unwrap();
        let page = svc.list(test, &desc).await.unwrap();
        let rec = &page.records[0];
        assert_eq!(rec["link_id"], a_id);
        assert_eq!(rec["link"]["name"], json!("a"));
        assert!(rec["link"].get("password").is_none());
        let names: Vec<_> = rec["links"]
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("b"), json!("a")]);
    }
}
