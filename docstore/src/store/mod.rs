//! The document store: model registration, initialization and the
//! cross-collection helpers every extension relies on.

mod collection;
mod defaults;

pub use collection::{Collection, Cursor};

use crate::config::StoreOptions;
use crate::document::{Document, ID_FIELD};
use crate::error::{Result, StoreError};
use crate::listeners::{FindEvent, InsertEvent, ListenerChain, RemoveEvent, UpdateEvent};
use crate::model::{EntitySetDefinition, Fields, Model, ModelDefinition, PropertyType};
use crate::provider::{MemoryProvider, Provider, ProviderOptions};
use crate::transaction::{Context, TransactionHandle, TransactionRegistry};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Hooks an extension uses to take part in store setup.
pub trait StoreExtension: Send + Sync {
    fn name(&self) -> &str;

    /// Runs after every definition is registered and before normalization.
    fn after_model_registered(&self, _model: &mut Model) -> Result<()> {
        Ok(())
    }

    /// Runs once collections exist; the place to install listeners.
    fn after_init(&self, _store: &DocumentStore) -> Result<()> {
        Ok(())
    }
}

/// Per-entity-set state: its definition and the four listener chains.
pub(crate) struct CollectionState {
    pub(crate) name: String,
    pub(crate) definition: EntitySetDefinition,
    pub(crate) before_find: ListenerChain<FindEvent>,
    pub(crate) before_insert: ListenerChain<InsertEvent>,
    pub(crate) before_update: ListenerChain<UpdateEvent>,
    pub(crate) before_remove: ListenerChain<RemoveEvent>,
}

impl CollectionState {
    fn new(name: &str, definition: EntitySetDefinition) -> Self {
        CollectionState {
            name: name.to_string(),
            definition,
            before_find: ListenerChain::new(format!("{name}.beforeFind")),
            before_insert: ListenerChain::new(format!("{name}.beforeInsert")),
            before_update: ListenerChain::new(format!("{name}.beforeUpdate")),
            before_remove: ListenerChain::new(format!("{name}.beforeRemove")),
        }
    }
}

pub struct DocumentStore {
    options: StoreOptions,
    model: Model,
    provider: Arc<dyn Provider>,
    collections: HashMap<String, CollectionState>,
    transactions: TransactionRegistry,
    extensions: Vec<Box<dyn StoreExtension>>,
    initialized: bool,
}

impl DocumentStore {
    pub fn new(options: StoreOptions, provider: Arc<dyn Provider>) -> Self {
        DocumentStore {
            options,
            model: Model::new(),
            provider,
            collections: HashMap::new(),
            transactions: TransactionRegistry::new(),
            extensions: Vec::new(),
            initialized: false,
        }
    }

    /// A store backed by the in-memory transactional provider.
    pub fn memory(options: StoreOptions) -> Self {
        let provider = Arc::new(MemoryProvider::with_id_strategy(options.id_strategy));
        Self::new(options, provider)
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn ensure_not_initialized(&self, what: &str) -> Result<()> {
        if self.initialized {
            return Err(StoreError::Model(format!(
                "Can not register {what} after the store is initialized"
            )));
        }
        Ok(())
    }

    pub fn register_entity_type(&mut self, name: &str, fields: Fields) -> Result<()> {
        self.ensure_not_initialized(&format!("entity type '{name}'"))?;
        self.model.register_entity_type(name, fields);
        Ok(())
    }

    pub fn register_complex_type(&mut self, name: &str, fields: Fields) -> Result<()> {
        self.ensure_not_initialized(&format!("complex type '{name}'"))?;
        self.model.register_complex_type(name, fields);
        Ok(())
    }

    pub fn register_entity_set(&mut self, name: &str, def: EntitySetDefinition) -> Result<()> {
        self.ensure_not_initialized(&format!("entity set '{name}'"))?;
        self.model.register_entity_set(name, def)
    }

    /// Register every type and set of a parsed model file.
    pub fn register_model(&mut self, definition: ModelDefinition) -> Result<()> {
        self.ensure_not_initialized("a model")?;
        self.model.register_definition(definition)
    }

    pub fn use_extension(&mut self, extension: impl StoreExtension + 'static) -> Result<()> {
        self.ensure_not_initialized(&format!("extension '{}'", extension.name()))?;
        self.extensions.push(Box::new(extension));
        Ok(())
    }

    /// Freeze the model, prepare the provider and build the collections.
    pub async fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Err(StoreError::Model("Store is already initialized".to_string()));
        }
        for extension in &self.extensions {
            extension.after_model_registered(&mut self.model)?;
        }
        self.model.normalize()?;
        self.check_reserved_set_names()?;
        self.provider.load(&self.model).await?;

        let sets = self
            .model
            .entity_sets()
            .iter()
            .chain(self.model.internal_entity_sets().iter());
        for (name, def) in sets {
            self.collections
                .insert(name.clone(), CollectionState::new(name, def.clone()));
        }
        for state in self.collections.values() {
            defaults::install(state);
        }
        self.initialized = true;
        log::info!(
            "document store initialized with {} entity sets ({} internal)",
            self.collections.len(),
            self.model.internal_entity_sets().len()
        );

        for extension in &self.extensions {
            extension.after_init(self)?;
            log::debug!("extension '{}' initialized", extension.name());
        }
        Ok(())
    }

    fn check_reserved_set_names(&self) -> Result<()> {
        for name in self.model.namespaced_entity_sets() {
            if self
                .options
                .reserved_names
                .iter()
                .any(|r| r.eq_ignore_ascii_case(name))
            {
                return Err(StoreError::Model(format!(
                    "Entity set '{name}' uses a reserved name"
                )));
            }
        }
        Ok(())
    }

    /// Names namespaced entities may not take at the root.
    pub fn reserved_root_names(&self) -> Vec<String> {
        let namespaced: HashSet<&str> = self.model.namespaced_entity_sets().into_iter().collect();
        let mut names: Vec<String> = self.options.reserved_names.clone();
        names.extend(
            self.model
                .entity_sets()
                .keys()
                .chain(self.model.internal_entity_sets().keys())
                .filter(|n| !namespaced.contains(n.as_str()))
                .cloned(),
        );
        names.sort();
        names
    }

    fn state(&self, name: &str, internal: bool) -> Result<&CollectionState> {
        let state = self
            .collections
            .get(name)
            .ok_or_else(|| StoreError::UnknownEntitySet(name.to_string()))?;
        if state.definition.internal != internal {
            return Err(StoreError::UnknownEntitySet(name.to_string()));
        }
        Ok(state)
    }

    /// Collection of a public entity set.
    pub fn collection(&self, name: &str) -> Result<Collection<'_>> {
        Ok(Collection::new(self, self.state(name, false)?))
    }

    pub fn internal_collection(&self, name: &str) -> Result<Collection<'_>> {
        Ok(Collection::new(self, self.state(name, true)?))
    }

    /// Collection of either kind; used by helpers that walk every set.
    pub(crate) fn any_collection(&self, name: &str) -> Result<Collection<'_>> {
        let state = self
            .collections
            .get(name)
            .ok_or_else(|| StoreError::UnknownEntitySet(name.to_string()))?;
        Ok(Collection::new(self, state))
    }

    pub(crate) fn provider_options(&self, ctx: &Context) -> Result<ProviderOptions> {
        Ok(ProviderOptions::in_transaction(self.transactions.resolve(ctx)?))
    }

    pub async fn begin_transaction(&self, ctx: &mut Context) -> Result<()> {
        if let Some(id) = &ctx.transaction {
            return Err(StoreError::Transaction(format!(
                "Transaction {id} is already active in this context"
            )));
        }
        let handle = self.provider.begin_transaction().await?;
        ctx.transaction = Some(handle.id.clone());
        self.transactions.register(handle);
        Ok(())
    }

    pub async fn commit_transaction(&self, ctx: &mut Context) -> Result<()> {
        let handle = self.active_transaction(ctx)?;
        self.provider.commit_transaction(&handle).await?;
        self.transactions.take(ctx)?;
        ctx.transaction = None;
        Ok(())
    }

    pub async fn rollback_transaction(&self, ctx: &mut Context) -> Result<()> {
        let handle = self.active_transaction(ctx)?;
        self.provider.rollback_transaction(&handle).await?;
        self.transactions.take(ctx)?;
        ctx.transaction = None;
        Ok(())
    }

    /// The context's transaction stays registered until the provider has
    /// finished it, so a failed commit can still be rolled back.
    fn active_transaction(&self, ctx: &Context) -> Result<TransactionHandle> {
        self.transactions
            .resolve(ctx)?
            .ok_or_else(|| StoreError::Transaction("No active transaction in context".into()))
    }

    /// Remove every document of every entity set.
    pub async fn drop_all(&self, ctx: &Context) -> Result<()> {
        let opts = self.provider_options(ctx)?;
        self.provider.drop_all(&opts).await
    }

    /// Fail with `DUPLICATED_ENTITY` when `id` is already taken in `entity_set`.
    pub async fn check_duplicated_id(&self, entity_set: &str, id: &str, ctx: &Context) -> Result<()> {
        let existing = self
            .any_collection(entity_set)?
            .find_one(json!({ ID_FIELD: id }), ctx)
            .await?;
        match existing {
            Some(existing) => Err(StoreError::DuplicatedEntity {
                message: format!("Entity with _id \"{id}\" already exists in {entity_set}"),
                existing_entity: Box::new(existing),
                existing_entity_entity_set: entity_set.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Every `(entity set, document)` whose `referenceTo` field points at
    /// `key_value` of `entity_set`.
    pub async fn find_references(
        &self,
        entity_set: &str,
        key_value: &str,
        ctx: &Context,
    ) -> Result<Vec<(String, Document)>> {
        let mut set_names: Vec<&String> = self.model.entity_sets().keys().collect();
        set_names.sort();

        let mut found = Vec::new();
        for set_name in set_names {
            let Some(fields) = self.model.entity_set_fields(set_name) else {
                continue;
            };
            let mut paths = Vec::new();
            let mut visiting = Vec::new();
            collect_reference_paths(&self.model, fields, entity_set, "", &mut visiting, &mut paths)?;
            if paths.is_empty() {
                continue;
            }
            let clauses: Vec<_> = paths.iter().map(|p| json!({ p: key_value })).collect();
            let docs = self
                .collection(set_name)?
                .find(json!({ "$or": clauses }), ctx)
                .to_vec()
                .await?;
            found.extend(docs.into_iter().map(|d| (set_name.clone(), d)));
        }
        Ok(found)
    }
}

/// Dotted paths of every field (nested through complex and collection
/// types) marked `referenceTo: target`.
fn collect_reference_paths<'a>(
    model: &'a Model,
    fields: &'a Fields,
    target: &str,
    prefix: &str,
    visiting: &mut Vec<&'a str>,
    paths: &mut Vec<String>,
) -> Result<()> {
    for (name, def) in fields {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        if def.reference_to.as_deref() == Some(target) {
            paths.push(path.clone());
        }
        if let PropertyType::Complex { name, fields } = model.resolve_property_definition(def)?.sub_type {
            if visiting.contains(&name) {
                continue;
            }
            visiting.push(name);
            collect_reference_paths(model, fields, target, &path, visiting, paths)?;
            visiting.pop();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse_model_str, FieldDescriptor};
    use pretty_assertions::assert_eq;

    const MODEL: &str = r#"
complexTypes:
  ScriptRefType:
    shortid: { type: Edm.String, referenceTo: scripts }
entityTypes:
  TemplateType:
    name: { type: Edm.String, publicKey: true }
    content: { type: Edm.String }
    scripts: { type: "Collection(ScriptRefType)" }
  ScriptType:
    name: { type: Edm.String, publicKey: true }
  SettingType:
    key: { type: Edm.String }
    value: { type: Edm.String }
entitySets:
  templates: { entityType: TemplateType }
  scripts: { entityType: ScriptType }
  settings: { entityType: SettingType, humanReadableKey: key }
"#;

    async fn store() -> DocumentStore {
        let mut store = DocumentStore::memory(StoreOptions::default());
        store
            .register_model(parse_model_str(MODEL).unwrap())
            .unwrap();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_init_builds_collections_with_default_listeners() {
        let store = store().await;
        let templates = store.collection("templates").unwrap();
        assert_eq!(
            templates.before_insert().keys(),
            vec!["duplicate-id", "defaults", "human-readable-key"]
        );
        assert!(store.collection("missing").is_err());
        assert!(store.internal_collection("templates").is_err());
    }

    #[tokio::test]
    async fn test_registration_after_init_fails() {
        let mut store = store().await;
        let err = store
            .register_entity_type("LateType", Fields::new())
            .unwrap_err();
        assert!(err.to_string().contains("after the store is initialized"));
        assert!(store.init().await.is_err());
    }

    #[tokio::test]
    async fn test_namespaced_set_can_not_use_reserved_name() {
        let mut store = DocumentStore::memory(StoreOptions::default());
        store.register_entity_type("T", Fields::new()).unwrap();
        store
            .register_entity_set("storage", EntitySetDefinition::new("T").split_into_directories())
            .unwrap();
        assert!(store.init().await.is_err());
    }

    #[tokio::test]
    async fn test_internal_collection() {
        let mut store = DocumentStore::memory(StoreOptions::default());
        store
            .register_entity_type("LockType", [("key".to_string(), FieldDescriptor::string())].into())
            .unwrap();
        store
            .register_entity_set("locks", EntitySetDefinition::new("LockType").internal())
            .unwrap();
        store.init().await.unwrap();

        let ctx = Context::new();
        let locks = store.internal_collection("locks").unwrap();
        locks
            .insert(Document::from_value(json!({ "key": "a" })).unwrap(), &ctx)
            .await
            .unwrap();
        assert_eq!(locks.count(json!({}), &ctx).await.unwrap(), 1);
        assert!(store.collection("locks").is_err());
        assert_eq!(store.reserved_root_names(), vec!["locks", "storage"]);
    }

    #[tokio::test]
    async fn test_transaction_lifecycle() {
        let store = store().await;
        let mut ctx = Context::new();
        store.begin_transaction(&mut ctx).await.unwrap();
        assert!(store.begin_transaction(&mut ctx).await.is_err());

        let settings = store.collection("settings").unwrap();
        settings
            .insert(Document::from_value(json!({ "key": "a", "value": "1" })).unwrap(), &ctx)
            .await
            .unwrap();
        assert_eq!(settings.count(json!({}), &Context::new()).await.unwrap(), 0);
        assert_eq!(settings.count(json!({}), &ctx).await.unwrap(), 1);

        store.commit_transaction(&mut ctx).await.unwrap();
        assert!(!ctx.in_transaction());
        assert_eq!(settings.count(json!({}), &ctx).await.unwrap(), 1);
        assert!(store.commit_transaction(&mut ctx).await.is_err());
        assert!(store.rollback_transaction(&mut ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = store().await;
        let mut ctx = Context::new();
        store.begin_transaction(&mut ctx).await.unwrap();
        let settings = store.collection("settings").unwrap();
        settings
            .insert(Document::from_value(json!({ "key": "a" })).unwrap(), &ctx)
            .await
            .unwrap();
        store.rollback_transaction(&mut ctx).await.unwrap();
        assert_eq!(settings.count(json!({}), &ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_transaction() {
        let store = store().await;
        let mut ctx = Context::new();
        store.begin_transaction(&mut ctx).await.unwrap();

        // The provider no longer knows the transaction, so finishing it fails.
        let handle = store.transactions.resolve(&ctx).unwrap().unwrap();
        store.provider().rollback_transaction(&handle).await.unwrap();

        assert!(store.commit_transaction(&mut ctx).await.is_err());
        assert!(ctx.in_transaction());
        assert_eq!(store.transactions.len(), 1);

        assert!(store.rollback_transaction(&mut ctx).await.is_err());
        assert!(ctx.in_transaction());
        assert_eq!(store.transactions.len(), 1);
    }

    #[tokio::test]
    async fn test_check_duplicated_id() {
        let store = store().await;
        let ctx = Context::new();
        store
            .collection("scripts")
            .unwrap()
            .insert(Document::from_value(json!({ "_id": "s1", "name": "a" })).unwrap(), &ctx)
            .await
            .unwrap();
        let err = store.check_duplicated_id("scripts", "s1", &ctx).await.unwrap_err();
        assert_eq!(err.code(), Some("DUPLICATED_ENTITY"));
        assert!(store.check_duplicated_id("scripts", "s2", &ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_find_references_through_collection_field() {
        let store = store().await;
        let ctx = Context::new();
        let script = store
            .collection("scripts")
            .unwrap()
            .insert(Document::from_value(json!({ "name": "helpers" })).unwrap(), &ctx)
            .await
            .unwrap();
        let shortid = script.str_field("shortid").unwrap().to_string();
        let templates = store.collection("templates").unwrap();
        templates
            .insert(
                Document::from_value(json!({ "name": "a", "scripts": [{ "shortid": shortid }] }))
                    .unwrap(),
                &ctx,
            )
            .await
            .unwrap();
        templates
            .insert(Document::from_value(json!({ "name": "b" })).unwrap(), &ctx)
            .await
            .unwrap();

        let refs = store.find_references("scripts", &shortid, &ctx).await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].0, "templates");
        assert_eq!(refs[0].1.str_field("name"), Some("a"));
    }

    #[tokio::test]
    async fn test_drop_all() {
        let store = store().await;
        let ctx = Context::new();
        let scripts = store.collection("scripts").unwrap();
        scripts
            .insert(Document::from_value(json!({ "name": "a" })).unwrap(), &ctx)
            .await
            .unwrap();
        store.drop_all(&ctx).await.unwrap();
        assert_eq!(scripts.count(json!({}), &ctx).await.unwrap(), 0);
    }
}
