//! Hierarchical folder namespace on top of the document store.
//!
//! Registering [`FolderExtension`] adds the `folders` entity set, gives every
//! entity type backing a namespaced set (`splitIntoDirectories`) a nullable
//! `folder` reference, and installs the validators that keep names unique per
//! folder scope and the folder graph acyclic. [`Folders`] exposes path
//! resolution and move/copy.

mod hierarchy;
mod path;
mod validators;

pub use hierarchy::{EntityRef, HierarchyItem, MoveRequest};
pub use path::normalize_path;

use crate::document::{Document, FOLDER_FIELD};
use crate::error::{Result, StoreError};
use crate::model::{EntitySetDefinition, FieldDescriptor, Fields, Model, TypeRef};
use crate::store::{Collection, DocumentStore, StoreExtension};
use crate::transaction::Context;
use serde_json::{json, Value};

pub const FOLDERS_ENTITY_SET: &str = "folders";
pub const FOLDER_TYPE: &str = "FolderType";
pub const FOLDER_REF_TYPE: &str = "FolderRefType";
/// Human-readable key of folders; `folder` references point at it.
pub const FOLDER_KEY: &str = "shortid";

pub struct FolderExtension;

impl StoreExtension for FolderExtension {
    fn name(&self) -> &str {
        "folders"
    }

    fn after_model_registered(&self, model: &mut Model) -> Result<()> {
        model.register_complex_type(
            FOLDER_REF_TYPE,
            Fields::from([(
                FOLDER_KEY.to_string(),
                FieldDescriptor::string().reference_to(FOLDERS_ENTITY_SET),
            )]),
        );
        model.register_entity_type(
            FOLDER_TYPE,
            Fields::from([("name".to_string(), FieldDescriptor::string().public_key())]),
        );
        model.register_entity_set(
            FOLDERS_ENTITY_SET,
            EntitySetDefinition::new(FOLDER_TYPE)
                .split_into_directories()
                .human_readable_key(FOLDER_KEY),
        )?;

        let mut types: Vec<String> = model
            .namespaced_entity_sets()
            .into_iter()
            .filter_map(|set| model.entity_set(set).map(|def| def.entity_type.clone()))
            .collect();
        types.sort();
        types.dedup();
        for entity_type in types {
            model.register_entity_type(
                &entity_type,
                Fields::from([(
                    FOLDER_FIELD.to_string(),
                    FieldDescriptor::of(TypeRef::Named(FOLDER_REF_TYPE.to_string())),
                )]),
            );
        }
        Ok(())
    }

    fn after_init(&self, store: &DocumentStore) -> Result<()> {
        validators::install(store)
    }
}

/// Register the folder extension on a store that is not yet initialized.
pub fn register_folders(store: &mut DocumentStore) -> Result<()> {
    store.use_extension(FolderExtension)
}

impl DocumentStore {
    /// Folder operations; fail at call time if the folder extension is absent.
    pub fn folders(&self) -> Folders<'_> {
        Folders { store: self }
    }
}

#[derive(Clone, Copy)]
pub struct Folders<'a> {
    store: &'a DocumentStore,
}

impl<'a> Folders<'a> {
    pub(crate) fn collection(&self) -> Result<Collection<'a>> {
        self.store.collection(FOLDERS_ENTITY_SET)
    }

    pub(crate) async fn find_folder(&self, shortid: &str, ctx: &Context) -> Result<Option<Document>> {
        self.collection()?
            .find_one(json!({ FOLDER_KEY: shortid }), ctx)
            .await
    }

    /// Folder by shortid, or a 400 error naming it.
    pub(crate) async fn require_folder(&self, shortid: &str, ctx: &Context) -> Result<Document> {
        self.find_folder(shortid, ctx).await?.ok_or_else(|| {
            StoreError::validation(format!("Folder with shortid \"{shortid}\" was not found"))
        })
    }

    /// Every entity directly in `folder` (root when `None`), and with
    /// `recursive` everything below it.
    pub async fn get_entities_in_folder(
        &self,
        folder: Option<&str>,
        recursive: bool,
        ctx: &Context,
    ) -> Result<Vec<HierarchyItem>> {
        let mut items = Vec::new();
        let mut pending = vec![folder.map(str::to_string)];
        while let Some(scope) = pending.pop() {
            for set in self.store.model().namespaced_entity_sets() {
                let docs = self
                    .store
                    .collection(set)?
                    .find(folder_scope(scope.as_deref()), ctx)
                    .to_vec()
                    .await?;
                for doc in docs {
                    if recursive && set == FOLDERS_ENTITY_SET {
                        if let Some(shortid) = doc.str_field(FOLDER_KEY) {
                            pending.push(Some(shortid.to_string()));
                        }
                    }
                    items.push(HierarchyItem::new(set, doc));
                }
            }
        }
        Ok(items)
    }
}

/// Query selecting the documents placed directly in a folder scope.
pub fn folder_scope(folder: Option<&str>) -> Value {
    match folder {
        Some(shortid) => json!({ "folder.shortid": shortid }),
        None => json!({ FOLDER_FIELD: null }),
    }
}

pub(crate) fn public_key<'s>(store: &'s DocumentStore, entity_set: &str) -> Option<&'s str> {
    store
        .model()
        .entity_set(entity_set)
        .and_then(|def| def.entity_type_public_key.as_deref())
}

pub(crate) fn is_namespaced(store: &DocumentStore, entity_set: &str) -> bool {
    store
        .model()
        .entity_set(entity_set)
        .map(|def| def.split_into_directories)
        .unwrap_or(false)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_extension_extends_model() {
        let store = store().await;
        let model = store.model();
        assert_eq!(model.namespaced_entity_sets(), vec!["assets", "folders", "templates"]);
        assert!(model.entity_type("TemplateType").unwrap().contains_key("folder"));
        assert!(model.entity_type(FOLDER_TYPE).unwrap().contains_key("folder"));
        assert!(!model.entity_type("ReportType").unwrap().contains_key("folder"));
        assert_eq!(
            model.entity_set(FOLDERS_ENTITY_SET).unwrap().entity_type_public_key.as_deref(),
            Some("name")
        );
        assert_eq!(store.reserved_root_names(), vec!["reports", "settings", "storage"]);
    }

    #[tokio::test]
    async fn test_folders_requires_extension() {
        let mut store = DocumentStore::memory(Default::default());
        store.init().await.unwrap();
        let listing = store
            .folders()
            .get_entities_in_folder(None, false, &Context::new())
            .await
            .unwrap();
        assert!(listing.is_empty());
        assert!(store.folders().find_folder("x", &Context::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_get_entities_in_folder() {
        let store = store().await;
        insert(&store, "folders", json!({ "name": "a", "shortid": "a" })).await;
        insert(&store, "folders", json!({ "name": "b", "shortid": "b", "folder": { "shortid": "a" } })).await;
        insert(&store, "templates", json!({ "name": "t1", "folder": { "shortid": "a" } })).await;
        insert(&store, "assets", json!({ "name": "x", "folder": { "shortid": "b" } })).await;
        insert(&store, "templates", json!({ "name": "root" })).await;

        let ctx = Context::new();
        let direct = store.folders().get_entities_in_folder(Some("a"), false, &ctx).await.unwrap();
        let mut names: Vec<_> = direct.iter().filter_map(|i| i.entity.str_field("name")).collect();
        names.sort();
        assert_eq!(names, vec!["b", "t1"]);

        let all = store.folders().get_entities_in_folder(Some("a"), true, &ctx).await.unwrap();
        assert_eq!(all.len(), 3);

        let root = store.folders().get_entities_in_folder(None, false, &ctx).await.unwrap();
        let mut names: Vec<_> = root.iter().filter_map(|i| i.entity.str_field("name")).collect();
        names.sort();
        assert_eq!(names, vec!["a", "root"]);
    }
}
