use super::{public_key, FOLDERS_ENTITY_SET, FOLDER_KEY};
use crate::document::{Document, FOLDER_FIELD};
use crate::error::{Result, StoreError};
use crate::listeners::{InsertEvent, Listener, RemoveEvent, UpdateEvent};
use crate::store::DocumentStore;
use crate::transaction::Context;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};

pub(super) fn install(store: &DocumentStore) -> Result<()> {
    for set in store.model().namespaced_entity_sets() {
        let collection = store.collection(set)?;
        let inserts = collection.before_insert();
        inserts.add("folder-exists", FolderExists);
        inserts.add("reserved-name", ReservedName);
        inserts.add("duplicate-name", DuplicateName);
        let updates = collection.before_update();
        updates.add("folder-exists", FolderExists);
        updates.add("reserved-name", ReservedName);
        updates.add("duplicate-name", DuplicateName);
    }
    let folders = store.collection(FOLDERS_ENTITY_SET)?;
    folders.before_update().add("folder-cycle", FolderCycle);
    folders.before_remove().add("cascade-remove", CascadeRemove);
    Ok(())
}

/// The documents an update would produce, when it touches the name or the
/// folder. `$set` alone does not tell the scope, so matches are re-fetched.
async fn updated_documents(store: &DocumentStore, event: &UpdateEvent, ctx: &Context) -> Result<Vec<Document>> {
    let set = &event.update.set;
    let touches_name = public_key(store, &event.entity_set).map_or(false, |k| set.contains_key(k));
    if !touches_name && !set.contains_key(FOLDER_FIELD) {
        return Ok(Vec::new());
    }
    let matched = store
        .collection(&event.entity_set)?
        .find(event.query.clone(), ctx)
        .to_vec()
        .await?;
    Ok(matched.iter().map(|doc| doc.merged(set)).collect())
}

/// Referenced parent folder must exist.
struct FolderExists;

impl FolderExists {
    async fn check(store: &DocumentStore, doc: &Document, ctx: &Context) -> Result<()> {
        match doc.folder_shortid() {
            Some(shortid) => store.folders().require_folder(shortid, ctx).await.map(|_| ()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Listener<InsertEvent> for FolderExists {
    async fn call(&self, store: &DocumentStore, event: &mut InsertEvent, ctx: &Context) -> Result<()> {
        Self::check(store, &event.doc, ctx).await
    }
}

#[async_trait]
impl Listener<UpdateEvent> for FolderExists {
    async fn call(&self, store: &DocumentStore, event: &mut UpdateEvent, ctx: &Context) -> Result<()> {
        if !event.update.set.contains_key(FOLDER_FIELD) {
            return Ok(());
        }
        for doc in updated_documents(store, event, ctx).await? {
            Self::check(store, &doc, ctx).await?;
        }
        Ok(())
    }
}

/// Root-level names may not shadow non-namespaced entity sets or reserved names.
struct ReservedName;

impl ReservedName {
    fn check(store: &DocumentStore, entity_set: &str, doc: &Document) -> Result<()> {
        if doc.folder_shortid().is_some() {
            return Ok(());
        }
        let Some(name) = public_key(store, entity_set).and_then(|k| doc.str_field(k)) else {
            return Ok(());
        };
        if store
            .reserved_root_names()
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(name))
        {
            return Err(StoreError::validation(format!(
                "Entity name \"{name}\" is reserved at the root level, use a different name or place it in a folder"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Listener<InsertEvent> for ReservedName {
    async fn call(&self, store: &DocumentStore, event: &mut InsertEvent, _ctx: &Context) -> Result<()> {
        Self::check(store, &event.entity_set, &event.doc)
    }
}

#[async_trait]
impl Listener<UpdateEvent> for ReservedName {
    async fn call(&self, store: &DocumentStore, event: &mut UpdateEvent, ctx: &Context) -> Result<()> {
        for doc in updated_documents(store, event, ctx).await? {
            Self::check(store, &event.entity_set, &doc)?;
        }
        Ok(())
    }
}

/// Public keys are unique per folder scope across every namespaced set,
/// ignoring case.
struct DuplicateName;

impl DuplicateName {
    async fn check(store: &DocumentStore, entity_set: &str, doc: &Document, ctx: &Context) -> Result<()> {
        let Some(name) = public_key(store, entity_set).and_then(|k| doc.str_field(k)) else {
            return Ok(());
        };
        let pattern = format!("^{}$", regex::escape(name));
        for set in store.model().namespaced_entity_sets() {
            let Some(key) = public_key(store, set) else {
                continue;
            };
            let query = json!({
                "$and": [
                    super::folder_scope(doc.folder_shortid()),
                    { key: { "$regex": pattern, "$options": "i" } }
                ]
            });
            let clashes = store.collection(set)?.find(query, ctx).to_vec().await?;
            let existing = clashes
                .into_iter()
                .find(|other| set != entity_set || other.id() != doc.id());
            if let Some(existing) = existing {
                return Err(StoreError::DuplicatedEntity {
                    message: format!(
                        "Entity with name \"{name}\" already exists in the same folder ({set})"
                    ),
                    existing_entity: Box::new(existing),
                    existing_entity_entity_set: set.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Listener<InsertEvent> for DuplicateName {
    async fn call(&self, store: &DocumentStore, event: &mut InsertEvent, ctx: &Context) -> Result<()> {
        Self::check(store, &event.entity_set, &event.doc, ctx).await
    }
}

#[async_trait]
impl Listener<UpdateEvent> for DuplicateName {
    async fn call(&self, store: &DocumentStore, event: &mut UpdateEvent, ctx: &Context) -> Result<()> {
        let updated = updated_documents(store, event, ctx).await?;
        for doc in &updated {
            Self::check(store, &event.entity_set, doc, ctx).await?;
        }
        Self::check_among(store, &event.entity_set, updated)
    }
}

impl DuplicateName {
    /// One update matching several documents must not give two of them the
    /// same name in the same folder.
    fn check_among(store: &DocumentStore, entity_set: &str, updated: Vec<Document>) -> Result<()> {
        let Some(key) = public_key(store, entity_set) else {
            return Ok(());
        };
        let mut seen: HashMap<(Option<String>, String), Document> = HashMap::new();
        for doc in updated {
            let Some(name) = doc.str_field(key) else {
                continue;
            };
            let scope = (doc.folder_shortid().map(str::to_string), name.to_lowercase());
            if let Some(existing) = seen.remove(&scope) {
                return Err(StoreError::DuplicatedEntity {
                    message: format!(
                        "Update would give more than one entity the name \"{name}\" in the same folder ({entity_set})"
                    ),
                    existing_entity: Box::new(existing),
                    existing_entity_entity_set: entity_set.to_string(),
                });
            }
            seen.insert(scope, doc);
        }
        Ok(())
    }
}

/// A folder may not become its own ancestor.
struct FolderCycle;

#[async_trait]
impl Listener<UpdateEvent> for FolderCycle {
    async fn call(&self, store: &DocumentStore, event: &mut UpdateEvent, ctx: &Context) -> Result<()> {
        if !event.update.set.contains_key(FOLDER_FIELD) {
            return Ok(());
        }
        for folder in updated_documents(store, event, ctx).await? {
            let own = folder.str_field(FOLDER_KEY);
            let mut seen = HashSet::new();
            let mut parent = folder.folder_shortid().map(str::to_string);
            while let Some(shortid) = parent {
                if own == Some(shortid.as_str()) {
                    return Err(StoreError::validation(format!(
                        "Folder \"{}\" can not be placed inside itself or one of its descendants",
                        folder.str_field("name").unwrap_or_default()
                    )));
                }
                if !seen.insert(shortid.clone()) {
                    break;
                }
                parent = store
                    .folders()
                    .find_folder(&shortid, ctx)
                    .await?
                    .and_then(|f| f.folder_shortid().map(str::to_string));
            }
        }
        Ok(())
    }
}

/// Removing a folder removes everything below it.
struct CascadeRemove;

#[async_trait]
impl Listener<RemoveEvent> for CascadeRemove {
    async fn call(&self, store: &DocumentStore, event: &mut RemoveEvent, ctx: &Context) -> Result<()> {
        let folders = store
            .collection(FOLDERS_ENTITY_SET)?
            .find(event.query.clone(), ctx)
            .to_vec()
            .await?;
        for folder in folders {
            let Some(shortid) = folder.str_field(FOLDER_KEY) else {
                continue;
            };
            for set in store.model().namespaced_entity_sets() {
                store
                    .collection(set)?
                    .remove(super::folder_scope(Some(shortid)), ctx)
                    .await?;
            }
            log::debug!("removed contents of folder {shortid}");
        }
        Ok(())
    }
}
