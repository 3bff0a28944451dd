//! Moving and copying entities (and whole folders) between folders.

use super::{folder_scope, is_namespaced, Folders, FOLDERS_ENTITY_SET, FOLDER_KEY};
use crate::document::{
    folder_value, Document, FolderRef, CREATION_DATE_FIELD, FOLDER_FIELD, ID_FIELD,
    MODIFICATION_DATE_FIELD,
};
use crate::error::{Result, StoreError};
use crate::query::Update;
use crate::transaction::Context;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub entity_set: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub source: EntityRef,
    /// Shortid of the destination folder; `None` is the root.
    pub target: Option<String>,
    #[serde(default)]
    pub should_copy: bool,
    #[serde(default)]
    pub should_replace: bool,
}

/// An entity touched by a move or copy, tagged with its entity set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyItem {
    pub entity_set: String,
    pub entity: Document,
}

impl HierarchyItem {
    pub fn new(entity_set: &str, entity: Document) -> Self {
        HierarchyItem {
            entity_set: entity_set.to_string(),
            entity,
        }
    }

    fn is_folder(&self) -> bool {
        self.entity_set == FOLDERS_ENTITY_SET
    }
}

impl<'a> Folders<'a> {
    /// `source` plus, for a folder, everything nested below it. Parents
    /// always precede their children.
    async fn collect(&self, entity_set: &str, source: Document, ctx: &Context) -> Result<Vec<HierarchyItem>> {
        let mut items = vec![HierarchyItem::new(entity_set, source)];
        let mut next = 0;
        while next < items.len() {
            let item = &items[next];
            next += 1;
            if !item.is_folder() {
                continue;
            }
            let Some(shortid) = item.entity.str_field(FOLDER_KEY).map(str::to_string) else {
                continue;
            };
            for set in self.store.model().namespaced_entity_sets() {
                let children = self
                    .store
                    .collection(set)?
                    .find(folder_scope(Some(&shortid)), ctx)
                    .to_vec()
                    .await?;
                items.extend(children.into_iter().map(|doc| HierarchyItem::new(set, doc)));
            }
        }
        Ok(items)
    }

    /// Move (or copy) an entity with its subtree under another folder.
    ///
    /// Returns the affected items. An empty result means the request was
    /// refused without changes: moving a folder into its own subtree, or
    /// copying a folder while folder copies are disabled.
    pub async fn move_entity(&self, request: MoveRequest, ctx: &Context) -> Result<Vec<HierarchyItem>> {
        let MoveRequest {
            source,
            target,
            should_copy,
            should_replace,
        } = request;
        if !is_namespaced(self.store, &source.entity_set) {
            return Err(StoreError::validation(format!(
                "Entity set \"{}\" does not participate in folders",
                source.entity_set
            )));
        }
        let source_doc = self
            .store
            .collection(&source.entity_set)?
            .find_one(json!({ ID_FIELD: source.id }), ctx)
            .await?
            .ok_or_else(|| {
                StoreError::validation(format!(
                    "Could not find entity with id \"{}\" in {}",
                    source.id, source.entity_set
                ))
            })?;

        let items = self.collect(&source.entity_set, source_doc, ctx).await?;
        let target = target.map(|shortid| FolderRef { shortid });
        let affected = if should_copy {
            self.copy_items(items, target.as_ref(), should_replace, ctx).await?
        } else {
            self.move_items(items, target.as_ref(), should_replace, ctx).await?
        };
        self.refresh_timestamps(affected, ctx).await
    }

    async fn move_items(
        &self,
        mut items: Vec<HierarchyItem>,
        target: Option<&FolderRef>,
        should_replace: bool,
        ctx: &Context,
    ) -> Result<Vec<HierarchyItem>> {
        let source = &items[0];
        if source.entity.folder().as_ref() == target {
            return Ok(items);
        }
        if let Some(target) = target {
            let into_own_subtree = items
                .iter()
                .any(|item| item.is_folder() && item.entity.str_field(FOLDER_KEY) == Some(target.shortid.as_str()));
            if into_own_subtree {
                log::debug!("refusing to move folder into its own subtree ({})", target.shortid);
                return Ok(Vec::new());
            }
            self.require_folder(&target.shortid, ctx).await?;
        }

        let entity_set = source.entity_set.clone();
        let query = json!({ ID_FIELD: source.entity.id() });
        let collection = self.store.collection(&entity_set)?;
        let mut set = serde_json::Map::new();
        set.insert(FOLDER_FIELD.to_string(), folder_value(target));
        let update = Update { set };

        match collection.update(query.clone(), update.clone(), ctx).await {
            Ok(_) => {}
            Err(e) => {
                self.replace_conflict(e, target, should_replace, None, ctx).await?;
                collection.update(query, update, ctx).await?;
            }
        }
        items[0].entity.set_folder(target);
        Ok(items)
    }

    async fn copy_items(
        &self,
        items: Vec<HierarchyItem>,
        target: Option<&FolderRef>,
        should_replace: bool,
        ctx: &Context,
    ) -> Result<Vec<HierarchyItem>> {
        if items[0].is_folder() && !cfg!(feature = "copy-folders") {
            log::debug!("copying folders is disabled");
            return Ok(Vec::new());
        }
        if let Some(target) = target {
            self.require_folder(&target.shortid, ctx).await?;
        }

        let options = self.store.options();
        // Old folder shortid -> shortid of its copy.
        let mut remapped: HashMap<String, String> = HashMap::new();
        let mut copies = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let hrk = self
                .store
                .model()
                .entity_set(&item.entity_set)
                .and_then(|def| def.human_readable_key.clone());

            let mut copy = Document::new();
            for (key, value) in item.entity.iter() {
                let internal = key.starts_with("__") || key.starts_with('$');
                let regenerated = key == ID_FIELD || Some(key) == hrk.as_ref() || key == FOLDER_FIELD;
                if !internal && !regenerated {
                    copy.insert(key.clone(), value.clone());
                }
            }
            copy.insert(ID_FIELD.to_string(), Value::String(options.generate_id()));
            if let Some(hrk) = &hrk {
                let fresh = options.generate_human_readable_key();
                if item.is_folder() {
                    if let Some(old) = item.entity.str_field(hrk) {
                        remapped.insert(old.to_string(), fresh.clone());
                    }
                }
                copy.insert(hrk.clone(), Value::String(fresh));
            }
            let folder = if index == 0 {
                target.cloned()
            } else {
                item.entity.folder().map(|f| FolderRef {
                    shortid: remapped.get(&f.shortid).cloned().unwrap_or(f.shortid),
                })
            };
            copy.set_folder(folder.as_ref());

            let collection = self.store.collection(&item.entity_set)?;
            let inserted = match collection.insert(copy.clone(), ctx).await {
                Ok(inserted) => inserted,
                Err(e) => {
                    let original = item.entity.id().map(|id| (item.entity_set.as_str(), id));
                    self.replace_conflict(e, folder.as_ref(), should_replace, original, ctx)
                        .await?;
                    collection.insert(copy, ctx).await?
                }
            };
            copies.push(HierarchyItem::new(&item.entity_set, inserted));
        }
        Ok(copies)
    }

    /// Remove the entity a duplicate-name error points at so the caller can
    /// retry once. Anything else, including a clashing folder or the entity
    /// being copied (`original`), is re-raised.
    async fn replace_conflict(
        &self,
        error: StoreError,
        target: Option<&FolderRef>,
        should_replace: bool,
        original: Option<(&str, &str)>,
        ctx: &Context,
    ) -> Result<()> {
        let StoreError::DuplicatedEntity {
            existing_entity,
            existing_entity_entity_set,
            ..
        } = &error
        else {
            return Err(error);
        };
        if !should_replace || existing_entity_entity_set == FOLDERS_ENTITY_SET {
            return Err(error);
        }
        let Some(id) = existing_entity.id() else {
            return Err(error);
        };
        if original == Some((existing_entity_entity_set.as_str(), id)) {
            return Err(error);
        }
        log::warn!(
            "replacing {}/{} at {}",
            existing_entity_entity_set,
            id,
            target.map(|t| t.shortid.as_str()).unwrap_or("/")
        );
        let query = json!({
            "$and": [{ ID_FIELD: id }, folder_scope(target.map(|t| t.shortid.as_str()))]
        });
        self.store
            .collection(existing_entity_entity_set)?
            .remove(query, ctx)
            .await
    }

    /// Merge the stored audit timestamps back into the returned items.
    async fn refresh_timestamps(&self, mut items: Vec<HierarchyItem>, ctx: &Context) -> Result<Vec<HierarchyItem>> {
        for item in items.iter_mut() {
            let Some(id) = item.entity.id() else {
                continue;
            };
            let stored = self
                .store
                .collection(&item.entity_set)?
                .find_one(json!({ ID_FIELD: id }), ctx)
                .await?;
            if let Some(stored) = stored {
                for field in [CREATION_DATE_FIELD, MODIFICATION_DATE_FIELD] {
                    if let Some(value) = stored.get(field) {
                        item.entity.insert(field.to_string(), value.clone());
                    }
                }
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::store::DocumentStore;
    use pretty_assertions::assert_eq;

    fn request(entity_set: &str, id: &str, target: Option<&str>) -> MoveRequest {
        MoveRequest {
            source: EntityRef {
                entity_set: entity_set.to_string(),
                id: id.to_string(),
            },
            target: target.map(str::to_string),
            should_copy: false,
            should_replace: false,
        }
    }

    async fn tree() -> DocumentStore {
        let store = store().await;
        insert(&store, "folders", json!({ "_id": "fa", "name": "a", "shortid": "a" })).await;
        insert(&store, "folders", json!({ "_id": "fb", "name": "b", "shortid": "b", "folder": { "shortid": "a" } })).await;
        insert(&store, "folders", json!({ "_id": "fd", "name": "d", "shortid": "d" })).await;
        insert(&store, "templates", json!({ "_id": "tc", "name": "c", "content": "hi", "folder": { "shortid": "b" } })).await;
        store
    }

    async fn folder_of(store: &DocumentStore, set: &str, id: &str) -> Option<String> {
        store
            .collection(set)
            .unwrap()
            .find_one(json!({ "_id": id }), &Context::new())
            .await
            .unwrap()
            .unwrap()
            .folder_shortid()
            .map(str::to_string)
    }

    #[tokio::test]
    async fn test_move_entity() {
        let store = tree().await;
        let ctx = Context::new();
        let items = store
            .folders()
            .move_entity(request("templates", "tc", Some("d")), &ctx)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].entity.folder_shortid(), Some("d"));
        assert_eq!(folder_of(&store, "templates", "tc").await.as_deref(), Some("d"));

        let stored = store
            .collection("templates")
            .unwrap()
            .find_one(json!({ "_id": "tc" }), &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(items[0].entity.get("modificationDate"), stored.get("modificationDate"));

        store
            .folders()
            .move_entity(request("templates", "tc", None), &ctx)
            .await
            .unwrap();
        assert_eq!(folder_of(&store, "templates", "tc").await, None);
    }

    #[tokio::test]
    async fn test_move_folder_carries_subtree_and_is_idempotent() {
        let store = tree().await;
        let ctx = Context::new();
        for _ in 0..2 {
            let items = store
                .folders()
                .move_entity(request("folders", "fb", Some("d")), &ctx)
                .await
                .unwrap();
            assert_eq!(items.len(), 2);
        }
        assert_eq!(folder_of(&store, "folders", "fb").await.as_deref(), Some("d"));
        assert_eq!(folder_of(&store, "templates", "tc").await.as_deref(), Some("b"));
        let c = store
            .collection("templates")
            .unwrap()
            .find_one(json!({ "_id": "tc" }), &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            store.folders().resolve_entity_path(&c, "templates", &ctx).await.unwrap(),
            "/d/b/c"
        );
    }

    #[tokio::test]
    async fn test_move_into_own_descendant_is_noop() {
        let store = tree().await;
        let ctx = Context::new();
        let items = store
            .folders()
            .move_entity(request("folders", "fa", Some("b")), &ctx)
            .await
            .unwrap();
        assert!(items.is_empty());
        let items = store
            .folders()
            .move_entity(request("folders", "fa", Some("a")), &ctx)
            .await
            .unwrap();
        assert!(items.is_empty());
        assert_eq!(folder_of(&store, "folders", "fa").await, None);
        assert_eq!(folder_of(&store, "folders", "fb").await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_move_errors() {
        let store = tree().await;
        let ctx = Context::new();
        let err = store
            .folders()
            .move_entity(request("templates", "missing", None), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(400));

        let err = store
            .folders()
            .move_entity(request("templates", "tc", Some("nope")), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(400));
    }

    #[tokio::test]
    async fn test_move_with_replace() {
        let store = tree().await;
        insert(&store, "templates", json!({ "_id": "old", "name": "c", "folder": { "shortid": "d" } })).await;
        let ctx = Context::new();

        let err = store
            .folders()
            .move_entity(request("templates", "tc", Some("d")), &ctx)
            .await
            .unwrap_err();
        assert!(err.is_duplicated_entity());

        let mut replace = request("templates", "tc", Some("d"));
        replace.should_replace = true;
        store.folders().move_entity(replace, &ctx).await.unwrap();
        assert_eq!(count(&store, "templates", json!({ "_id": "old" })).await, 0);
        assert_eq!(folder_of(&store, "templates", "tc").await.as_deref(), Some("d"));
    }

    #[tokio::test]
    async fn test_replace_never_removes_a_folder() {
        let store = tree().await;
        insert(&store, "folders", json!({ "_id": "fx", "name": "x", "shortid": "x" })).await;
        insert(&store, "templates", json!({ "_id": "tx", "name": "x", "folder": { "shortid": "d" } })).await;

        let mut replace = request("templates", "tx", None);
        replace.should_replace = true;
        let err = store.folders().move_entity(replace, &Context::new()).await.unwrap_err();
        assert!(err.is_duplicated_entity());
        assert_eq!(count(&store, "folders", json!({ "_id": "fx" })).await, 1);
    }

    #[tokio::test]
    async fn test_copy_with_replace() {
        let store = tree().await;
        insert(&store, "templates", json!({ "_id": "old", "name": "c", "content": "old", "folder": { "shortid": "d" } })).await;
        let ctx = Context::new();

        let mut copy = request("templates", "tc", Some("d"));
        copy.should_copy = true;
        copy.should_replace = true;
        let items = store.folders().move_entity(copy, &ctx).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_ne!(items[0].entity.id(), Some("tc"));
        assert!(items[0].entity.contains_key("creationDate"));

        let at_destination = store
            .collection("templates")
            .unwrap()
            .find(json!({ "name": "c", "folder.shortid": "d" }), &ctx)
            .to_vec()
            .await
            .unwrap();
        assert_eq!(at_destination.len(), 1);
        assert_eq!(at_destination[0].str_field("content"), Some("hi"));
        assert_ne!(at_destination[0].str_field("shortid"), None);

        let source = store
            .collection("templates")
            .unwrap()
            .find_one(json!({ "_id": "tc" }), &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source.folder_shortid(), Some("b"));
        assert_ne!(source.str_field("shortid"), at_destination[0].str_field("shortid"));
    }

    #[tokio::test]
    async fn test_copy_without_replace_conflicts() {
        let store = tree().await;
        let mut copy = request("templates", "tc", Some("b"));
        copy.should_copy = true;
        let err = store.folders().move_entity(copy, &Context::new()).await.unwrap_err();
        assert!(err.is_duplicated_entity());
    }

    #[tokio::test]
    async fn test_copy_with_replace_into_own_folder_keeps_source() {
        let store = tree().await;
        let mut copy = request("templates", "tc", Some("b"));
        copy.should_copy = true;
        copy.should_replace = true;
        let err = store.folders().move_entity(copy, &Context::new()).await.unwrap_err();
        assert!(err.is_duplicated_entity());
        assert_eq!(count(&store, "templates", json!({ "_id": "tc" })).await, 1);
        assert_eq!(count(&store, "templates", json!({})).await, 1);
    }

    #[cfg(not(feature = "copy-folders"))]
    #[tokio::test]
    async fn test_copy_folder_is_disabled() {
        let store = tree().await;
        let mut copy = request("folders", "fb", Some("d"));
        copy.should_copy = true;
        let items = store.folders().move_entity(copy, &Context::new()).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(count(&store, "folders", json!({})).await, 3);
    }

    #[cfg(feature = "copy-folders")]
    #[tokio::test]
    async fn test_copy_folder_remaps_children() {
        let store = tree().await;
        let mut copy = request("folders", "fb", Some("d"));
        copy.should_copy = true;
        let items = store.folders().move_entity(copy, &Context::new()).await.unwrap();
        assert_eq!(items.len(), 2);
        let new_folder = items[0].entity.str_field("shortid").unwrap().to_string();
        assert_ne!(new_folder, "b");
        assert_eq!(items[0].entity.folder_shortid(), Some("d"));
        assert_eq!(items[1].entity.folder_shortid(), Some(new_folder.as_str()));
        assert_eq!(count(&store, "templates", json!({})).await, 2);
    }
}
