// Entity path resolution: "/a/b/c" <-> documents

use super::hierarchy::HierarchyItem;
use super::{folder_scope, is_namespaced, public_key, Folders, FOLDERS_ENTITY_SET};
use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::transaction::Context;
use serde_json::json;
use std::collections::HashSet;

/// Split a path into decoded segments, resolving `.` and `..`.
///
/// Relative paths are resolved against `current` (the root when absent).
pub fn normalize_path(path: &str, current: Option<&str>) -> Result<Vec<String>> {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", current.unwrap_or("/"), path)
    };

    let mut segments: Vec<String> = Vec::new();
    for raw in joined.split('/').filter(|s| !s.is_empty()) {
        let segment = urlencoding::decode(raw)
            .map_err(|e| StoreError::validation(format!("Invalid path segment \"{raw}\": {e}")))?
            .into_owned();
        match segment.as_str() {
            "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(StoreError::validation(format!(
                        "Path \"{path}\" points above the root"
                    )));
                }
            }
            _ => segments.push(segment),
        }
    }
    Ok(segments)
}

impl<'a> Folders<'a> {
    /// Folder named `name` directly inside `parent`.
    async fn child_folder(&self, parent: Option<&Document>, name: &str, ctx: &Context) -> Result<Option<Document>> {
        let parent = parent.and_then(|p| p.str_field(super::FOLDER_KEY));
        let query = json!({ "$and": [folder_scope(parent), { "name": name }] });
        self.collection()?.find_one(query, ctx).await
    }

    /// Absolute path of `entity`, built by walking its folder chain upwards.
    pub async fn resolve_entity_path(&self, entity: &Document, entity_set: &str, ctx: &Context) -> Result<String> {
        let key = public_key(self.store, entity_set).ok_or_else(|| {
            StoreError::validation(format!("Entity set \"{entity_set}\" has no public key"))
        })?;
        let name = entity.str_field(key).ok_or_else(|| {
            StoreError::validation(format!("Entity has no \"{key}\" value to build a path from"))
        })?;

        let mut names = vec![name.to_string()];
        let mut seen = HashSet::new();
        let mut parent = entity.folder_shortid().map(str::to_string);
        while let Some(shortid) = parent {
            if !seen.insert(shortid.clone()) {
                return Err(StoreError::validation(format!(
                    "Folder \"{shortid}\" is its own ancestor"
                )));
            }
            let folder = self.find_folder(&shortid, ctx).await?.ok_or_else(|| {
                StoreError::validation(format!(
                    "Folder with shortid \"{shortid}\" was not found while resolving the path of \"{name}\""
                ))
            })?;
            names.push(folder.str_field("name").unwrap_or_default().to_string());
            parent = folder.folder_shortid().map(str::to_string);
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    /// Deepest folder the path walks through. Walking stops at the first
    /// segment that is not a folder, since the caller can not know whether
    /// the tail names a folder or another entity.
    pub async fn resolve_folder_from_path(&self, path: &str, ctx: &Context) -> Result<Option<Document>> {
        let segments = normalize_path(path, ctx.current_folder_path.as_deref())?;
        let mut current: Option<Document> = None;
        for segment in &segments {
            match self.child_folder(current.as_ref(), segment, ctx).await? {
                Some(folder) => current = Some(folder),
                None => break,
            }
        }
        Ok(current)
    }

    /// Entity the path points at. Every segment but the last must be a
    /// folder; the last is looked up in `entity_set` or, when `None`, in
    /// every namespaced set.
    pub async fn resolve_entity_from_path(
        &self,
        path: &str,
        entity_set: Option<&str>,
        ctx: &Context,
    ) -> Result<Option<HierarchyItem>> {
        let mut segments = normalize_path(path, ctx.current_folder_path.as_deref())?;
        let Some(last) = segments.pop() else {
            return Ok(None);
        };

        let mut parent: Option<Document> = None;
        for segment in &segments {
            match self.child_folder(parent.as_ref(), segment, ctx).await? {
                Some(folder) => parent = Some(folder),
                None => return Ok(None),
            }
        }
        let scope = parent.as_ref().and_then(|p| p.str_field(super::FOLDER_KEY));

        let sets: Vec<&str> = match entity_set {
            Some(set) if is_namespaced(self.store, set) => vec![set],
            Some(set) => {
                return Err(StoreError::validation(format!(
                    "Entity set \"{set}\" does not participate in folders"
                )))
            }
            None => self.store.model().namespaced_entity_sets(),
        };
        for set in sets {
            let Some(key) = public_key(self.store, set) else {
                continue;
            };
            let query = json!({ "$and": [folder_scope(scope), { key: last.as_str() }] });
            if let Some(entity) = self.store.collection(set)?.find_one(query, ctx).await? {
                return Ok(Some(HierarchyItem::new(set, entity)));
            }
        }
        Ok(None)
    }

    /// Like [`Folders::resolve_entity_from_path`] but only for folders.
    pub async fn resolve_folder_path(&self, path: &str, ctx: &Context) -> Result<Option<Document>> {
        Ok(self
            .resolve_entity_from_path(path, Some(FOLDERS_ENTITY_SET), ctx)
            .await?
            .map(|item| item.entity))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a/b", None).unwrap(), vec!["a", "b"]);
        assert_eq!(normalize_path("//a///b/", None).unwrap(), vec!["a", "b"]);
        assert_eq!(normalize_path("b/c", Some("/a")).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(normalize_path("../x", Some("/a/b")).unwrap(), vec!["a", "x"]);
        assert_eq!(normalize_path("./x", None).unwrap(), vec!["x"]);
        assert_eq!(normalize_path("/my%20report", None).unwrap(), vec!["my report"]);
        assert!(normalize_path("/..", None).is_err());
        assert!(normalize_path("/", None).unwrap().is_empty());
    }

    async fn tree() -> crate::store::DocumentStore {
        let store = store().await;
        insert(&store, "folders", json!({ "name": "a", "shortid": "a" })).await;
        insert(&store, "folders", json!({ "name": "b", "shortid": "b", "folder": { "shortid": "a" } })).await;
        insert(&store, "templates", json!({ "name": "c", "shortid": "c", "folder": { "shortid": "b" } })).await;
        insert(&store, "templates", json!({ "name": "t", "folder": { "shortid": "a" } })).await;
        store
    }

    #[tokio::test]
    async fn test_resolve_entity_path() {
        let store = tree().await;
        let ctx = Context::new();
        let c = store
            .collection("templates")
            .unwrap()
            .find_one(json!({ "shortid": "c" }), &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            store.folders().resolve_entity_path(&c, "templates", &ctx).await.unwrap(),
            "/a/b/c"
        );

        let orphan = doc(json!({ "name": "o", "folder": { "shortid": "gone" } }));
        assert!(store
            .folders()
            .resolve_entity_path(&orphan, "templates", &ctx)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_resolve_folder_from_path() {
        let store = tree().await;
        let ctx = Context::new();
        let folders = store.folders();

        let folder = folders.resolve_folder_from_path("/a/t", &ctx).await.unwrap().unwrap();
        assert_eq!(folder.str_field("shortid"), Some("a"));

        let folder = folders.resolve_folder_from_path("/a/b", &ctx).await.unwrap().unwrap();
        assert_eq!(folder.str_field("shortid"), Some("b"));

        assert!(folders.resolve_folder_from_path("/x/b", &ctx).await.unwrap().is_none());
        assert!(folders.resolve_folder_from_path("/b", &ctx).await.unwrap().is_none());

        let relative = Context::new().with_current_folder("/a");
        let folder = folders.resolve_folder_from_path("b/c", &relative).await.unwrap().unwrap();
        assert_eq!(folder.str_field("shortid"), Some("b"));
    }

    #[tokio::test]
    async fn test_resolve_entity_from_path() {
        let store = tree().await;
        let ctx = Context::new();
        let folders = store.folders();

        let item = folders
            .resolve_entity_from_path("/a/b/c", None, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.entity_set, "templates");
        assert_eq!(item.entity.str_field("shortid"), Some("c"));

        let item = folders
            .resolve_entity_from_path("/a/b", None, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.entity_set, "folders");

        assert!(folders
            .resolve_entity_from_path("/a/x/c", None, &ctx)
            .await
            .unwrap()
            .is_none());
        assert!(folders
            .resolve_entity_from_path("/a/b/c", Some("assets"), &ctx)
            .await
            .unwrap()
            .is_none());
        assert!(folders
            .resolve_entity_from_path("/a", Some("reports"), &ctx)
            .await
            .is_err());

        let nested = Context::new().with_current_folder("/a/b");
        let item = folders
            .resolve_entity_from_path("../t", Some("templates"), &nested)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.entity.str_field("name"), Some("t"));

        assert!(folders.resolve_folder_path("/a/b/c", &ctx).await.unwrap().is_none());
        assert!(folders.resolve_folder_path("/a/b", &ctx).await.unwrap().is_some());
    }
}
