// Open-ended document records and the small helpers every layer needs

use crate::error::{Result, StoreError};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::{Deref, DerefMut};

pub const ID_FIELD: &str = "_id";
pub const CREATION_DATE_FIELD: &str = "creationDate";
pub const MODIFICATION_DATE_FIELD: &str = "modificationDate";
pub const FOLDER_FIELD: &str = "folder";

/// A stored record. Only `_id` and the audit timestamps are mandatory;
/// everything else is whatever the entity type describes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

/// Reference to a parent folder by its human-readable key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRef {
    pub shortid: String,
}

impl Document {
    pub fn new() -> Self {
        Document(Map::new())
    }

    /// Build a document from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Document(map)),
            other => Err(StoreError::validation(format!(
                "Document must be an object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn id(&self) -> Option<&str> {
        self.str_field(ID_FIELD)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// True when the field is absent or explicitly null.
    pub fn is_unset(&self, name: &str) -> bool {
        matches!(self.0.get(name), None | Some(Value::Null))
    }

    /// Parent folder reference; `None` means the document lives at the root.
    pub fn folder(&self) -> Option<FolderRef> {
        match self.0.get(FOLDER_FIELD) {
            Some(value @ Value::Object(_)) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }

    pub fn folder_shortid(&self) -> Option<&str> {
        self.0
            .get(FOLDER_FIELD)
            .and_then(|f| f.get("shortid"))
            .and_then(Value::as_str)
    }

    pub fn set_folder(&mut self, folder: Option<&FolderRef>) {
        self.0.insert(FOLDER_FIELD.to_string(), folder_value(folder));
    }

    /// Shallow merge of a `$set` fragment over this document.
    pub fn merged(&self, set: &Map<String, Value>) -> Document {
        let mut merged = self.clone();
        for (key, value) in set {
            merged.0.insert(key.clone(), value.clone());
        }
        merged
    }

    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }
}

impl Deref for Document {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Document {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Document(map)
    }
}

impl TryFrom<Value> for Document {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self> {
        Document::from_value(value)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}

/// JSON encoding of an optional folder reference (`null` for the root).
pub fn folder_value(folder: Option<&FolderRef>) -> Value {
    match folder {
        Some(f) => serde_json::json!({ "shortid": f.shortid }),
        None => Value::Null,
    }
}

/// Current time in the format used for `creationDate`/`modificationDate`.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
