use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Field name -> descriptor. Ordered so public-key detection is deterministic.
pub type Fields = BTreeMap<String, FieldDescriptor>;

/// Top-level model definition parsed from a model YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDefinition {
    #[serde(default)]
    pub entity_types: HashMap<String, Fields>,
    #[serde(default)]
    pub complex_types: HashMap<String, Fields>,
    #[serde(default)]
    pub entity_sets: HashMap<String, EntitySetDefinition>,
}

/// Definition of a single entity set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySetDefinition {
    pub entity_type: String,
    #[serde(default)]
    pub human_readable_key: Option<String>,
    #[serde(default)]
    pub split_into_directories: bool,
    #[serde(default = "default_exportable")]
    pub exportable: bool,
    #[serde(default)]
    pub internal: bool,
    /// Derived at store initialization from the field marked `publicKey`.
    #[serde(skip)]
    pub entity_type_public_key: Option<String>,
}

fn default_exportable() -> bool {
    true
}

impl EntitySetDefinition {
    pub fn new(entity_type: &str) -> Self {
        EntitySetDefinition {
            entity_type: entity_type.to_string(),
            human_readable_key: None,
            split_into_directories: false,
            exportable: true,
            internal: false,
            entity_type_public_key: None,
        }
    }

    /// Mark the set as participating in the folder namespace.
    pub fn split_into_directories(mut self) -> Self {
        self.split_into_directories = true;
        self
    }

    pub fn human_readable_key(mut self, field: &str) -> Self {
        self.human_readable_key = Some(field.to_string());
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn not_exportable(mut self) -> Self {
        self.exportable = false;
        self
    }
}

/// Definition of a single field in an entity or complex type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    #[serde(rename = "type")]
    pub field_type: TypeRef,
    #[serde(default)]
    pub key: bool,
    #[serde(default)]
    pub public_key: bool,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub document: Option<DocumentHint>,
    #[serde(default)]
    pub reference_to: Option<String>,
}

impl FieldDescriptor {
    pub fn of(field_type: TypeRef) -> Self {
        FieldDescriptor {
            field_type,
            key: false,
            public_key: false,
            encrypted: false,
            document: None,
            reference_to: None,
        }
    }

    pub fn string() -> Self {
        Self::of(TypeRef::Primitive(Primitive::String))
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn public_key(mut self) -> Self {
        self.public_key = true;
        self
    }

    pub fn reference_to(mut self, entity_set: &str) -> Self {
        self.reference_to = Some(entity_set.to_string());
        self
    }

    pub fn document(mut self, extension: &str) -> Self {
        self.document = Some(DocumentHint {
            extension: extension.to_string(),
        });
        self
    }
}

/// Marks a field as holding a standalone document (e.g. template content)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentHint {
    pub extension: String,
}

/// Primitive type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Primitive {
    #[serde(rename = "Edm.String")]
    String,
    #[serde(rename = "Edm.Boolean")]
    Boolean,
    #[serde(rename = "Edm.Int32")]
    Int32,
    #[serde(rename = "Edm.Int64")]
    Int64,
    #[serde(rename = "Edm.Double")]
    Double,
    #[serde(rename = "Edm.Decimal")]
    Decimal,
    #[serde(rename = "Edm.DateTimeOffset")]
    DateTimeOffset,
    #[serde(rename = "Edm.Binary")]
    Binary,
}

impl Primitive {
    pub fn tag(&self) -> &'static str {
        match self {
            Primitive::String => "Edm.String",
            Primitive::Boolean => "Edm.Boolean",
            Primitive::Int32 => "Edm.Int32",
            Primitive::Int64 => "Edm.Int64",
            Primitive::Double => "Edm.Double",
            Primitive::Decimal => "Edm.Decimal",
            Primitive::DateTimeOffset => "Edm.DateTimeOffset",
            Primitive::Binary => "Edm.Binary",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "Edm.String" => Primitive::String,
            "Edm.Boolean" => Primitive::Boolean,
            "Edm.Int32" => Primitive::Int32,
            "Edm.Int64" => Primitive::Int64,
            "Edm.Double" => Primitive::Double,
            "Edm.Decimal" => Primitive::Decimal,
            "Edm.DateTimeOffset" => Primitive::DateTimeOffset,
            "Edm.Binary" => Primitive::Binary,
            _ => return None,
        })
    }
}

/// A field's type: a primitive tag, `Collection(<type>)`, or a named complex/entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeRef {
    Primitive(Primitive),
    Collection(Box<TypeRef>),
    Named(String),
}

impl FromStr for TypeRef {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("type must not be empty".to_string());
        }
        if let Some(inner) = s
            .strip_prefix("Collection(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return Ok(TypeRef::Collection(Box::new(inner.parse()?)));
        }
        if let Some(primitive) = Primitive::from_tag(s) {
            return Ok(TypeRef::Primitive(primitive));
        }
        if s.starts_with("Edm.") {
            return Err(format!("unknown primitive type '{s}'"));
        }
        Ok(TypeRef::Named(s.to_string()))
    }
}

impl TryFrom<String> for TypeRef {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TypeRef> for String {
    fn from(value: TypeRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Primitive(p) => f.write_str(p.tag()),
            TypeRef::Collection(inner) => write!(f, "Collection({inner})"),
            TypeRef::Named(name) => f.write_str(name),
        }
    }
}
