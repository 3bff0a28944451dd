//! Entity-type, complex-type and entity-set registry.
//!
//! Definitions are registered before the store initializes. At initialization
//! [`Model::normalize`] injects the default fields every entity type carries
//! (`_id`, audit timestamps, the human-readable key) and derives each entity
//! set's public key. After that the model is read-only.

mod parser;
mod types;

pub use parser::{parse_model, parse_model_str};
pub use types::*;

use crate::document::{CREATION_DATE_FIELD, ID_FIELD, MODIFICATION_DATE_FIELD};
use crate::error::{Result, StoreError};
use std::collections::HashMap;

pub const DEFAULT_HUMAN_READABLE_KEY: &str = "shortid";

#[derive(Debug, Clone, Default)]
pub struct Model {
    entity_types: HashMap<String, Fields>,
    complex_types: HashMap<String, Fields>,
    entity_sets: HashMap<String, EntitySetDefinition>,
    internal_entity_sets: HashMap<String, EntitySetDefinition>,
}

/// A field descriptor with its type reference resolved against the registry.
#[derive(Debug, Clone)]
pub struct ResolvedProperty<'a> {
    pub def: &'a FieldDescriptor,
    pub is_collection: bool,
    pub sub_type: PropertyType<'a>,
}

#[derive(Debug, Clone)]
pub enum PropertyType<'a> {
    Primitive(Primitive),
    Complex { name: &'a str, fields: &'a Fields },
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or extend) an entity type. Fields of an already registered
    /// type are merged, later registrations winning per field.
    pub fn register_entity_type(&mut self, name: &str, fields: Fields) {
        self.entity_types
            .entry(name.to_string())
            .or_default()
            .extend(fields);
    }

    pub fn register_complex_type(&mut self, name: &str, fields: Fields) {
        self.complex_types
            .entry(name.to_string())
            .or_default()
            .extend(fields);
    }

    /// Register an entity set. Public and internal sets are disjoint namespaces.
    pub fn register_entity_set(&mut self, name: &str, def: EntitySetDefinition) -> Result<()> {
        let (target, other, other_kind) = if def.internal {
            (&mut self.internal_entity_sets, &self.entity_sets, "public")
        } else {
            (&mut self.entity_sets, &self.internal_entity_sets, "internal")
        };
        if other.contains_key(name) {
            return Err(StoreError::Model(format!(
                "Entity set '{name}' is already registered as {other_kind}"
            )));
        }
        target.insert(name.to_string(), def);
        Ok(())
    }

    /// Bulk registration of a parsed model file.
    pub fn register_definition(&mut self, definition: ModelDefinition) -> Result<()> {
        for (name, fields) in definition.complex_types {
            self.register_complex_type(&name, fields);
        }
        for (name, fields) in definition.entity_types {
            self.register_entity_type(&name, fields);
        }
        let mut sets: Vec<_> = definition.entity_sets.into_iter().collect();
        sets.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, def) in sets {
            self.register_entity_set(&name, def)?;
        }
        Ok(())
    }

    pub fn entity_type(&self, name: &str) -> Option<&Fields> {
        self.entity_types.get(name)
    }

    pub fn entity_type_mut(&mut self, name: &str) -> Option<&mut Fields> {
        self.entity_types.get_mut(name)
    }

    pub fn complex_type(&self, name: &str) -> Option<&Fields> {
        self.complex_types.get(name)
    }

    /// Public entity set by name.
    pub fn entity_set(&self, name: &str) -> Option<&EntitySetDefinition> {
        self.entity_sets.get(name)
    }

    pub fn internal_entity_set(&self, name: &str) -> Option<&EntitySetDefinition> {
        self.internal_entity_sets.get(name)
    }

    /// Public or internal entity set by name.
    pub fn any_entity_set(&self, name: &str) -> Option<&EntitySetDefinition> {
        self.entity_sets
            .get(name)
            .or_else(|| self.internal_entity_sets.get(name))
    }

    pub fn entity_sets(&self) -> &HashMap<String, EntitySetDefinition> {
        &self.entity_sets
    }

    pub fn internal_entity_sets(&self) -> &HashMap<String, EntitySetDefinition> {
        &self.internal_entity_sets
    }

    /// Names of the public entity sets participating in the folder namespace, sorted.
    pub fn namespaced_entity_sets(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .entity_sets
            .iter()
            .filter(|(_, def)| def.split_into_directories)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Fields of the entity type backing the given set.
    pub fn entity_set_fields(&self, entity_set: &str) -> Option<&Fields> {
        self.any_entity_set(entity_set)
            .and_then(|def| self.entity_types.get(&def.entity_type))
    }

    /// Normalize `Collection(X)` and complex-type references into a resolved property.
    pub fn resolve_property_definition<'a>(
        &'a self,
        def: &'a FieldDescriptor,
    ) -> Result<ResolvedProperty<'a>> {
        let (is_collection, inner) = match &def.field_type {
            TypeRef::Collection(inner) => (true, inner.as_ref()),
            other => (false, other),
        };
        let sub_type = match inner {
            TypeRef::Primitive(p) => PropertyType::Primitive(*p),
            TypeRef::Named(name) => {
                let (name, fields) = self
                    .complex_types
                    .get_key_value(name)
                    .or_else(|| self.entity_types.get_key_value(name))
                    .ok_or_else(|| {
                        StoreError::Model(format!("Type '{name}' is not registered"))
                    })?;
                PropertyType::Complex {
                    name: name.as_str(),
                    fields,
                }
            }
            TypeRef::Collection(_) => {
                return Err(StoreError::Model(format!(
                    "Nested collections are not supported: {}",
                    def.field_type
                )))
            }
        };
        Ok(ResolvedProperty {
            def,
            is_collection,
            sub_type,
        })
    }

    /// Inject default fields, derive public keys and check every type reference.
    pub(crate) fn normalize(&mut self) -> Result<()> {
        let mut set_names: Vec<(String, bool)> = self
            .entity_sets
            .keys()
            .map(|n| (n.clone(), false))
            .chain(self.internal_entity_sets.keys().map(|n| (n.clone(), true)))
            .collect();
        set_names.sort();

        for (set_name, internal) in set_names {
            let sets = if internal {
                &mut self.internal_entity_sets
            } else {
                &mut self.entity_sets
            };
            let Some(set) = sets.get_mut(&set_name) else {
                continue;
            };
            let fields = self.entity_types.get_mut(&set.entity_type).ok_or_else(|| {
                StoreError::Model(format!(
                    "Entity set '{set_name}' references unknown entity type '{}'",
                    set.entity_type
                ))
            })?;

            let keys = fields.values().filter(|f| f.key).count();
            if keys > 1 {
                return Err(StoreError::Model(format!(
                    "Entity type '{}' declares more than one key field",
                    set.entity_type
                )));
            }
            if !fields.contains_key(ID_FIELD) {
                let id = FieldDescriptor::string();
                fields.insert(ID_FIELD.to_string(), if keys == 0 { id.key() } else { id });
            }
            for stamp in [CREATION_DATE_FIELD, MODIFICATION_DATE_FIELD] {
                fields.entry(stamp.to_string()).or_insert_with(|| {
                    FieldDescriptor::of(TypeRef::Primitive(Primitive::DateTimeOffset))
                });
            }

            let hrk = set
                .human_readable_key
                .get_or_insert_with(|| DEFAULT_HUMAN_READABLE_KEY.to_string())
                .clone();
            fields.entry(hrk).or_insert_with(FieldDescriptor::string);

            let public_keys: Vec<&String> = fields
                .iter()
                .filter(|(_, f)| f.public_key)
                .map(|(name, _)| name)
                .collect();
            if public_keys.len() > 1 {
                return Err(StoreError::Model(format!(
                    "Entity type '{}' declares more than one publicKey field",
                    set.entity_type
                )));
            }
            set.entity_type_public_key = public_keys.first().map(|s| s.to_string());
        }

        for fields in self.entity_types.values().chain(self.complex_types.values()) {
            for def in fields.values() {
                self.resolve_property_definition(def)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, FieldDescriptor)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_internal_and_public_namespaces_are_disjoint() {
        let mut model = Model::new();
        model.register_entity_type("SettingType", Fields::new());
        model
            .register_entity_set("settings", EntitySetDefinition::new("SettingType"))
            .unwrap();
        let err = model
            .register_entity_set("settings", EntitySetDefinition::new("SettingType").internal())
            .unwrap_err();
        assert!(err.to_string().contains("public"));

        model
            .register_entity_set("locks", EntitySetDefinition::new("SettingType").internal())
            .unwrap();
        assert!(model
            .register_entity_set("locks", EntitySetDefinition::new("SettingType"))
            .is_err());
    }

    #[test]
    fn test_normalize_adds_defaults_and_public_key() {
        let mut model = Model::new();
        model.register_entity_type(
            "TemplateType",
            fields(&[("name", FieldDescriptor::string().public_key())]),
        );
        model
            .register_entity_set(
                "templates",
                EntitySetDefinition::new("TemplateType").split_into_directories(),
            )
            .unwrap();
        model.normalize().unwrap();

        let t = model.entity_type("TemplateType").unwrap();
        assert!(t["_id"].key);
        assert!(t.contains_key("creationDate"));
        assert!(t.contains_key("modificationDate"));
        assert!(t.contains_key("shortid"));

        let set = model.entity_set("templates").unwrap();
        assert_eq!(set.human_readable_key.as_deref(), Some("shortid"));
        assert_eq!(set.entity_type_public_key.as_deref(), Some("name"));
        assert_eq!(model.namespaced_entity_sets(), vec!["templates"]);
    }

    #[test]
    fn test_explicit_human_readable_key_is_kept() {
        let mut model = Model::new();
        model.register_entity_type("SettingType", fields(&[("key", FieldDescriptor::string())]));
        model
            .register_entity_set(
                "settings",
                EntitySetDefinition::new("SettingType").human_readable_key("key"),
            )
            .unwrap();
        model.normalize().unwrap();
        assert!(!model.entity_type("SettingType").unwrap().contains_key("shortid"));
    }

    #[test]
    fn test_normalize_rejects_two_public_keys() {
        let mut model = Model::new();
        model.register_entity_type(
            "T",
            fields(&[
                ("a", FieldDescriptor::string().public_key()),
                ("b", FieldDescriptor::string().public_key()),
            ]),
        );
        model.register_entity_set("ts", EntitySetDefinition::new("T")).unwrap();
        assert!(model.normalize().is_err());
    }

    #[test]
    fn test_normalize_rejects_unknown_types() {
        let mut model = Model::new();
        model.register_entity_set("ts", EntitySetDefinition::new("Missing")).unwrap();
        assert!(model.normalize().is_err());

        let mut model = Model::new();
        model.register_entity_type(
            "T",
            fields(&[("a", FieldDescriptor::of(TypeRef::Named("Nope".into())))]),
        );
        model.register_entity_set("ts", EntitySetDefinition::new("T")).unwrap();
        assert!(model.normalize().is_err());
    }

    #[test]
    fn test_resolve_property_definition() {
        let mut model = Model::new();
        model.register_complex_type(
            "ScriptRefType",
            fields(&[("shortid", FieldDescriptor::string().reference_to("scripts"))]),
        );
        let def = FieldDescriptor::of("Collection(ScriptRefType)".parse().unwrap());
        let resolved = model.resolve_property_definition(&def).unwrap();
        assert!(resolved.is_collection);
        match resolved.sub_type {
            PropertyType::Complex { name, fields } => {
                assert_eq!(name, "ScriptRefType");
                assert!(fields.contains_key("shortid"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let def = FieldDescriptor::string();
        let resolved = model.resolve_property_definition(&def).unwrap();
        assert!(!resolved.is_collection);
        assert!(matches!(
            resolved.sub_type,
            PropertyType::Primitive(Primitive::String)
        ));
    }

    #[test]
    fn test_register_entity_type_merges_fields() {
        let mut model = Model::new();
        model.register_entity_type("T", fields(&[("a", FieldDescriptor::string())]));
        model.register_entity_type("T", fields(&[("b", FieldDescriptor::string())]));
        let t = model.entity_type("T").unwrap();
        assert!(t.contains_key("a") && t.contains_key("b"));
    }
}
