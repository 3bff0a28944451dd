use crate::document::json_type_name;
use crate::error::{Result, StoreError};
use crate::model::{Fields, Model, Primitive, PropertyType};
use serde_json::{Map, Value};

/// Result of validating a document against its entity type
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Validate a document (or a `$set` fragment) against entity type fields.
/// Only present, non-null values are checked; fields the type does not
/// declare are reported as warnings since documents are open records.
pub fn validate_document(model: &Model, fields: &Fields, data: &Map<String, Value>) -> ValidationResult {
    let mut result = ValidationResult::default();
    validate_object(model, fields, data, "", &mut result);
    result
}

fn validate_object(
    model: &Model,
    fields: &Fields,
    data: &Map<String, Value>,
    prefix: &str,
    result: &mut ValidationResult,
) {
    for (name, value) in data {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        let Some(def) = fields.get(name) else {
            if !name.starts_with('$') && !name.starts_with("__") {
                result
                    .warnings
                    .push(format!("Field '{path}' is not declared by the entity type"));
            }
            continue;
        };
        if value.is_null() {
            continue;
        }
        let resolved = match model.resolve_property_definition(def) {
            Ok(r) => r,
            Err(e) => {
                result.errors.push(format!("Field '{path}': {e}"));
                continue;
            }
        };
        if resolved.is_collection {
            let Some(items) = value.as_array() else {
                result.errors.push(format!(
                    "Field '{path}' expected array, got {}",
                    json_type_name(value)
                ));
                continue;
            };
            for (i, item) in items.iter().enumerate() {
                validate_value(model, &resolved.sub_type, item, &format!("{path}[{i}]"), result);
            }
        } else {
            validate_value(model, &resolved.sub_type, value, &path, result);
        }
    }
}

fn validate_value(
    model: &Model,
    sub_type: &PropertyType<'_>,
    value: &Value,
    path: &str,
    result: &mut ValidationResult,
) {
    if value.is_null() {
        return;
    }
    match sub_type {
        PropertyType::Primitive(p) => {
            if let Some(expected) = primitive_mismatch(*p, value) {
                result.errors.push(format!(
                    "Field '{path}' expected {expected}, got {}",
                    json_type_name(value)
                ));
            }
        }
        PropertyType::Complex { name, fields } => match value.as_object() {
            Some(obj) => validate_object(model, fields, obj, path, result),
            None => result.errors.push(format!(
                "Field '{path}' expected object (type '{name}'), got {}",
                json_type_name(value)
            )),
        },
    }
}

/// Returns a description of the expected shape when `value` does not fit `p`.
fn primitive_mismatch(p: Primitive, value: &Value) -> Option<&'static str> {
    let ok = match p {
        Primitive::String | Primitive::Binary => value.is_string(),
        Primitive::Boolean => value.is_boolean(),
        Primitive::Int32 => value
            .as_i64()
            .map(|n| i32::try_from(n).is_ok())
            .unwrap_or(false),
        Primitive::Int64 => value.is_i64() || value.is_u64(),
        Primitive::Double | Primitive::Decimal => value.is_number(),
        Primitive::DateTimeOffset => value
            .as_str()
            .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
            .unwrap_or(false),
    };
    if ok {
        return None;
    }
    Some(match p {
        Primitive::String => "string",
        Primitive::Binary => "base64 string",
        Primitive::Boolean => "boolean",
        Primitive::Int32 => "32-bit integer",
        Primitive::Int64 => "integer",
        Primitive::Double | Primitive::Decimal => "number",
        Primitive::DateTimeOffset => "RFC 3339 date string",
    })
}

/// Validate and fail with a 400-class error listing every problem.
/// Returns the warnings on success.
pub fn ensure_valid(model: &Model, fields: &Fields, data: &Map<String, Value>) -> Result<Vec<String>> {
    let result = validate_document(model, fields, data);
    if !result.is_ok() {
        return Err(StoreError::Validation(format!(
            "Document validation failed:\n  - {}",
            result.errors.join("\n  - ")
        )));
    }
    Ok(result.warnings)
}

/// Check that a public-key value is usable as a path segment.
pub fn validate_entity_name(value: Option<&Value>) -> Result<()> {
    let name = match value {
        Some(Value::String(s)) => s,
        None | Some(Value::Null) => {
            return Err(StoreError::validation("Entity name can not be empty"))
        }
        Some(other) => {
            return Err(StoreError::validation(format!(
                "Entity name must be a string, got {}",
                json_type_name(other)
            )))
        }
    };
    if name.trim().is_empty() {
        return Err(StoreError::validation("Entity name can not be empty"));
    }
    if name.contains('/') {
        return Err(StoreError::validation(format!(
            "Entity name \"{name}\" can not contain the path separator \"/\""
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(StoreError::validation(format!(
            "Entity name \"{}\" can not contain control characters",
            name.escape_debug()
        )));
    }
    if name == "." || name == ".." {
        return Err(StoreError::validation(format!(
            "Entity name \"{name}\" is reserved for path navigation"
        )));
    }
    Ok(())
}
