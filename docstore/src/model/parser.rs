use super::types::ModelDefinition;
use crate::error::Result;
use std::path::Path;

/// Parse a model YAML file into a ModelDefinition
pub fn parse_model(path: &Path) -> Result<ModelDefinition> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| crate::StoreError::Model(format!("cannot read {}: {e}", path.display())))?;
    parse_model_str(&content)
}

/// Parse a model YAML string into a ModelDefinition
pub fn parse_model_str(content: &str) -> Result<ModelDefinition> {
    let model: ModelDefinition = serde_yaml::from_str(content)?;
    Ok(model)
}
