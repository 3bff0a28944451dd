//! Store configuration.
//!
//! Options are validated once and then handed to the store by value; the
//! store never mutates them afterwards.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// Strategy used to generate `_id` values for inserted documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoIdStrategy {
    #[default]
    Nanoid,
    Uuid,
    Ulid,
}

impl AutoIdStrategy {
    pub fn generate(&self) -> String {
        match self {
            AutoIdStrategy::Nanoid => nanoid::nanoid!(),
            AutoIdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            AutoIdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
        }
    }
}

impl std::str::FromStr for AutoIdStrategy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "nanoid" => Ok(AutoIdStrategy::Nanoid),
            "uuid" => Ok(AutoIdStrategy::Uuid),
            "ulid" => Ok(AutoIdStrategy::Ulid),
            other => Err(StoreError::Config(format!("Unknown id strategy '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreOptions {
    pub id_strategy: AutoIdStrategy,
    /// Length of generated human-readable keys (`shortid`).
    pub human_readable_key_length: usize,
    /// Names namespaced entities may not take at the root, besides the
    /// names of non-namespaced entity sets.
    pub reserved_names: Vec<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            id_strategy: AutoIdStrategy::Nanoid,
            human_readable_key_length: 7,
            reserved_names: vec!["storage".to_string()],
        }
    }
}

impl StoreOptions {
    /// Load options from `DOCSTORE_*` environment variables, defaulting the rest.
    pub fn from_env() -> Result<Self> {
        let mut options = StoreOptions::default();
        if let Ok(strategy) = std::env::var("DOCSTORE_ID_STRATEGY") {
            options.id_strategy = strategy.parse()?;
        }
        if let Ok(length) = std::env::var("DOCSTORE_HUMAN_READABLE_KEY_LENGTH") {
            options.human_readable_key_length = length.parse().map_err(|_| {
                StoreError::Config("Invalid DOCSTORE_HUMAN_READABLE_KEY_LENGTH value".to_string())
            })?;
        }
        if let Ok(names) = std::env::var("DOCSTORE_RESERVED_NAMES") {
            options.reserved_names = names
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        options.validate()
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let options: StoreOptions = serde_yaml::from_str(content)?;
        options.validate()
    }

    pub fn validate(self) -> Result<Self> {
        if !(4..=64).contains(&self.human_readable_key_length) {
            return Err(StoreError::Config(format!(
                "humanReadableKeyLength must be between 4 and 64, got {}",
                self.human_readable_key_length
            )));
        }
        if self.reserved_names.iter().any(|n| n.trim().is_empty()) {
            return Err(StoreError::Config(
                "reservedNames must not contain empty names".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn generate_id(&self) -> String {
        self.id_strategy.generate()
    }

    pub fn generate_human_readable_key(&self) -> String {
        nanoid::nanoid!((self.human_readable_key_length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = StoreOptions::default().validate().unwrap();
        assert_eq!(options.human_readable_key_length, 7);
        assert_eq!(options.reserved_names, vec!["storage"]);
        assert_eq!(options.generate_human_readable_key().len(), 7);
    }

    #[test]
    fn test_from_yaml() {
        let options =
            StoreOptions::from_yaml_str("idStrategy: uuid\nhumanReadableKeyLength: 10\n").unwrap();
        assert_eq!(options.id_strategy, AutoIdStrategy::Uuid);
        assert_eq!(options.human_readable_key_length, 10);
        assert_eq!(options.reserved_names, vec!["storage"]);
        assert_eq!(options.generate_id().len(), 36);
    }

    #[test]
    fn test_validate_rejects_bad_length() {
        assert!(StoreOptions::from_yaml_str("humanReadableKeyLength: 1").is_err());
    }

    #[test]
    fn test_id_strategies_produce_distinct_ids() {
        for strategy in [AutoIdStrategy::Nanoid, AutoIdStrategy::Uuid, AutoIdStrategy::Ulid] {
            assert_ne!(strategy.generate(), strategy.generate());
        }
        assert!("snowflake".parse::<AutoIdStrategy>().is_err());
    }
}
