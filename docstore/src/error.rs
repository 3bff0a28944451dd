use crate::document::Document;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Model error: {0}")]
    Model(String),

    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    DuplicatedEntity {
        message: String,
        existing_entity: Box<Document>,
        existing_entity_entity_set: String,
    },

    #[error("Entity not found: {entity_set}/{id}")]
    NotFound { entity_set: String, id: String },

    #[error("Entity set '{0}' not found")]
    UnknownEntitySet(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Invalid query: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation(message.into())
    }

    /// Stable string tag surfaced to callers at the store boundary.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            StoreError::DuplicatedEntity { .. } => Some("DUPLICATED_ENTITY"),
            _ => None,
        }
    }

    /// HTTP-style status attached to caller-facing failures.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            StoreError::Validation(_) | StoreError::DuplicatedEntity { .. } => Some(400),
            StoreError::NotFound { .. } => Some(404),
            _ => None,
        }
    }

    pub fn is_duplicated_entity(&self) -> bool {
        matches!(self, StoreError::DuplicatedEntity { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
