//! Storage provider contract.
//!
//! Any backend (the bundled memory provider or a persistent one) implements
//! [`Provider`]. Collections never bypass it; validation and listeners run
//! before a call reaches the provider.

pub mod memory;

pub use memory::MemoryProvider;

use crate::document::Document;
use crate::error::Result;
use crate::model::Model;
use crate::query::{FindOptions, Update};
use crate::transaction::TransactionHandle;
use async_trait::async_trait;
use serde_json::Value;

/// Per-call provider options.
#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    /// Active transaction, if the call runs inside one.
    pub transaction: Option<TransactionHandle>,
    /// For `update`: insert the `$set` document when nothing matches.
    pub upsert: bool,
}

impl ProviderOptions {
    pub fn in_transaction(transaction: Option<TransactionHandle>) -> Self {
        ProviderOptions {
            transaction,
            upsert: false,
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Prepare storage for every entity set of the (normalized) model.
    async fn load(&self, model: &Model) -> Result<()>;

    async fn begin_transaction(&self) -> Result<TransactionHandle>;

    async fn commit_transaction(&self, tran: &TransactionHandle) -> Result<()>;

    async fn rollback_transaction(&self, tran: &TransactionHandle) -> Result<()>;

    /// Remove every document of every entity set.
    async fn drop_all(&self, opts: &ProviderOptions) -> Result<()>;

    async fn find(
        &self,
        entity_set: &str,
        query: &Value,
        options: &FindOptions,
        opts: &ProviderOptions,
    ) -> Result<Vec<Document>>;

    /// Number of documents matching `query`.
    async fn count(&self, entity_set: &str, query: &Value, opts: &ProviderOptions) -> Result<usize> {
        Ok(self
            .find(entity_set, query, &FindOptions::default(), opts)
            .await?
            .len())
    }

    /// Insert a document, assigning `_id` when missing. Returns the stored document.
    async fn insert(&self, entity_set: &str, doc: Document, opts: &ProviderOptions) -> Result<Document>;

    /// Apply `$set` to every matching document. Returns the matched count.
    async fn update(
        &self,
        entity_set: &str,
        query: &Value,
        update: &Update,
        opts: &ProviderOptions,
    ) -> Result<usize>;

    async fn remove(&self, entity_set: &str, query: &Value, opts: &ProviderOptions) -> Result<()>;
}
