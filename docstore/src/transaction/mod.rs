//! Request context and the registry mapping transaction ids to provider handles.

use crate::error::{Result, StoreError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn generate() -> Self {
        TransactionId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-level transaction handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHandle {
    pub id: TransactionId,
}

/// Per-request state threaded through every store call.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Active store transaction, set by `begin_transaction`.
    pub transaction: Option<TransactionId>,
    /// Folder path that relative entity paths resolve against.
    pub current_folder_path: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_current_folder(mut self, path: &str) -> Self {
        self.current_folder_path = Some(path.to_string());
        self
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}

#[derive(Debug, Default)]
pub struct TransactionRegistry {
    active: RwLock<HashMap<TransactionId, TransactionHandle>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: TransactionHandle) {
        self.active.write().insert(handle.id.clone(), handle);
    }

    /// Provider handle for the context's transaction, if it carries one.
    pub fn resolve(&self, ctx: &Context) -> Result<Option<TransactionHandle>> {
        let Some(id) = &ctx.transaction else {
            return Ok(None);
        };
        self.active
            .read()
            .get(id)
            .cloned()
            .map(Some)
            .ok_or_else(|| StoreError::Transaction(format!("Transaction {id} is not active")))
    }

    /// Detach the context's transaction from the registry.
    pub fn take(&self, ctx: &Context) -> Result<TransactionHandle> {
        let id = ctx
            .transaction
            .as_ref()
            .ok_or_else(|| StoreError::Transaction("No active transaction in context".into()))?;
        self.active
            .write()
            .remove(id)
            .ok_or_else(|| StoreError::Transaction(format!("Transaction {id} is not active")))
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_without_transaction() {
        let registry = TransactionRegistry::new();
        assert_eq!(registry.resolve(&Context::new()).unwrap(), None);
    }

    #[test]
    fn test_register_resolve_take() {
        let registry = TransactionRegistry::new();
        let handle = TransactionHandle {
            id: TransactionId::generate(),
        };
        registry.register(handle.clone());

        let ctx = Context {
            transaction: Some(handle.id.clone()),
            ..Default::default()
        };
        assert_eq!(registry.resolve(&ctx).unwrap(), Some(handle.clone()));
        assert_eq!(registry.take(&ctx).unwrap(), handle);
        assert!(registry.is_empty());
        assert!(registry.resolve(&ctx).is_err());
        assert!(registry.take(&ctx).is_err());
    }
}
