//! Ordered, named async hooks fired before every collection operation.
//!
//! Listeners run strictly in chain order. The first one to fail aborts the
//! operation and the remaining listeners never run. Effects already applied
//! by earlier listeners are not undone.

use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::query::{FindOptions, Update, UpdateOptions};
use crate::store::DocumentStore;
use crate::transaction::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

#[async_trait]
pub trait Listener<E>: Send + Sync {
    async fn call(&self, store: &DocumentStore, event: &mut E, ctx: &Context) -> Result<()>;
}

/// Payload of the `before_find` chain.
#[derive(Debug, Clone)]
pub struct FindEvent {
    pub entity_set: String,
    pub query: Value,
    pub options: FindOptions,
}

/// Payload of the `before_insert` chain. Listeners may mutate `doc`.
#[derive(Debug, Clone)]
pub struct InsertEvent {
    pub entity_set: String,
    pub doc: Document,
}

/// Payload of the `before_update` chain. Listeners may mutate `update`.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub entity_set: String,
    pub query: Value,
    pub update: Update,
    pub options: UpdateOptions,
}

/// Payload of the `before_remove` chain.
#[derive(Debug, Clone)]
pub struct RemoveEvent {
    pub entity_set: String,
    pub query: Value,
}

type Entry<E> = (String, Arc<dyn Listener<E>>);

pub struct ListenerChain<E> {
    name: String,
    listeners: RwLock<Vec<Entry<E>>>,
}

impl<E: Send + 'static> ListenerChain<E> {
    pub fn new(name: impl Into<String>) -> Self {
        ListenerChain {
            name: name.into(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a listener at the end of the chain.
    pub fn add(&self, key: &str, listener: impl Listener<E> + 'static) {
        self.listeners
            .write()
            .push((key.to_string(), Arc::new(listener)));
    }

    pub fn insert_before(
        &self,
        before: &str,
        key: &str,
        listener: impl Listener<E> + 'static,
    ) -> Result<()> {
        self.insert_at(before, 0, key, Arc::new(listener))
    }

    pub fn insert_after(
        &self,
        after: &str,
        key: &str,
        listener: impl Listener<E> + 'static,
    ) -> Result<()> {
        self.insert_at(after, 1, key, Arc::new(listener))
    }

    fn insert_at(
        &self,
        anchor: &str,
        offset: usize,
        key: &str,
        listener: Arc<dyn Listener<E>>,
    ) -> Result<()> {
        let mut listeners = self.listeners.write();
        let position = listeners
            .iter()
            .position(|(k, _)| k == anchor)
            .ok_or_else(|| {
                StoreError::Other(format!(
                    "Listener '{anchor}' is not registered in chain '{}'",
                    self.name
                ))
            })?;
        listeners.insert(position + offset, (key.to_string(), listener));
        Ok(())
    }

    /// Remove every listener registered under `key`. Returns whether any was removed.
    pub fn remove(&self, key: &str) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(k, _)| k != key);
        listeners.len() != before
    }

    pub fn keys(&self) -> Vec<String> {
        self.listeners.read().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Run every listener in order, stopping at the first failure.
    pub async fn fire(&self, store: &DocumentStore, event: &mut E, ctx: &Context) -> Result<()> {
        let snapshot: Vec<Entry<E>> = self.listeners.read().clone();
        for (key, listener) in snapshot {
            if let Err(e) = listener.call(store, event, ctx).await {
                log::debug!("{} listener '{}' rejected: {}", self.name, key, e);
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use parking_lot::Mutex;

    struct Record {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl Listener<RemoveEvent> for Record {
        async fn call(&self, _: &DocumentStore, _: &mut RemoveEvent, _: &Context) -> Result<()> {
            self.log.lock().push(self.label);
            if self.fail {
                return Err(StoreError::validation(format!("{} failed", self.label)));
            }
            Ok(())
        }
    }

    fn record(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>, fail: bool) -> Record {
        Record {
            label,
            log: log.clone(),
            fail,
        }
    }

    fn event() -> RemoveEvent {
        RemoveEvent {
            entity_set: "templates".into(),
            query: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_fire_runs_in_order_and_short_circuits() {
        let store = DocumentStore::memory(Default::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ListenerChain::<RemoveEvent>::new("beforeRemove");
        chain.add("a", record("a", &log, false));
        chain.add("b", record("b", &log, true));
        chain.add("c", record("c", &log, false));

        let err = chain
            .fire(&store, &mut event(), &Context::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "b failed");
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_insert_before_after_and_remove() {
        let store = DocumentStore::memory(Default::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ListenerChain::<RemoveEvent>::new("beforeRemove");
        chain.add("b", record("b", &log, false));
        chain.insert_before("b", "a", record("a", &log, false)).unwrap();
        chain.insert_after("b", "c", record("c", &log, false)).unwrap();
        assert_eq!(chain.keys(), vec!["a", "b", "c"]);
        assert!(chain.insert_before("missing", "x", record("x", &log, false)).is_err());

        assert!(chain.remove("b"));
        assert!(!chain.remove("b"));
        chain.fire(&store, &mut event(), &Context::default()).await.unwrap();
        assert_eq!(*log.lock(), vec!["a", "c"]);
        assert_eq!(chain.len(), 2);
    }
}
