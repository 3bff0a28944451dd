use super::{Provider, ProviderOptions};
use crate::config::AutoIdStrategy;
use crate::document::{Document, ID_FIELD};
use crate::error::{Result, StoreError};
use crate::model::Model;
use crate::query::{self, FindOptions, Update};
use crate::transaction::{TransactionHandle, TransactionId};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// How a stored document came to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    Committed,
    /// Inserted by a transaction that has not committed yet; visible only to it.
    PendingInsert { owner: TransactionId },
}

/// A transaction's not-yet-committed intent on a committed document.
#[derive(Debug, Clone)]
enum Intent {
    Update(Document),
    Remove,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    value: Document,
    origin: Origin,
    intents: BTreeMap<TransactionId, Intent>,
}

impl StoredDocument {
    fn new(value: Document, tran: Option<&TransactionId>) -> Self {
        StoredDocument {
            value,
            origin: match tran {
                Some(owner) => Origin::PendingInsert {
                    owner: owner.clone(),
                },
                None => Origin::Committed,
            },
            intents: BTreeMap::new(),
        }
    }

    fn owned_by(&self, tran: Option<&TransactionId>) -> bool {
        matches!((&self.origin, tran), (Origin::PendingInsert { owner }, Some(t)) if owner == t)
    }

    /// The version of this document the given transaction (or no transaction) sees.
    fn visible(&self, tran: Option<&TransactionId>) -> Option<&Document> {
        if let Some(t) = tran {
            match self.intents.get(t) {
                Some(Intent::Remove) => return None,
                Some(Intent::Update(candidate)) => return Some(candidate),
                None => {}
            }
        }
        match &self.origin {
            Origin::Committed => Some(&self.value),
            Origin::PendingInsert { .. } if self.owned_by(tran) => Some(&self.value),
            Origin::PendingInsert { .. } => None,
        }
    }

    /// Record an update made by `tran` (or apply it directly outside a transaction).
    fn apply_update(&mut self, tran: Option<&TransactionId>, updated: Document) {
        match tran {
            Some(t) if !self.owned_by(tran) => {
                self.intents.insert(t.clone(), Intent::Update(updated));
            }
            _ => self.value = updated,
        }
    }

    /// Record a removal by `tran`. Returns true when the document must be spliced out now.
    fn apply_remove(&mut self, tran: Option<&TransactionId>) -> bool {
        match tran {
            Some(t) if !self.owned_by(tran) => {
                self.intents.insert(t.clone(), Intent::Remove);
                false
            }
            _ => true,
        }
    }

    /// Apply `tran`'s effects. `None` means the document is gone.
    fn commit(mut self, tran: &TransactionId) -> Option<Self> {
        if self.owned_by(Some(tran)) {
            self.origin = Origin::Committed;
        }
        match self.intents.remove(tran) {
            Some(Intent::Remove) => None,
            Some(Intent::Update(candidate)) => {
                self.value = candidate;
                Some(self)
            }
            None => Some(self),
        }
    }

    /// Discard `tran`'s effects. `None` means the document is gone.
    fn rollback(mut self, tran: &TransactionId) -> Option<Self> {
        if self.owned_by(Some(tran)) {
            return None;
        }
        self.intents.remove(tran);
        Some(self)
    }
}

/// In-memory provider with per-document transaction overlays.
///
/// Reads inside a transaction see that transaction's own pending writes;
/// nobody else does until commit. There is no cross-transaction conflict
/// detection: when two transactions update the same document, the later
/// commit wins.
pub struct MemoryProvider {
    id_strategy: AutoIdStrategy,
    documents: RwLock<HashMap<String, Vec<StoredDocument>>>,
    transactions: RwLock<HashSet<TransactionId>>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::with_id_strategy(AutoIdStrategy::Nanoid)
    }

    pub fn with_id_strategy(id_strategy: AutoIdStrategy) -> Self {
        MemoryProvider {
            id_strategy,
            documents: RwLock::new(HashMap::new()),
            transactions: RwLock::new(HashSet::new()),
        }
    }

    fn check_active(&self, tran: &TransactionHandle) -> Result<()> {
        if self.transactions.read().contains(&tran.id) {
            Ok(())
        } else {
            Err(StoreError::Transaction(format!(
                "Transaction {} is not active",
                tran.id
            )))
        }
    }

    fn tran_id(opts: &ProviderOptions) -> Option<&TransactionId> {
        opts.transaction.as_ref().map(|t| &t.id)
    }

    /// Apply `step` to every stored document and retire the transaction.
    fn finish(
        &self,
        tran: &TransactionHandle,
        step: fn(StoredDocument, &TransactionId) -> Option<StoredDocument>,
    ) -> Result<()> {
        self.check_active(tran)?;
        {
            let mut documents = self.documents.write();
            for docs in documents.values_mut() {
                let taken = std::mem::take(docs);
                *docs = taken.into_iter().filter_map(|d| step(d, &tran.id)).collect();
            }
        }
        self.transactions.write().remove(&tran.id);
        Ok(())
    }
}

fn unknown(entity_set: &str) -> StoreError {
    StoreError::UnknownEntitySet(entity_set.to_string())
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn load(&self, model: &Model) -> Result<()> {
        let mut documents = self.documents.write();
        for name in model
            .entity_sets()
            .keys()
            .chain(model.internal_entity_sets().keys())
        {
            documents.entry(name.clone()).or_default();
        }
        log::debug!("memory provider loaded {} entity sets", documents.len());
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<TransactionHandle> {
        let handle = TransactionHandle {
            id: TransactionId::generate(),
        };
        self.transactions.write().insert(handle.id.clone());
        log::debug!("transaction {} started", handle.id);
        Ok(handle)
    }

    async fn commit_transaction(&self, tran: &TransactionHandle) -> Result<()> {
        self.finish(tran, StoredDocument::commit)?;
        log::debug!("transaction {} committed", tran.id);
        Ok(())
    }

    async fn rollback_transaction(&self, tran: &TransactionHandle) -> Result<()> {
        self.finish(tran, StoredDocument::rollback)?;
        log::debug!("transaction {} rolled back", tran.id);
        Ok(())
    }

    async fn drop_all(&self, opts: &ProviderOptions) -> Result<()> {
        let tran = Self::tran_id(opts);
        let mut documents = self.documents.write();
        for docs in documents.values_mut() {
            match tran {
                None => docs.clear(),
                Some(_) => docs.retain_mut(|d| {
                    if d.visible(tran).is_none() {
                        return true;
                    }
                    !d.apply_remove(tran)
                }),
            }
        }
        Ok(())
    }

    async fn find(
        &self,
        entity_set: &str,
        query: &Value,
        options: &FindOptions,
        opts: &ProviderOptions,
    ) -> Result<Vec<Document>> {
        let tran = Self::tran_id(opts);
        let visible: Vec<Document> = {
            let documents = self.documents.read();
            let docs = documents.get(entity_set).ok_or_else(|| unknown(entity_set))?;
            docs.iter()
                .filter_map(|d| d.visible(tran).cloned())
                .collect()
        };
        query::apply(visible, query, options)
    }

    async fn insert(&self, entity_set: &str, mut doc: Document, opts: &ProviderOptions) -> Result<Document> {
        if doc.is_unset(ID_FIELD) {
            doc.insert(ID_FIELD.to_string(), Value::String(self.id_strategy.generate()));
        }
        let tran = Self::tran_id(opts);
        let mut documents = self.documents.write();
        let docs = documents
            .get_mut(entity_set)
            .ok_or_else(|| unknown(entity_set))?;
        docs.push(StoredDocument::new(doc.clone(), tran));
        log::debug!(
            "inserted {}/{}{}",
            entity_set,
            doc.id().unwrap_or_default(),
            tran.map(|t| format!(" in transaction {t}")).unwrap_or_default()
        );
        Ok(doc)
    }

    async fn update(
        &self,
        entity_set: &str,
        query: &Value,
        update: &Update,
        opts: &ProviderOptions,
    ) -> Result<usize> {
        let tran = Self::tran_id(opts);
        let matched = {
            let mut documents = self.documents.write();
            let docs = documents
                .get_mut(entity_set)
                .ok_or_else(|| unknown(entity_set))?;
            let hits = matching(docs, query, tran)?;
            for &index in &hits {
                let entry = &mut docs[index];
                if let Some(current) = entry.visible(tran) {
                    let updated = current.merged(&update.set);
                    entry.apply_update(tran, updated);
                }
            }
            hits.len()
        };
        if matched == 0 && opts.upsert {
            self.insert(entity_set, Document::from(update.set.clone()), opts)
                .await?;
            return Ok(1);
        }
        log::debug!("updated {matched} documents in {entity_set}");
        Ok(matched)
    }

    async fn remove(&self, entity_set: &str, query: &Value, opts: &ProviderOptions) -> Result<()> {
        let tran = Self::tran_id(opts);
        let mut documents = self.documents.write();
        let docs = documents
            .get_mut(entity_set)
            .ok_or_else(|| unknown(entity_set))?;
        let hits = matching(docs, query, tran)?;
        let mut index = 0;
        docs.retain_mut(|entry| {
            let hit = hits.binary_search(&index).is_ok();
            index += 1;
            !(hit && entry.apply_remove(tran))
        });
        log::debug!("removed {} documents from {entity_set}", hits.len());
        Ok(())
    }
}

/// Positions of the documents visible to `tran` that match `query`, ascending.
fn matching(docs: &[StoredDocument], query: &Value, tran: Option<&TransactionId>) -> Result<Vec<usize>> {
    let mut hits = Vec::new();
    for (index, entry) in docs.iter().enumerate() {
        if let Some(current) = entry.visible(tran) {
            if query::matches(current, query)? {
                hits.push(index);
            }
        }
    }
    Ok(hits)
}
