// Listeners every collection gets at initialization

use super::{CollectionState, DocumentStore};
use crate::document::{timestamp_now, CREATION_DATE_FIELD, ID_FIELD, MODIFICATION_DATE_FIELD};
use crate::error::{Result, StoreError};
use crate::listeners::{InsertEvent, Listener, UpdateEvent};
use crate::transaction::Context;
use async_trait::async_trait;
use serde_json::{json, Value};

pub(super) fn install(state: &CollectionState) {
    state.before_insert.add("duplicate-id", DuplicateId);
    state.before_insert.add("defaults", InsertDefaults);
    state.before_insert.add("human-readable-key", HumanReadableKey);
    state.before_update.add("modification-date", ModificationDate);
    state.before_update.add("human-readable-key", HumanReadableKey);
}

struct DuplicateId;

#[async_trait]
impl Listener<InsertEvent> for DuplicateId {
    async fn call(&self, store: &DocumentStore, event: &mut InsertEvent, ctx: &Context) -> Result<()> {
        match event.doc.id() {
            Some(id) => store.check_duplicated_id(&event.entity_set, id, ctx).await,
            None => Ok(()),
        }
    }
}

struct InsertDefaults;

#[async_trait]
impl Listener<InsertEvent> for InsertDefaults {
    async fn call(&self, store: &DocumentStore, event: &mut InsertEvent, _ctx: &Context) -> Result<()> {
        let doc = &mut event.doc;
        if doc.is_unset(ID_FIELD) {
            doc.insert(ID_FIELD.to_string(), Value::String(store.options().generate_id()));
        }
        let now = timestamp_now();
        doc.insert(CREATION_DATE_FIELD.to_string(), Value::String(now.clone()));
        doc.insert(MODIFICATION_DATE_FIELD.to_string(), Value::String(now));

        if let Some(hrk) = human_readable_key(store, &event.entity_set) {
            if doc.is_unset(&hrk) {
                doc.insert(hrk, Value::String(store.options().generate_human_readable_key()));
            }
        }
        Ok(())
    }
}

struct ModificationDate;

#[async_trait]
impl Listener<UpdateEvent> for ModificationDate {
    async fn call(&self, _store: &DocumentStore, event: &mut UpdateEvent, _ctx: &Context) -> Result<()> {
        event
            .update
            .set
            .insert(MODIFICATION_DATE_FIELD.to_string(), Value::String(timestamp_now()));
        Ok(())
    }
}

fn human_readable_key(store: &DocumentStore, entity_set: &str) -> Option<String> {
    store
        .model()
        .any_entity_set(entity_set)
        .and_then(|def| def.human_readable_key.clone())
}

/// The human-readable key must be non-empty and unique within its entity set.
struct HumanReadableKey;

impl HumanReadableKey {
    async fn check(
        store: &DocumentStore,
        entity_set: &str,
        field: &str,
        value: Option<&Value>,
        own_ids: &[String],
        ctx: &Context,
    ) -> Result<()> {
        let key = match value {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            _ => {
                return Err(StoreError::validation(format!(
                    "Field \"{field}\" of {entity_set} can not be empty"
                )))
            }
        };
        let clashes = store
            .any_collection(entity_set)?
            .find(json!({ field: key }), ctx)
            .to_vec()
            .await?;
        let existing = clashes
            .into_iter()
            .find(|d| !own_ids.iter().any(|id| Some(id.as_str()) == d.id()));
        match existing {
            Some(existing) => Err(StoreError::DuplicatedEntity {
                message: format!("Duplicated {field} \"{key}\" in {entity_set}"),
                existing_entity: Box::new(existing),
                existing_entity_entity_set: entity_set.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Listener<InsertEvent> for HumanReadableKey {
    async fn call(&self, store: &DocumentStore, event: &mut InsertEvent, ctx: &Context) -> Result<()> {
        let Some(field) = human_readable_key(store, &event.entity_set) else {
            return Ok(());
        };
        Self::check(store, &event.entity_set, &field, event.doc.get(&field), &[], ctx).await
    }
}

#[async_trait]
impl Listener<UpdateEvent> for HumanReadableKey {
    async fn call(&self, store: &DocumentStore, event: &mut UpdateEvent, ctx: &Context) -> Result<()> {
        let Some(field) = human_readable_key(store, &event.entity_set) else {
            return Ok(());
        };
        if !event.update.set.contains_key(&field) {
            return Ok(());
        }
        let matched = store
            .any_collection(&event.entity_set)?
            .find(event.query.clone(), ctx)
            .to_vec()
            .await?;
        if matched.len() > 1 {
            return Err(StoreError::validation(format!(
                "Can not set the same {field} on {} documents of {}",
                matched.len(),
                event.entity_set
            )));
        }
        let own_ids: Vec<String> = matched
            .iter()
            .filter_map(|d| d.id().map(str::to_string))
            .collect();
        Self::check(
            store,
            &event.entity_set,
            &field,
            event.update.set.get(&field),
            &own_ids,
            ctx,
        )
        .await
    }
}
