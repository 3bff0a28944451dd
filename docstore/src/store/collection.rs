use super::{CollectionState, DocumentStore};
use crate::document::Document;
use crate::error::Result;
use crate::listeners::{FindEvent, InsertEvent, ListenerChain, RemoveEvent, UpdateEvent};
use crate::model::EntitySetDefinition;
use crate::query::{FindOptions, SortDirection, SortKey, Update, UpdateOptions};
use crate::transaction::Context;
use crate::validation;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::future::IntoFuture;

/// Handle to one entity set. Every call validates, fires the matching
/// listener chain and then delegates to the provider.
#[derive(Clone, Copy)]
pub struct Collection<'a> {
    store: &'a DocumentStore,
    state: &'a CollectionState,
}

impl<'a> Collection<'a> {
    pub(super) fn new(store: &'a DocumentStore, state: &'a CollectionState) -> Self {
        Collection { store, state }
    }

    pub fn name(&self) -> &'a str {
        &self.state.name
    }

    pub fn definition(&self) -> &'a EntitySetDefinition {
        &self.state.definition
    }

    pub fn before_find(&self) -> &'a ListenerChain<FindEvent> {
        &self.state.before_find
    }

    pub fn before_insert(&self) -> &'a ListenerChain<InsertEvent> {
        &self.state.before_insert
    }

    pub fn before_update(&self) -> &'a ListenerChain<UpdateEvent> {
        &self.state.before_update
    }

    pub fn before_remove(&self) -> &'a ListenerChain<RemoveEvent> {
        &self.state.before_remove
    }

    /// Lazy query; nothing runs until the cursor is awaited or collected.
    pub fn find(&self, query: Value, ctx: &'a Context) -> Cursor<'a> {
        Cursor {
            collection: *self,
            query,
            options: FindOptions::default(),
            ctx,
        }
    }

    pub async fn find_one(&self, query: Value, ctx: &Context) -> Result<Option<Document>> {
        let options = FindOptions {
            limit: Some(1),
            ..Default::default()
        };
        Ok(self.run_find(query, options, ctx).await?.into_iter().next())
    }

    pub async fn count(&self, query: Value, ctx: &Context) -> Result<usize> {
        let mut event = FindEvent {
            entity_set: self.state.name.clone(),
            query,
            options: FindOptions::default(),
        };
        self.state.before_find.fire(self.store, &mut event, ctx).await?;
        let opts = self.store.provider_options(ctx)?;
        self.store
            .provider()
            .count(&self.state.name, &event.query, &opts)
            .await
    }

    async fn run_find(&self, query: Value, options: FindOptions, ctx: &Context) -> Result<Vec<Document>> {
        let mut event = FindEvent {
            entity_set: self.state.name.clone(),
            query,
            options,
        };
        self.state.before_find.fire(self.store, &mut event, ctx).await?;
        let opts = self.store.provider_options(ctx)?;
        self.store
            .provider()
            .find(&self.state.name, &event.query, &event.options, &opts)
            .await
    }

    /// The public key, when the value must be a legal path segment.
    fn public_key(&self) -> Option<&'a str> {
        self.state.definition.entity_type_public_key.as_deref()
    }

    fn validate(&self, data: &Map<String, Value>) -> Result<()> {
        let model = self.store.model();
        let Some(fields) = model.entity_set_fields(&self.state.name) else {
            return Ok(());
        };
        for warning in validation::ensure_valid(model, fields, data)? {
            log::debug!("{}: {}", self.state.name, warning);
        }
        Ok(())
    }

    pub async fn insert(&self, doc: Document, ctx: &Context) -> Result<Document> {
        if let Some(key) = self.public_key() {
            validation::validate_entity_name(doc.get(key))?;
        }
        self.validate(&doc)?;

        let mut event = InsertEvent {
            entity_set: self.state.name.clone(),
            doc,
        };
        self.state.before_insert.fire(self.store, &mut event, ctx).await?;
        let opts = self.store.provider_options(ctx)?;
        self.store
            .provider()
            .insert(&self.state.name, event.doc, &opts)
            .await
    }

    pub async fn update(&self, query: Value, update: Update, ctx: &Context) -> Result<usize> {
        self.update_with(query, update, UpdateOptions::default(), ctx)
            .await
    }

    /// Apply `$set` to every matching document. With `upsert`, a miss inserts
    /// the `$set` document through the insert path instead.
    pub async fn update_with(
        &self,
        query: Value,
        update: Update,
        options: UpdateOptions,
        ctx: &Context,
    ) -> Result<usize> {
        if let Some(key) = self.public_key() {
            if update.set.contains_key(key) {
                validation::validate_entity_name(update.set.get(key))?;
            }
        }
        self.validate(&update.set)?;

        let mut event = UpdateEvent {
            entity_set: self.state.name.clone(),
            query,
            update,
            options,
        };
        self.state.before_update.fire(self.store, &mut event, ctx).await?;
        let opts = self.store.provider_options(ctx)?;
        let matched = self
            .store
            .provider()
            .update(&self.state.name, &event.query, &event.update, &opts)
            .await?;
        if matched == 0 && event.options.upsert {
            self.insert(Document::from(event.update.set), ctx).await?;
            return Ok(1);
        }
        Ok(matched)
    }

    pub async fn remove(&self, query: Value, ctx: &Context) -> Result<()> {
        let mut event = RemoveEvent {
            entity_set: self.state.name.clone(),
            query,
        };
        self.state.before_remove.fire(self.store, &mut event, ctx).await?;
        let opts = self.store.provider_options(ctx)?;
        self.store
            .provider()
            .remove(&self.state.name, &event.query, &opts)
            .await
    }
}

/// A pending `find`. Shape it with the builder methods, then `.await` it.
pub struct Cursor<'a> {
    collection: Collection<'a>,
    query: Value,
    options: FindOptions,
    ctx: &'a Context,
}

impl<'a> Cursor<'a> {
    pub fn project(mut self, projection: Value) -> Self {
        self.options.projection = Some(projection);
        self
    }

    pub fn sort_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.options.sort.push(SortKey {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.options.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.options.limit = Some(n);
        self
    }

    pub async fn to_vec(self) -> Result<Vec<Document>> {
        self.collection
            .run_find(self.query, self.options, self.ctx)
            .await
    }

    /// Number of matching documents, ignoring skip and limit.
    pub async fn count(self) -> Result<usize> {
        self.collection.count(self.query, self.ctx).await
    }
}

impl<'a> IntoFuture for Cursor<'a> {
    type Output = Result<Vec<Document>>;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.to_vec())
    }
}
