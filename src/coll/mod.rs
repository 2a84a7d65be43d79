//! The typed collection handle and its operations.

pub mod options;
#[cfg(test)]
mod test;

use std::sync::Arc;

use futures_util::StreamExt;
use mongodb::{
    options::{
        Acknowledgment, DeleteManyModel, DeleteOneModel, Hint, InsertOneModel, ReplaceOneModel,
        WriteConcern, WriteModel,
    },
    Collection, IndexModel,
};
use serde::de::DeserializeOwned;
use typed_builder::TypedBuilder;

use crate::{
    bson::{doc, to_bson, to_document, Bson, DateTime, Document},
    context::{ContextCollectionMetadata, DbContext, SessionGuard},
    cursor::{self, DocumentStream},
    document::DbDocument,
    error::{Error, Result},
    index::{self, IndexKeys},
    query::{Query, Update},
    results::{FacetAggregate, PagedResult},
};

use self::options::{
    transaction_force, AggregateOptions, AggregateOptionsPaging, BulkWriteOptions, CountOptions,
    DeleteOptions, FindOneAndUpdateOptions, FindOptions, FindOptionsPaging, FullTextSearchOptions,
    InsertManyOptions, InsertOneOptions, ReplaceOptions, UpdateOptions,
};

/// Options for constructing a [`DbSet`] through
/// [`DbContext::db_set_with`](crate::DbContext::db_set_with).
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct DbSetOptions {
    /// Overrides the collection name declared by the document type.
    pub collection_name: Option<String>,

    /// Surface index-creation failures as errors instead of logging and
    /// swallowing them.
    pub throw_index_exceptions: bool,

    /// Default transaction routing for this handle, applied when an
    /// operation's options leave the decision open. `Some(true)` routes every
    /// operation through the context's session.
    pub use_transaction: Option<bool>,
}

/// The typed facade over one collection, bound to a [`DbContext`].
///
/// A handle holds no mutable state of its own beyond the context's shared
/// metadata cache; it is cheap to clone and handles for the same type are
/// equivalent. Every operation consults the context for transaction routing:
/// when the context is in transactional mode (or the caller forces it), the
/// operation runs on the context's session.
pub struct DbSet<T: DbDocument> {
    context: DbContext,
    collection: Collection<T>,
    raw: Collection<Document>,
    metadata: Arc<ContextCollectionMetadata>,
    throw_index_exceptions: bool,
    use_transaction: Option<bool>,
}

impl<T: DbDocument> Clone for DbSet<T> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            collection: self.collection.clone(),
            raw: self.raw.clone(),
            metadata: Arc::clone(&self.metadata),
            throw_index_exceptions: self.throw_index_exceptions,
            use_transaction: self.use_transaction,
        }
    }
}

impl<T: DbDocument> std::fmt::Debug for DbSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbSet")
            .field("collection", &self.metadata.name)
            .finish()
    }
}

impl<T: DbDocument> DbSet<T> {
    pub(crate) async fn new(context: DbContext, options: DbSetOptions) -> Result<Self> {
        let name = options
            .collection_name
            .clone()
            .unwrap_or_else(|| T::COLLECTION.to_string());
        let collection = context.database().collection::<T>(&name);
        let raw = collection.clone_with_type::<Document>();

        let metadata = match context.collection_metadata(&name) {
            Some(metadata) => metadata,
            None => {
                let _bootstrap = context.handle_bootstrap_lock().lock().await;
                match context.collection_metadata(&name) {
                    Some(metadata) => metadata,
                    None => {
                        let declared = if T::HAS_TENANT_AUDIT {
                            index::tenant_default_indexes::<T>().into_models()
                        } else {
                            Vec::new()
                        };
                        if !declared.is_empty() {
                            create_index_models(
                                &collection,
                                declared.clone(),
                                options.throw_index_exceptions,
                            )
                            .await?;
                        }
                        context.insert_collection_metadata(ContextCollectionMetadata {
                            name: name.clone(),
                            index_keys: declared,
                        })
                    }
                }
            }
        };

        Ok(Self {
            context,
            collection,
            raw,
            metadata,
            throw_index_exceptions: options.throw_index_exceptions,
            use_transaction: options.use_transaction,
        })
    }

    /// The context this handle is bound to.
    pub fn context(&self) -> &DbContext {
        &self.context
    }

    /// The collection name.
    pub fn name(&self) -> &str {
        self.collection.name()
    }

    /// The metadata recorded for this collection.
    pub fn metadata(&self) -> &ContextCollectionMetadata {
        &self.metadata
    }

    async fn route(&self, force: Option<bool>) -> Result<Option<SessionGuard>> {
        self.context.transaction_session(force).await
    }

    /// The routing decision for one operation: the options decide first, then
    /// the handle's default, then the context's transactional mode.
    fn force_with(&self, not_perform_in_transaction: Option<bool>) -> Option<bool> {
        transaction_force(not_perform_in_transaction).or(self.use_transaction)
    }

    fn id_filter(&self, id: &T::Id) -> Result<Document> {
        Ok(doc! { "_id": to_bson(id)? })
    }

    /// Whether a write is acknowledged under the effective write concern:
    /// the per-operation override when given, else the collection default.
    fn write_acknowledged(&self, override_concern: Option<&WriteConcern>) -> bool {
        acknowledged(override_concern.or_else(|| self.raw.write_concern()))
    }

    // ---------- single reads ----------

    /// Fetches the document with the given id, or `None`.
    pub async fn get(&self, id: &T::Id, options: Option<FindOptions>) -> Result<Option<T>> {
        let filter = self.id_filter(id)?;
        self.find_one_on(self.collection.clone(), filter, options)
            .await
    }

    /// Fetches the first document matching `query`, or `None`.
    pub async fn find_one(&self, query: Query<T>, options: Option<FindOptions>) -> Result<Option<T>> {
        let filter = query.render()?;
        self.find_one_on(self.collection.clone(), filter, options)
            .await
    }

    /// Fetches the first document matching `query` deserialized as the
    /// projection type `P`, or `None`. The projection document itself comes
    /// from the options.
    pub async fn find_one_as<P>(
        &self,
        query: Query<T>,
        options: Option<FindOptions>,
    ) -> Result<Option<P>>
    where
        P: DeserializeOwned + Send + Sync + 'static,
    {
        let filter = query.render()?;
        self.find_one_on(self.collection.clone_with_type::<P>(), filter, options)
            .await
    }

    /// Alias of [`DbSet::find_one`].
    pub async fn first_or_default(
        &self,
        query: Query<T>,
        options: Option<FindOptions>,
    ) -> Result<Option<T>> {
        self.find_one(query, options).await
    }

    async fn find_one_on<P>(
        &self,
        collection: Collection<P>,
        filter: Document,
        options: Option<FindOptions>,
    ) -> Result<Option<P>>
    where
        P: DeserializeOwned + Send + Sync + 'static,
    {
        let force = self.force_with(options.as_ref().and_then(|o| o.not_perform_in_transaction));
        let driver: Option<mongodb::options::FindOneOptions> = options.map(Into::into);
        match self.route(force).await? {
            Some(mut guard) => {
                let session = guard.session_mut()?;
                collection
                    .find_one(filter)
                    .with_options(driver)
                    .session(session)
                    .await
                    .map_err(Error::from)
            }
            None => collection
                .find_one(filter)
                .with_options(driver)
                .await
                .map_err(Error::from),
        }
    }

    // ---------- many reads ----------

    /// Streams the documents with the given ids.
    pub async fn get_many(
        &self,
        ids: impl IntoIterator<Item = T::Id>,
        options: Option<FindOptions>,
    ) -> Result<DocumentStream<T>> {
        let ids = ids
            .into_iter()
            .map(|id| to_bson(&id))
            .collect::<std::result::Result<Vec<Bson>, _>>()?;
        let filter = doc! { "_id": { "$in": ids } };
        self.stream_on(self.collection.clone(), filter, options).await
    }

    /// Streams the documents matching `query`.
    pub async fn find(
        &self,
        query: Query<T>,
        options: Option<FindOptions>,
    ) -> Result<DocumentStream<T>> {
        let filter = query.render()?;
        self.stream_on(self.collection.clone(), filter, options).await
    }

    /// Streams the documents matching `query` deserialized as the projection
    /// type `P`.
    pub async fn find_as<P>(
        &self,
        query: Query<T>,
        options: Option<FindOptions>,
    ) -> Result<DocumentStream<P>>
    where
        P: DeserializeOwned + Send + Sync + 'static,
    {
        let filter = query.render()?;
        self.stream_on(self.collection.clone_with_type::<P>(), filter, options)
            .await
    }

    /// Streams the documents matching a `$text` search, optionally
    /// conjoined with an extra filter.
    pub async fn fulltext_search(
        &self,
        text: impl Into<String>,
        text_options: FullTextSearchOptions,
        filter: Option<Query<T>>,
        options: Option<FindOptions>,
    ) -> Result<DocumentStream<T>> {
        let mut query = Query::<T>::from_text(text, text_options);
        if let Some(extra) = filter {
            query = query.and(extra);
        }
        self.find(query, options).await
    }

    async fn stream_on<P>(
        &self,
        collection: Collection<P>,
        filter: Document,
        options: Option<FindOptions>,
    ) -> Result<DocumentStream<P>>
    where
        P: DeserializeOwned + Send + Sync + 'static,
    {
        let force = self.force_with(options.as_ref().and_then(|o| o.not_perform_in_transaction));
        let driver: Option<mongodb::options::FindOptions> = options.map(Into::into);
        match self.route(force).await? {
            Some(mut guard) => {
                let cursor = {
                    let session = guard.session_mut()?;
                    collection
                        .find(filter)
                        .with_options(driver)
                        .session(session)
                        .await
                        .map_err(Error::from)?
                };
                Ok(cursor::from_session_cursor(cursor, guard))
            }
            None => {
                let cursor = collection
                    .find(filter)
                    .with_options(driver)
                    .await
                    .map_err(Error::from)?;
                Ok(cursor::from_cursor(cursor))
            }
        }
    }

    // ---------- counting ----------

    /// Counts the documents matching `query`.
    pub async fn count_documents(
        &self,
        query: Query<T>,
        options: Option<CountOptions>,
    ) -> Result<u64> {
        let filter = query.render()?;
        let force = self.force_with(options.as_ref().and_then(|o| o.not_perform_in_transaction));
        let driver: Option<mongodb::options::CountOptions> = options.map(Into::into);
        self.count_with(filter, driver, force).await
    }

    /// Whether any document matches `query`. Implemented as a count limited
    /// to one document.
    pub async fn any(&self, query: Query<T>, options: Option<CountOptions>) -> Result<bool> {
        let mut options = options.unwrap_or_default();
        options.skip = None;
        options.limit = Some(1);
        let count = self.count_documents(query, Some(options)).await?;
        Ok(count > 0)
    }

    async fn count_with(
        &self,
        filter: Document,
        options: Option<mongodb::options::CountOptions>,
        force: Option<bool>,
    ) -> Result<u64> {
        match self.route(force).await? {
            Some(mut guard) => {
                let session = guard.session_mut()?;
                self.raw
                    .count_documents(filter)
                    .with_options(options)
                    .session(session)
                    .await
                    .map_err(Error::from)
            }
            None => self
                .raw
                .count_documents(filter)
                .with_options(options)
                .await
                .map_err(Error::from),
        }
    }

    // ---------- paged reads ----------

    /// Fetches one page of the documents matching `query`.
    ///
    /// The total under the filter is observed before the page items, with the
    /// same rendered filter and with skip/limit cleared; the two observations
    /// are ordered but not atomic under concurrent writes.
    pub async fn get_paged(
        &self,
        query: Query<T>,
        options: FindOptionsPaging,
    ) -> Result<PagedResult<T>> {
        self.paged_on(self.collection.clone(), query, options).await
    }

    /// Fetches one page of the documents matching `query`, deserialized as
    /// the projection type `P`.
    pub async fn get_paged_as<P>(
        &self,
        query: Query<T>,
        options: FindOptionsPaging,
    ) -> Result<PagedResult<P>>
    where
        P: DeserializeOwned + Send + Sync + 'static,
    {
        self.paged_on(self.collection.clone_with_type::<P>(), query, options)
            .await
    }

    async fn paged_on<P>(
        &self,
        collection: Collection<P>,
        query: Query<T>,
        options: FindOptionsPaging,
    ) -> Result<PagedResult<P>>
    where
        P: DeserializeOwned + Send + Sync + 'static,
    {
        if options.page_size <= 0 {
            return Err(Error::invalid_argument("page_size must be positive"));
        }

        let filter = query.render()?;
        let force = self.force_with(options.not_perform_in_transaction);
        let current_page = options.current_page;
        let page_size = options.page_size as u64;
        let count_options = options.to_count_options();
        let find_options: mongodb::options::FindOptions = options.into();

        let total = self
            .count_with(filter.clone(), Some(count_options), force)
            .await?;

        let items = match self.route(force).await? {
            Some(mut guard) => {
                let cursor = {
                    let session = guard.session_mut()?;
                    collection
                        .find(filter)
                        .with_options(find_options)
                        .session(session)
                        .await
                        .map_err(Error::from)?
                };
                cursor::collect_session_cursor(cursor, guard).await?
            }
            None => {
                let cursor = collection
                    .find(filter)
                    .with_options(find_options)
                    .await
                    .map_err(Error::from)?;
                cursor::collect_cursor(cursor).await?
            }
        };

        Ok(PagedResult::new(items, current_page, page_size, total))
    }

    // ---------- inserts ----------

    /// Inserts one document. Returns 1, or 0 when the document's id was left
    /// at its default and the server assigned one, or -1 when the write is
    /// unacknowledged.
    ///
    /// The tenant/audit facet is stamped on the document before the
    /// `before_insert` hook runs, so the caller observes the stamped fields.
    pub async fn insert_one(
        &self,
        document: &mut T,
        options: Option<InsertOneOptions>,
    ) -> Result<i64> {
        if let Some(audit) = document.audit_mut() {
            audit.stamp_insert();
        }
        let (rendered, id_omitted) = rendered_for_insert(document)?;
        let rendered = self.context.run_before_insert(rendered)?;

        let force = self.force_with(options.as_ref().and_then(|o| o.not_perform_in_transaction));
        let write_concern = options.as_ref().and_then(|o| o.write_concern.clone());
        let driver: Option<mongodb::options::InsertOneOptions> = options.map(Into::into);
        match self.route(force).await? {
            Some(mut guard) => {
                let session = guard.session_mut()?;
                self.raw
                    .insert_one(rendered)
                    .with_options(driver)
                    .session(session)
                    .await
                    .map_err(Error::from)?;
            }
            None => {
                self.raw
                    .insert_one(rendered)
                    .with_options(driver)
                    .await
                    .map_err(Error::from)?;
            }
        }

        if !self.write_acknowledged(write_concern.as_ref()) {
            return Ok(-1);
        }
        Ok(if id_omitted { 0 } else { 1 })
    }

    /// Inserts many documents through a bulk write of single-document insert
    /// models, invoking the `before_insert` hook per document. Inserts
    /// translated from [`InsertManyOptions`] default to ordered execution.
    pub async fn insert_many(
        &self,
        documents: &mut [T],
        options: Option<InsertManyOptions>,
    ) -> Result<i64> {
        let bulk: BulkWriteOptions = options.map(Into::into).unwrap_or_default();
        self.insert_bulk_with(documents, bulk, true).await
    }

    /// Inserts many documents through an unordered-by-default bulk write.
    pub async fn insert_bulk(
        &self,
        documents: &mut [T],
        options: Option<BulkWriteOptions>,
    ) -> Result<i64> {
        self.insert_bulk_with(documents, options.unwrap_or_default(), false)
            .await
    }

    async fn insert_bulk_with(
        &self,
        documents: &mut [T],
        options: BulkWriteOptions,
        default_ordered: bool,
    ) -> Result<i64> {
        if documents.is_empty() {
            return Ok(0);
        }

        let namespace = self.raw.namespace();
        let mut models = Vec::with_capacity(documents.len());
        for document in documents.iter_mut() {
            if let Some(audit) = document.audit_mut() {
                audit.stamp_insert();
            }
            let (rendered, _) = rendered_for_insert(document)?;
            let rendered = self.context.run_before_insert(rendered)?;
            models.push(WriteModel::from(
                InsertOneModel::builder()
                    .namespace(namespace.clone())
                    .document(rendered)
                    .build(),
            ));
        }

        self.bulk_write(models, options, default_ordered)
            .await
            .map(|summary| match summary {
                Some(summary) => {
                    summary.inserted_count
                        + summary.matched_count
                        + summary.modified_count
                        + summary.deleted_count
                }
                None => -1,
            })
    }

    // ---------- replaces ----------

    /// Replaces the document matched by `query`, or by id when no query is
    /// given. Returns the modified count, or -1 when unacknowledged.
    pub async fn replace_one(
        &self,
        document: &mut T,
        query: Option<Query<T>>,
        options: Option<ReplaceOptions>,
    ) -> Result<i64> {
        if let Some(audit) = document.audit_mut() {
            audit.stamp_update();
        }
        let filter = match query {
            Some(query) => query.render()?,
            None => self.id_filter(&document.id())?,
        };
        let rendered = self.context.run_before_replace(to_document(document)?)?;

        let force = self.force_with(options.as_ref().and_then(|o| o.not_perform_in_transaction));
        let write_concern = options.as_ref().and_then(|o| o.write_concern.clone());
        let driver: Option<mongodb::options::ReplaceOptions> = options.map(Into::into);
        let result = match self.route(force).await? {
            Some(mut guard) => {
                let session = guard.session_mut()?;
                self.raw
                    .replace_one(filter, rendered)
                    .with_options(driver)
                    .session(session)
                    .await
                    .map_err(Error::from)?
            }
            None => self
                .raw
                .replace_one(filter, rendered)
                .with_options(driver)
                .await
                .map_err(Error::from)?,
        };

        if !self.write_acknowledged(write_concern.as_ref()) {
            return Ok(-1);
        }
        Ok(result.modified_count as i64)
    }

    /// Replaces many documents through a bulk write of replace models.
    ///
    /// Without a query, each document is matched by id. With one, the query
    /// must be a template; it is completed with each document in turn.
    pub async fn replace_many(
        &self,
        documents: &mut [T],
        query: Option<Query<T>>,
        options: Option<BulkWriteOptions>,
    ) -> Result<i64> {
        if documents.is_empty() {
            return Ok(0);
        }
        if let Some(ref query) = query {
            if !query.is_template() {
                return Err(Error::invalid_argument(
                    "a per-document replace query must be a template; use replace_one for a fixed filter",
                ));
            }
        }

        let namespace = self.raw.namespace();
        let mut models = Vec::with_capacity(documents.len());
        for document in documents.iter_mut() {
            if let Some(audit) = document.audit_mut() {
                audit.stamp_update();
            }
            let filter = match query {
                Some(ref template) => template
                    .clone()
                    .complete_expression(to_bson(&*document)?)?
                    .render()?,
                None => self.id_filter(&document.id())?,
            };
            let rendered = self.context.run_before_replace(to_document(document)?)?;
            models.push(WriteModel::from(
                ReplaceOneModel::builder()
                    .namespace(namespace.clone())
                    .filter(filter)
                    .replacement(rendered)
                    .build(),
            ));
        }

        self.bulk_write(models, options.unwrap_or_default(), false)
            .await
            .map(|summary| match summary {
                Some(summary) => summary.modified_count,
                None => -1,
            })
    }

    // ---------- updates ----------

    /// Applies the update attached to `query` to the first matching
    /// document. Returns the modified count, or -1 when unacknowledged.
    pub async fn update_one(
        &self,
        mut query: Query<T>,
        options: Option<UpdateOptions>,
    ) -> Result<i64> {
        let update = take_update(&mut query)?;
        self.update_with(query, update, options, false).await
    }

    /// Applies an explicit update to the first document matching `query`.
    pub async fn update_one_with(
        &self,
        query: Query<T>,
        update: Update,
        options: Option<UpdateOptions>,
    ) -> Result<i64> {
        self.update_with(query, update, options, false).await
    }

    /// Applies the `$addToSet`-carrying update attached to `query`.
    pub async fn update_add_to_set(
        &self,
        query: Query<T>,
        options: Option<UpdateOptions>,
    ) -> Result<i64> {
        self.update_one(query, options).await
    }

    /// Applies the update attached to `query` to every matching document.
    pub async fn update_many(
        &self,
        mut query: Query<T>,
        options: Option<UpdateOptions>,
    ) -> Result<i64> {
        let update = take_update(&mut query)?;
        self.update_with(query, update, options, true).await
    }

    /// Applies an explicit update to every document matching `query`.
    pub async fn update_many_with(
        &self,
        query: Query<T>,
        update: Update,
        options: Option<UpdateOptions>,
    ) -> Result<i64> {
        self.update_with(query, update, options, true).await
    }

    /// Applies an update given as raw JSON to every document matching the
    /// JSON filter.
    pub async fn update_many_json(
        &self,
        filter_json: &str,
        update_json: &str,
        options: Option<UpdateOptions>,
    ) -> Result<i64> {
        let query = Query::<T>::from_json(filter_json);
        let update = Update::from_document(serde_json::from_str(update_json)?);
        self.update_with(query, update, options, true).await
    }

    async fn update_with(
        &self,
        query: Query<T>,
        update: Update,
        options: Option<UpdateOptions>,
        many: bool,
    ) -> Result<i64> {
        let filter = query.render()?;
        let mut update_doc = update.render();
        self.stamp_update_document(&mut update_doc);
        let update_doc = self.context.run_before_update(update_doc)?;

        let force = self.force_with(options.as_ref().and_then(|o| o.not_perform_in_transaction));
        let write_concern = options.as_ref().and_then(|o| o.write_concern.clone());
        let driver: Option<mongodb::options::UpdateOptions> = options.map(Into::into);
        let result = match self.route(force).await? {
            Some(mut guard) => {
                let session = guard.session_mut()?;
                if many {
                    self.raw
                        .update_many(filter, update_doc)
                        .with_options(driver)
                        .session(session)
                        .await
                        .map_err(Error::from)?
                } else {
                    self.raw
                        .update_one(filter, update_doc)
                        .with_options(driver)
                        .session(session)
                        .await
                        .map_err(Error::from)?
                }
            }
            None => {
                if many {
                    self.raw
                        .update_many(filter, update_doc)
                        .with_options(driver)
                        .await
                        .map_err(Error::from)?
                } else {
                    self.raw
                        .update_one(filter, update_doc)
                        .with_options(driver)
                        .await
                        .map_err(Error::from)?
                }
            }
        };

        if !self.write_acknowledged(write_concern.as_ref()) {
            return Ok(-1);
        }
        Ok(result.modified_count as i64)
    }

    /// Atomically updates the first document matching `query` and returns it,
    /// before or after modification according to the options.
    pub async fn find_one_and_update(
        &self,
        mut query: Query<T>,
        options: Option<FindOneAndUpdateOptions>,
    ) -> Result<Option<T>> {
        let update = take_update(&mut query)?;
        let filter = query.render()?;
        let mut update_doc = update.render();
        self.stamp_update_document(&mut update_doc);
        let update_doc = self.context.run_before_update(update_doc)?;

        let force = self.force_with(options.as_ref().and_then(|o| o.not_perform_in_transaction));
        let driver: Option<mongodb::options::FindOneAndUpdateOptions> = options.map(Into::into);
        match self.route(force).await? {
            Some(mut guard) => {
                let session = guard.session_mut()?;
                self.collection
                    .find_one_and_update(filter, update_doc)
                    .with_options(driver)
                    .session(session)
                    .await
                    .map_err(Error::from)
            }
            None => self
                .collection
                .find_one_and_update(filter, update_doc)
                .with_options(driver)
                .await
                .map_err(Error::from),
        }
    }

    /// Merges an `updated_at` stamp into the update document for types
    /// carrying the tenant/audit facet.
    fn stamp_update_document(&self, update: &mut Document) {
        if T::HAS_TENANT_AUDIT {
            merge_updated_at(update, DateTime::now());
        }
    }

    // ---------- deletes ----------

    /// Deletes the document with the given id. Returns 1 or 0, or -1 when
    /// unacknowledged.
    pub async fn delete_one(&self, id: &T::Id, options: Option<DeleteOptions>) -> Result<i64> {
        let filter = self.id_filter(id)?;
        let force = self.force_with(options.as_ref().and_then(|o| o.not_perform_in_transaction));
        let write_concern = options.as_ref().and_then(|o| o.write_concern.clone());
        let driver: Option<mongodb::options::DeleteOptions> = options.map(Into::into);
        let result = match self.route(force).await? {
            Some(mut guard) => {
                let session = guard.session_mut()?;
                self.raw
                    .delete_one(filter)
                    .with_options(driver)
                    .session(session)
                    .await
                    .map_err(Error::from)?
            }
            None => self
                .raw
                .delete_one(filter)
                .with_options(driver)
                .await
                .map_err(Error::from)?,
        };

        if !self.write_acknowledged(write_concern.as_ref()) {
            return Ok(-1);
        }
        Ok(result.deleted_count as i64)
    }

    /// Deletes the documents with the given ids through a bulk write of
    /// single-document delete models.
    pub async fn delete_many_by_ids(
        &self,
        ids: impl IntoIterator<Item = T::Id>,
        options: Option<DeleteOptions>,
    ) -> Result<i64> {
        let namespace = self.raw.namespace();
        let (collation, hint, bulk) = split_delete_options(options);
        let mut models = Vec::new();
        for id in ids {
            models.push(WriteModel::from(
                DeleteOneModel::builder()
                    .namespace(namespace.clone())
                    .filter(doc! { "_id": to_bson(&id)? })
                    .collation(collation.clone())
                    .hint(hint.clone())
                    .build(),
            ));
        }
        if models.is_empty() {
            return Ok(0);
        }

        self.bulk_write(models, bulk, false)
            .await
            .map(|summary| match summary {
                Some(summary) => summary.deleted_count,
                None => -1,
            })
    }

    /// Deletes every document matching `query` through a bulk write.
    pub async fn delete_many(
        &self,
        query: Query<T>,
        options: Option<DeleteOptions>,
    ) -> Result<i64> {
        let filter = query.render()?;
        let namespace = self.raw.namespace();
        let (collation, hint, bulk) = split_delete_options(options);
        let models = vec![WriteModel::from(
            DeleteManyModel::builder()
                .namespace(namespace)
                .filter(filter)
                .collation(collation)
                .hint(hint)
                .build(),
        )];

        self.bulk_write(models, bulk, false)
            .await
            .map(|summary| match summary {
                Some(summary) => summary.deleted_count,
                None => -1,
            })
    }

    /// Issues a bulk write through the client. Returns `None` when the write
    /// is unacknowledged.
    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        options: BulkWriteOptions,
        default_ordered: bool,
    ) -> Result<Option<mongodb::results::SummaryBulkWriteResult>> {
        let force = self.force_with(options.not_perform_in_transaction);
        let write_concern = options.write_concern.clone();
        let driver = options.into_driver(default_ordered);
        let count = models.len();
        let summary = match self.route(force).await? {
            Some(mut guard) => {
                let session = guard.session_mut()?;
                self.context
                    .client()
                    .bulk_write(models)
                    .with_options(driver)
                    .session(session)
                    .await
                    .map_err(Error::from)?
            }
            None => self
                .context
                .client()
                .bulk_write(models)
                .with_options(driver)
                .await
                .map_err(Error::from)?,
        };
        tracing::debug!(
            collection = self.collection.name(),
            models = count,
            "bulk write complete"
        );

        if !self.write_acknowledged(write_concern.as_ref()) {
            return Ok(None);
        }
        Ok(Some(summary))
    }

    // ---------- aggregation ----------

    /// Runs an aggregation pipeline and materializes the results.
    pub async fn aggregate<P>(
        &self,
        pipeline: Vec<Document>,
        options: Option<AggregateOptions>,
    ) -> Result<Vec<P>>
    where
        P: DeserializeOwned + Send + Sync + 'static,
    {
        let pipeline = self.context.run_before_aggregate(pipeline)?;
        let force = self.force_with(options.as_ref().and_then(|o| o.not_perform_in_transaction));
        let driver: Option<mongodb::options::AggregateOptions> = options.map(Into::into);
        match self.route(force).await? {
            Some(mut guard) => {
                let cursor = {
                    let session = guard.session_mut()?;
                    self.raw
                        .aggregate(pipeline)
                        .with_options(driver)
                        .with_type::<P>()
                        .session(session)
                        .await
                        .map_err(Error::from)?
                };
                cursor::collect_session_cursor(cursor, guard).await
            }
            None => {
                let cursor = self
                    .raw
                    .aggregate(pipeline)
                    .with_options(driver)
                    .with_type::<P>()
                    .await
                    .map_err(Error::from)?;
                cursor::collect_cursor(cursor).await
            }
        }
    }

    /// Runs an aggregation pipeline and streams the results lazily.
    pub async fn aggregate_stream<P>(
        &self,
        pipeline: Vec<Document>,
        options: Option<AggregateOptions>,
    ) -> Result<DocumentStream<P>>
    where
        P: DeserializeOwned + Send + Sync + 'static,
    {
        let pipeline = self.context.run_before_aggregate(pipeline)?;
        let force = self.force_with(options.as_ref().and_then(|o| o.not_perform_in_transaction));
        let driver: Option<mongodb::options::AggregateOptions> = options.map(Into::into);
        match self.route(force).await? {
            Some(mut guard) => {
                let cursor = {
                    let session = guard.session_mut()?;
                    self.raw
                        .aggregate(pipeline)
                        .with_options(driver)
                        .with_type::<P>()
                        .session(session)
                        .await
                        .map_err(Error::from)?
                };
                Ok(cursor::from_session_cursor(cursor, guard))
            }
            None => {
                let cursor = self
                    .raw
                    .aggregate(pipeline)
                    .with_options(driver)
                    .with_type::<P>()
                    .await
                    .map_err(Error::from)?;
                Ok(cursor::from_cursor(cursor))
            }
        }
    }

    /// Runs an aggregation pipeline through the faceted paging protocol:
    /// one round trip computes both the page items and the total.
    pub async fn aggregate_facet(
        &self,
        pipeline: Vec<Document>,
        options: AggregateOptionsPaging,
    ) -> Result<PagedResult<T>> {
        let skip = options.skip();
        let limit = options.limit();
        if skip < 0 {
            return Err(Error::invalid_argument("skip must be non-negative"));
        }
        if limit <= 0 {
            return Err(Error::invalid_argument("limit must be positive"));
        }

        let (current_page, page_size) = if options.page_size > 0 {
            (options.current_page, options.page_size as u64)
        } else {
            ((skip / limit) as u64, limit as u64)
        };

        let pipeline = self.context.run_before_aggregate(pipeline)?;
        let facet = facet_pipeline(&pipeline, skip, limit);
        let force = self.force_with(options.not_perform_in_transaction);
        let driver: mongodb::options::AggregateOptions = options.into();

        let envelopes: Vec<FacetAggregate<T>> = match self.route(force).await? {
            Some(mut guard) => {
                let cursor = {
                    let session = guard.session_mut()?;
                    self.raw
                        .aggregate(facet)
                        .with_options(driver)
                        .with_type::<FacetAggregate<T>>()
                        .session(session)
                        .await
                        .map_err(Error::from)?
                };
                cursor::collect_session_cursor(cursor, guard).await?
            }
            None => {
                let cursor = self
                    .raw
                    .aggregate(facet)
                    .with_options(driver)
                    .with_type::<FacetAggregate<T>>()
                    .await
                    .map_err(Error::from)?;
                cursor::collect_cursor(cursor).await?
            }
        };

        let (items, total) = match envelopes.into_iter().next() {
            Some(envelope) => {
                let total = envelope.total_rows();
                (envelope.result, total)
            }
            None => (Vec::new(), 0),
        };
        Ok(PagedResult::new(items, current_page, page_size, total))
    }

    // ---------- indexes ----------

    /// Streams the collection's indexes as (name, fields) pairs.
    pub async fn indexes(&self) -> Result<DocumentStream<(String, Vec<String>)>> {
        let cursor = self
            .collection
            .list_indexes()
            .await
            .map_err(Error::from)?;
        let stream = cursor::from_cursor::<IndexModel>(cursor);
        Ok(Box::pin(
            stream.map(|model| model.map(|model| index::index_summary(&model))),
        ))
    }

    /// Creates the declared indexes. With `force`, same-named existing
    /// indexes are dropped first so the declarations take effect.
    ///
    /// Returns `false` when creation failed and the handle was constructed
    /// without `throw_index_exceptions`; the failure is logged.
    pub async fn create_indexes(&self, keys: IndexKeys<T>, force: bool) -> Result<bool> {
        let models = keys.into_models();
        if models.is_empty() {
            return Ok(true);
        }

        if force {
            for model in &models {
                if let Some(name) = model.options.as_ref().and_then(|o| o.name.clone()) {
                    let _ = self.collection.drop_index(name).await;
                }
            }
        }

        create_index_models(&self.collection, models, self.throw_index_exceptions).await
    }
}

fn take_update<T>(query: &mut Query<T>) -> Result<Update> {
    query.take_update().ok_or_else(|| {
        Error::invalid_argument("this operation requires a query with an attached update")
    })
}

/// Serializes a document for insertion. A missing, null, or default-valued
/// `_id` is dropped so the server assigns one; the flag reports whether that
/// happened, which is also when the in-memory document keeps its default id.
fn rendered_for_insert<T: DbDocument>(document: &T) -> Result<(Document, bool)> {
    let mut rendered = to_document(document)?;
    let default_id = to_bson(&T::Id::default())?;
    let id_omitted = match rendered.get("_id") {
        None => true,
        Some(id) => *id == Bson::Null || *id == default_id,
    };
    if id_omitted {
        rendered.remove("_id");
    }
    Ok((rendered, id_omitted))
}

/// Whether a write concern acknowledges writes. Only an explicit `w: 0` does
/// not.
fn acknowledged(write_concern: Option<&WriteConcern>) -> bool {
    !matches!(
        write_concern.and_then(|wc| wc.w.as_ref()),
        Some(Acknowledgment::Nodes(0))
    )
}

/// The facet pipeline literal for aggregate paging:
/// `[{ $facet: { result: P ++ [{$skip},{$limit}], total: P ++ [{$count:"total"}] } }]`.
fn facet_pipeline(pipeline: &[Document], skip: i64, limit: i64) -> Vec<Document> {
    let mut result_pipeline = pipeline.to_vec();
    result_pipeline.push(doc! { "$skip": skip });
    result_pipeline.push(doc! { "$limit": limit });

    let mut total_pipeline = pipeline.to_vec();
    total_pipeline.push(doc! { "$count": "total" });

    vec![doc! {
        "$facet": {
            "result": result_pipeline,
            "total": total_pipeline,
        }
    }]
}

/// Splits delete options into the per-model fields (collation, hint) and the
/// bulk-level options carrying the rest.
fn split_delete_options(
    options: Option<DeleteOptions>,
) -> (Option<Document>, Option<Bson>, BulkWriteOptions) {
    match options {
        Some(options) => {
            let collation = options
                .collation
                .as_ref()
                .and_then(|collation| to_document(collation).ok());
            let hint = options.hint.map(hint_to_bson);
            let bulk = BulkWriteOptions {
                is_ordered: None,
                bypass_document_validation: None,
                comment: options.comment,
                let_vars: options.let_vars,
                write_concern: options.write_concern,
                not_perform_in_transaction: options.not_perform_in_transaction,
            };
            (collation, hint, bulk)
        }
        None => (None, None, BulkWriteOptions::default()),
    }
}

/// Merges the audit stamp into the `$set` operator without clobbering fields
/// the caller already set.
fn merge_updated_at(update: &mut Document, now: DateTime) {
    match update.get_mut("$set") {
        Some(Bson::Document(set)) => {
            set.insert("updated_at", now);
        }
        _ => {
            update.insert("$set", doc! { "updated_at": now });
        }
    }
}

fn hint_to_bson(hint: Hint) -> Bson {
    match hint {
        Hint::Keys(keys) => Bson::Document(keys),
        Hint::Name(name) => Bson::String(name),
        _ => Bson::Null,
    }
}

async fn create_index_models<T: Send + Sync>(
    collection: &Collection<T>,
    models: Vec<IndexModel>,
    throw_index_exceptions: bool,
) -> Result<bool> {
    let count = models.len();
    match collection.create_indexes(models).await {
        Ok(_) => {
            tracing::debug!(
                collection = collection.name(),
                indexes = count,
                "indexes created"
            );
            Ok(true)
        }
        Err(error) => {
            if throw_index_exceptions {
                Err(Error::index_build(error.to_string()))
            } else {
                tracing::warn!(
                    collection = collection.name(),
                    %error,
                    "index creation failed"
                );
                Ok(false)
            }
        }
    }
}
