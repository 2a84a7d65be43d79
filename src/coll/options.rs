//! Option records for the operations exposed by [`DbSet`](crate::DbSet).
//!
//! Every record carries `not_perform_in_transaction`, which forces an
//! operation out of the context's transaction even when the context is in
//! transactional mode. Each family converts to its driver counterpart through
//! one total `From` implementation; unrecognized driver fields are left at
//! their defaults.

use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::bson::{Bson, Document};

pub use mongodb::options::{
    Collation, CursorType, Hint, ReturnDocument, TimeseriesGranularity, WriteConcern,
};

/// Negation of `not_perform_in_transaction`, fed into the context's routing
/// decision. `None` leaves the decision to the context's transaction mode.
pub(crate) fn transaction_force(not_perform_in_transaction: Option<bool>) -> Option<bool> {
    not_perform_in_transaction.map(|skip| !skip)
}

/// Options for the find family of operations.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct FindOptions {
    /// The collation to use for string comparison.
    pub collation: Option<Collation>,

    /// Enables writing to temporary files by the server.
    pub allow_disk_use: Option<bool>,

    /// If true, partial results are returned from available shards rather
    /// than an error when one or more shards is down.
    pub allow_partial_results: Option<bool>,

    /// The maximum amount of time to allow the query to run.
    pub max_time: Option<Duration>,

    /// The number of documents the server returns per cursor batch.
    pub batch_size: Option<u32>,

    /// Tags the query to help trace it through the database profiler.
    pub comment: Option<Bson>,

    /// The type of cursor to return.
    pub cursor_type: Option<CursorType>,

    /// The maximum amount of time for the server to wait on new documents to
    /// satisfy a tailable cursor query.
    pub max_await_time: Option<Duration>,

    /// Whether the server should close the cursor after a period of
    /// inactivity.
    pub no_cursor_timeout: Option<bool>,

    /// Whether to return only the index keys in the documents.
    pub return_key: Option<bool>,

    /// Whether to return the record identifier for each document.
    pub show_record_id: Option<bool>,

    /// The number of documents to skip before returning.
    pub skip: Option<u64>,

    /// The maximum number of documents to return.
    pub limit: Option<i64>,

    /// The order of the returned documents.
    pub sort: Option<Document>,

    /// Limits the fields of the returned documents.
    pub projection: Option<Document>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// Forces this operation out of the context's transaction.
    pub not_perform_in_transaction: Option<bool>,
}

impl From<FindOptions> for mongodb::options::FindOptions {
    fn from(options: FindOptions) -> Self {
        let mut driver = mongodb::options::FindOptions::default();
        driver.collation = options.collation;
        driver.allow_disk_use = options.allow_disk_use;
        driver.allow_partial_results = options.allow_partial_results;
        driver.max_time = options.max_time;
        driver.batch_size = options.batch_size;
        driver.comment = options.comment;
        driver.cursor_type = options.cursor_type;
        driver.max_await_time = options.max_await_time;
        driver.no_cursor_timeout = options.no_cursor_timeout;
        driver.return_key = options.return_key;
        driver.show_record_id = options.show_record_id;
        driver.skip = options.skip;
        driver.limit = options.limit;
        driver.sort = options.sort;
        driver.projection = options.projection;
        driver.hint = options.hint;
        driver
    }
}

impl From<FindOptions> for mongodb::options::FindOneOptions {
    fn from(options: FindOptions) -> Self {
        let mut driver = mongodb::options::FindOneOptions::default();
        driver.collation = options.collation;
        driver.allow_partial_results = options.allow_partial_results;
        driver.max_time = options.max_time;
        driver.comment = options.comment;
        driver.return_key = options.return_key;
        driver.show_record_id = options.show_record_id;
        driver.skip = options.skip;
        driver.sort = options.sort;
        driver.projection = options.projection;
        driver.hint = options.hint;
        driver
    }
}

/// Find options for paged reads. `skip` and `limit` are derived from the page
/// coordinates: `skip = current_page * page_size`, `limit = page_size`.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct FindOptionsPaging {
    /// The zero-based page to return.
    pub current_page: u64,

    /// The number of documents per page. Must be positive.
    pub page_size: i64,

    /// The collation to use for string comparison.
    pub collation: Option<Collation>,

    /// Enables writing to temporary files by the server.
    pub allow_disk_use: Option<bool>,

    /// The maximum amount of time to allow the query to run.
    pub max_time: Option<Duration>,

    /// The number of documents the server returns per cursor batch.
    pub batch_size: Option<u32>,

    /// Tags the query to help trace it through the database profiler.
    pub comment: Option<Bson>,

    /// The order of the returned documents.
    pub sort: Option<Document>,

    /// Limits the fields of the returned documents.
    pub projection: Option<Document>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// Forces this operation out of the context's transaction.
    pub not_perform_in_transaction: Option<bool>,
}

impl FindOptionsPaging {
    /// The number of documents skipped before the requested page.
    pub fn skip(&self) -> u64 {
        self.current_page * self.page_size.max(0) as u64
    }

    /// The page size as a find limit.
    pub fn limit(&self) -> i64 {
        self.page_size
    }

    /// The count options for the "total under filter" observation: all
    /// recognized count fields copied, skip and limit cleared.
    pub(crate) fn to_count_options(&self) -> mongodb::options::CountOptions {
        let mut driver = mongodb::options::CountOptions::default();
        driver.collation = self.collation.clone();
        driver.comment = self.comment.clone();
        driver.hint = self.hint.clone();
        driver.max_time = self.max_time;
        driver
    }
}

impl From<FindOptionsPaging> for mongodb::options::FindOptions {
    fn from(options: FindOptionsPaging) -> Self {
        let mut driver = mongodb::options::FindOptions::default();
        driver.skip = Some(options.skip());
        driver.limit = Some(options.limit());
        driver.collation = options.collation;
        driver.allow_disk_use = options.allow_disk_use;
        driver.max_time = options.max_time;
        driver.batch_size = options.batch_size;
        driver.comment = options.comment;
        driver.sort = options.sort;
        driver.projection = options.projection;
        driver.hint = options.hint;
        driver
    }
}

/// Options for count operations.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct CountOptions {
    /// The collation to use for string comparison.
    pub collation: Option<Collation>,

    /// Tags the query to help trace it through the database profiler.
    pub comment: Option<Bson>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// The maximum amount of time to allow the count to run.
    pub max_time: Option<Duration>,

    /// The number of documents to skip before counting.
    pub skip: Option<u64>,

    /// The maximum number of documents to count.
    pub limit: Option<u64>,

    /// Forces this operation out of the context's transaction.
    pub not_perform_in_transaction: Option<bool>,
}

impl From<CountOptions> for mongodb::options::CountOptions {
    fn from(options: CountOptions) -> Self {
        let mut driver = mongodb::options::CountOptions::default();
        driver.collation = options.collation;
        driver.comment = options.comment;
        driver.hint = options.hint;
        driver.max_time = options.max_time;
        driver.skip = options.skip;
        driver.limit = options.limit;
        driver
    }
}

/// Options for update operations.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct UpdateOptions {
    /// The collation to use for string comparison.
    pub collation: Option<Collation>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// If true, insert a document when no matching document is found.
    pub upsert: Option<bool>,

    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// Filters selecting the array elements an update applies to.
    pub array_filters: Option<Vec<Document>>,

    /// Variables usable within the update under `$$`.
    pub let_vars: Option<Document>,

    /// The write concern for the operation. Overrides the collection default;
    /// an unacknowledged concern makes the operation return the -1 sentinel.
    pub write_concern: Option<WriteConcern>,

    /// Forces this operation out of the context's transaction.
    pub not_perform_in_transaction: Option<bool>,
}

impl From<UpdateOptions> for mongodb::options::UpdateOptions {
    fn from(options: UpdateOptions) -> Self {
        let mut driver = mongodb::options::UpdateOptions::default();
        driver.collation = options.collation;
        driver.hint = options.hint;
        driver.upsert = options.upsert;
        driver.bypass_document_validation = options.bypass_document_validation;
        driver.array_filters = options.array_filters;
        driver.let_vars = options.let_vars;
        driver.write_concern = options.write_concern;
        driver
    }
}

/// Options for find-one-and-update operations.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct FindOneAndUpdateOptions {
    /// Filters selecting the array elements an update applies to.
    pub array_filters: Option<Vec<Document>>,

    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// The collation to use for string comparison.
    pub collation: Option<Collation>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// Variables usable within the update under `$$`.
    pub let_vars: Option<Document>,

    /// The maximum amount of time to allow the operation to run.
    pub max_time: Option<Duration>,

    /// Limits the fields of the returned document.
    pub projection: Option<Document>,

    /// When true the operation returns the document after modification,
    /// otherwise the document before.
    pub return_document_after: Option<bool>,

    /// The sort deciding which of several matching documents is operated on.
    pub sort: Option<Document>,

    /// If true, insert a document when no matching document is found.
    pub is_upsert: Option<bool>,

    /// The write concern for the operation. Overrides the collection default;
    /// an unacknowledged concern makes the operation return the -1 sentinel.
    pub write_concern: Option<WriteConcern>,

    /// Forces this operation out of the context's transaction.
    pub not_perform_in_transaction: Option<bool>,
}

impl From<FindOneAndUpdateOptions> for mongodb::options::FindOneAndUpdateOptions {
    fn from(options: FindOneAndUpdateOptions) -> Self {
        let mut driver = mongodb::options::FindOneAndUpdateOptions::default();
        driver.array_filters = options.array_filters;
        driver.bypass_document_validation = options.bypass_document_validation;
        driver.collation = options.collation;
        driver.hint = options.hint;
        driver.let_vars = options.let_vars;
        driver.max_time = options.max_time;
        driver.projection = options.projection;
        driver.return_document = options.return_document_after.map(|after| {
            if after {
                ReturnDocument::After
            } else {
                ReturnDocument::Before
            }
        });
        driver.sort = options.sort;
        driver.upsert = options.is_upsert;
        driver.write_concern = options.write_concern;
        driver
    }
}

/// Options for replace operations.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct ReplaceOptions {
    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// The collation to use for string comparison.
    pub collation: Option<Collation>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// Variables usable within the filter under `$$`.
    pub let_vars: Option<Document>,

    /// If true, insert the document when no matching document is found.
    pub upsert: Option<bool>,

    /// The write concern for the operation. Overrides the collection default;
    /// an unacknowledged concern makes the operation return the -1 sentinel.
    pub write_concern: Option<WriteConcern>,

    /// Forces this operation out of the context's transaction.
    pub not_perform_in_transaction: Option<bool>,
}

impl From<ReplaceOptions> for mongodb::options::ReplaceOptions {
    fn from(options: ReplaceOptions) -> Self {
        let mut driver = mongodb::options::ReplaceOptions::default();
        driver.bypass_document_validation = options.bypass_document_validation;
        driver.collation = options.collation;
        driver.hint = options.hint;
        driver.let_vars = options.let_vars;
        driver.upsert = options.upsert;
        driver.write_concern = options.write_concern;
        driver
    }
}

/// Options for bulk writes.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct BulkWriteOptions {
    /// If true, the writes are executed in order and execution stops at the
    /// first error. Bulk writes default to unordered; bulks translated from
    /// [`InsertManyOptions`] default to ordered.
    pub is_ordered: Option<bool>,

    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// Tags the operation to help trace it through the database profiler.
    pub comment: Option<Bson>,

    /// Variables usable within the filters under `$$`.
    pub let_vars: Option<Document>,

    /// The write concern for the operation. Overrides the collection default;
    /// an unacknowledged concern makes the operation return the -1 sentinel.
    pub write_concern: Option<WriteConcern>,

    /// Forces this operation out of the context's transaction.
    pub not_perform_in_transaction: Option<bool>,
}

impl BulkWriteOptions {
    pub(crate) fn into_driver(
        self,
        default_ordered: bool,
    ) -> mongodb::options::BulkWriteOptions {
        let mut driver = mongodb::options::BulkWriteOptions::default();
        driver.ordered = Some(self.is_ordered.unwrap_or(default_ordered));
        driver.bypass_document_validation = self.bypass_document_validation;
        driver.comment = self.comment;
        driver.let_vars = self.let_vars;
        driver.write_concern = self.write_concern;
        driver
    }
}

impl From<BulkWriteOptions> for mongodb::options::BulkWriteOptions {
    fn from(options: BulkWriteOptions) -> Self {
        options.into_driver(false)
    }
}

/// Options for delete operations.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct DeleteOptions {
    /// The collation to use for string comparison.
    pub collation: Option<Collation>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// Tags the operation to help trace it through the database profiler.
    pub comment: Option<Bson>,

    /// Variables usable within the filter under `$$`.
    pub let_vars: Option<Document>,

    /// The write concern for the operation. Overrides the collection default;
    /// an unacknowledged concern makes the operation return the -1 sentinel.
    pub write_concern: Option<WriteConcern>,

    /// Forces this operation out of the context's transaction.
    pub not_perform_in_transaction: Option<bool>,
}

impl From<DeleteOptions> for mongodb::options::DeleteOptions {
    fn from(options: DeleteOptions) -> Self {
        let mut driver = mongodb::options::DeleteOptions::default();
        driver.collation = options.collation;
        driver.hint = options.hint;
        driver.comment = options.comment;
        driver.let_vars = options.let_vars;
        driver.write_concern = options.write_concern;
        driver
    }
}

/// Options for single-document inserts.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct InsertOneOptions {
    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// Tags the operation to help trace it through the database profiler.
    pub comment: Option<Bson>,

    /// The write concern for the operation. Overrides the collection default;
    /// an unacknowledged concern makes the operation return the -1 sentinel.
    pub write_concern: Option<WriteConcern>,

    /// Forces this operation out of the context's transaction.
    pub not_perform_in_transaction: Option<bool>,
}

impl From<InsertOneOptions> for mongodb::options::InsertOneOptions {
    fn from(options: InsertOneOptions) -> Self {
        let mut driver = mongodb::options::InsertOneOptions::default();
        driver.bypass_document_validation = options.bypass_document_validation;
        driver.comment = options.comment;
        driver.write_concern = options.write_concern;
        driver
    }
}

/// Options for multi-document inserts. Translated field-by-field onto
/// [`BulkWriteOptions`]; `ordered` defaults to `true` on translation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct InsertManyOptions {
    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// Tags the operation to help trace it through the database profiler.
    pub comment: Option<Bson>,

    /// If true, the inserts are executed in order and execution stops at the
    /// first error.
    pub ordered: Option<bool>,

    /// The write concern for the operation. Overrides the collection default;
    /// an unacknowledged concern makes the operation return the -1 sentinel.
    pub write_concern: Option<WriteConcern>,

    /// Forces this operation out of the context's transaction.
    pub not_perform_in_transaction: Option<bool>,
}

impl From<InsertManyOptions> for BulkWriteOptions {
    fn from(options: InsertManyOptions) -> Self {
        BulkWriteOptions {
            is_ordered: Some(options.ordered.unwrap_or(true)),
            bypass_document_validation: options.bypass_document_validation,
            comment: options.comment,
            let_vars: None,
            write_concern: options.write_concern,
            not_perform_in_transaction: options.not_perform_in_transaction,
        }
    }
}

/// Options for aggregation operations.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct AggregateOptions {
    /// Enables writing to temporary files by the server.
    pub allow_disk_use: Option<bool>,

    /// The number of documents the server returns per cursor batch.
    pub batch_size: Option<u32>,

    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// The collation to use for string comparison.
    pub collation: Option<Collation>,

    /// Tags the operation to help trace it through the database profiler.
    pub comment: Option<Bson>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// The maximum amount of time for the server to wait on new documents.
    pub max_await_time: Option<Duration>,

    /// The maximum amount of time to allow the pipeline to run.
    pub max_time: Option<Duration>,

    /// Variables usable within the pipeline under `$$`.
    pub let_vars: Option<Document>,

    /// Forces this operation out of the context's transaction.
    pub not_perform_in_transaction: Option<bool>,
}

impl From<AggregateOptions> for mongodb::options::AggregateOptions {
    fn from(options: AggregateOptions) -> Self {
        let mut driver = mongodb::options::AggregateOptions::default();
        driver.allow_disk_use = options.allow_disk_use;
        driver.batch_size = options.batch_size;
        driver.bypass_document_validation = options.bypass_document_validation;
        driver.collation = options.collation;
        driver.comment = options.comment;
        driver.hint = options.hint;
        driver.max_await_time = options.max_await_time;
        driver.max_time = options.max_time;
        driver.let_vars = options.let_vars;
        driver
    }
}

/// Aggregation options for the faceted paging protocol. `skip` and `limit`
/// default to the page coordinates when not given explicitly.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct AggregateOptionsPaging {
    /// The zero-based page to return.
    pub current_page: u64,

    /// The number of documents per page.
    pub page_size: i64,

    /// Overrides the number of documents skipped ahead of the page.
    pub skip: Option<i64>,

    /// Overrides the maximum number of documents in the page.
    pub limit: Option<i64>,

    /// Enables writing to temporary files by the server.
    pub allow_disk_use: Option<bool>,

    /// The number of documents the server returns per cursor batch.
    pub batch_size: Option<u32>,

    /// The collation to use for string comparison.
    pub collation: Option<Collation>,

    /// Tags the operation to help trace it through the database profiler.
    pub comment: Option<Bson>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// The maximum amount of time to allow the pipeline to run.
    pub max_time: Option<Duration>,

    /// Forces this operation out of the context's transaction.
    pub not_perform_in_transaction: Option<bool>,
}

impl AggregateOptionsPaging {
    /// The number of documents skipped ahead of the requested page.
    pub fn skip(&self) -> i64 {
        self.skip
            .unwrap_or_else(|| (self.current_page as i64).saturating_mul(self.page_size))
    }

    /// The maximum number of documents in the page.
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(self.page_size)
    }
}

impl From<AggregateOptionsPaging> for mongodb::options::AggregateOptions {
    fn from(options: AggregateOptionsPaging) -> Self {
        let mut driver = mongodb::options::AggregateOptions::default();
        driver.allow_disk_use = options.allow_disk_use;
        driver.batch_size = options.batch_size;
        driver.collation = options.collation;
        driver.comment = options.comment;
        driver.hint = options.hint;
        driver.max_time = options.max_time;
        driver
    }
}

/// Options for full-text search queries.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct FullTextSearchOptions {
    /// The language of the search. Defaults to the text index's language.
    pub language: Option<String>,

    /// Whether the search is case sensitive.
    pub case_sensitive: Option<bool>,

    /// Whether the search distinguishes diacritics.
    pub diacritic_sensitive: Option<bool>,

    /// Forces this operation out of the context's transaction.
    pub not_perform_in_transaction: Option<bool>,
}

/// Options for creating a time-series collection.
#[derive(Clone, Debug, TypedBuilder)]
#[non_exhaustive]
pub struct TimeSeriesOptions {
    /// The field holding the date in each time-series document.
    #[builder(setter(into))]
    pub time_field: String,

    /// The field used to group related documents.
    #[builder(default, setter(into))]
    pub meta_field: Option<String>,

    /// The coarse interval between measurements.
    #[builder(default, setter(into))]
    pub granularity: Option<TimeseriesGranularity>,

    /// Seconds after which the server deletes expired measurements.
    #[builder(default, setter(into))]
    pub expire_after_seconds: Option<u64>,
}

impl TimeSeriesOptions {
    pub(crate) fn to_create_collection_options(&self) -> mongodb::options::CreateCollectionOptions {
        let timeseries = mongodb::options::TimeseriesOptions::builder()
            .time_field(self.time_field.clone())
            .meta_field(self.meta_field.clone())
            .granularity(self.granularity.clone())
            .build();

        let mut driver = mongodb::options::CreateCollectionOptions::default();
        driver.timeseries = Some(timeseries);
        driver.expire_after_seconds = self.expire_after_seconds.map(Duration::from_secs);
        driver
    }
}
