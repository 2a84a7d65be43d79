#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(clippy::cast_possible_truncation)]
#![warn(clippy::cast_possible_wrap)]

pub use mongodb;
pub use mongodb::bson;

mod coll;
mod context;
mod cursor;
mod document;
pub mod error;
mod event;
mod index;
pub mod options;
mod query;
mod results;

pub use crate::{
    coll::DbSet,
    context::{
        ContextCollectionMetadata, ContextHooks, DbContext, DefaultHooks, TransactionState,
    },
    cursor::DocumentStream,
    document::{DbDocument, TenantAudit},
    event::{DbEvent, EventCallback},
    index::{
        IndexKeys, IDX_DISABLED, IDX_REF, IDX_REF_DISABLED, IDX_TENANT, IDX_TENANT_REF_DISABLED,
    },
    query::{Query, Update},
    results::PagedResult,
};

/// A boxed future.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
