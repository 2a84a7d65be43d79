//! The shared context owning the client connection, the per-context session
//! and its transaction state machine, the collection-metadata registry, and
//! the pre-write hook pipeline.

mod registry;
mod session;
#[cfg(test)]
mod test;

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
};

use mongodb::{options::ClientOptions, Client, Database, IndexModel};
use tokio::sync::{Mutex, OwnedMutexGuard};
use typed_builder::TypedBuilder;

use crate::{
    bson::Document,
    coll::{DbSet, DbSetOptions},
    document::DbDocument,
    error::{Error, Result},
    event::{self, EventCallback},
    BoxFuture,
};

use self::registry::{InitKey, Snapshot};
use self::session::SessionState;

pub use self::session::TransactionState;

/// An exclusive guard over the context's session slot. Held for the duration
/// of a session-routed operation, or for the lifetime of a session-routed
/// stream.
pub(crate) type SessionGuard = OwnedMutexGuard<SessionState>;

/// Pre-write transformation hooks and the explicit configuration step run
/// once per process for a context key.
///
/// Every hook is total: returning `None` is a caller bug and is surfaced as a
/// fatal `HookNull` error by the context. The default implementations pass
/// their input through unchanged.
pub trait ContextHooks: Send + Sync + 'static {
    /// Transforms a document before it is inserted.
    fn before_insert(&self, document: Document) -> Option<Document> {
        Some(document)
    }

    /// Transforms an update document before it is applied.
    fn before_update(&self, update: Document) -> Option<Document> {
        Some(update)
    }

    /// Transforms a replacement document before it is written.
    fn before_replace(&self, document: Document) -> Option<Document> {
        Some(document)
    }

    /// Transforms an aggregation pipeline before it runs.
    fn before_aggregate(&self, pipeline: Vec<Document>) -> Option<Vec<Document>> {
        Some(pipeline)
    }

    /// One-time registration step: declare additional indexes, create
    /// collections, or seed metadata. Runs once per process for the context's
    /// registry key, before the collection-name snapshot is taken.
    fn configure<'a>(&'a self, context: &'a DbContext) -> BoxFuture<'a, Result<()>> {
        let _ = context;
        Box::pin(async { Ok(()) })
    }
}

/// The pass-through hooks used when a context is built without custom ones.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHooks;

impl ContextHooks for DefaultHooks {}

/// Per-collection metadata recorded when the first handle for a collection is
/// constructed: the declared index keys.
#[derive(Clone, Debug)]
pub struct ContextCollectionMetadata {
    /// The collection name.
    pub name: String,

    /// The indexes declared for the collection, default and user-declared.
    pub index_keys: Vec<IndexModel>,
}

/// Options used to construct a [`DbContext`].
#[derive(Clone, TypedBuilder)]
#[non_exhaustive]
pub struct DbContextOptions {
    /// A standard MongoDB connection string. The database name is taken from
    /// the URI path unless `database_name` overrides it.
    #[builder(setter(into))]
    pub connection_string: String,

    /// Overrides the database name parsed from the connection string.
    #[builder(default, setter(into))]
    pub database_name: Option<String>,

    /// The application name reported to the server.
    #[builder(default, setter(into))]
    pub app_name: Option<String>,

    /// When true, the context starts a session and begins a transaction
    /// immediately, and stays in transactional mode across aborts.
    #[builder(default)]
    pub force_transaction: bool,

    /// Receives every driver-level event observed by the context.
    #[builder(default, setter(into))]
    pub on_event: Option<EventCallback>,
}

struct ContextInner {
    client: Client,
    database: Database,
    database_name: String,
    hooks: Arc<dyn ContextHooks>,
    session: Arc<Mutex<SessionState>>,
    use_transaction: AtomicBool,
    transaction_latched: bool,
    collections: StdMutex<HashMap<String, Arc<ContextCollectionMetadata>>>,
    bootstrap: Mutex<()>,
    collection_names: StdMutex<Snapshot>,
}

/// The process-scoped aggregate owning the connection, one optional
/// transactional session per logical unit of work, and per-collection
/// metadata.
///
/// A `DbContext` is cheap to clone; clones share the connection, the session
/// slot, and the metadata registry. Typed collection handles are obtained
/// with [`DbContext::db_set`].
#[derive(Clone)]
pub struct DbContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for DbContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbContext")
            .field("database", &self.inner.database_name)
            .finish()
    }
}

impl DbContext {
    /// Connects with the pass-through [`DefaultHooks`].
    pub async fn connect(options: DbContextOptions) -> Result<Self> {
        Self::connect_with_hooks(options, DefaultHooks).await
    }

    /// Connects with custom hooks. The hook type participates in the
    /// process-wide bootstrap key, so two contexts with different hook types
    /// bootstrap independently.
    pub async fn connect_with_hooks<H: ContextHooks>(
        options: DbContextOptions,
        hooks: H,
    ) -> Result<Self> {
        let mut client_options = ClientOptions::parse(&options.connection_string)
            .await
            .map_err(Error::from)?;

        let database_name = options
            .database_name
            .clone()
            .or_else(|| client_options.default_database.clone())
            .ok_or_else(|| {
                Error::invalid_argument(
                    "the connection string carries no database name and none was provided",
                )
            })?;

        if options.app_name.is_some() {
            client_options.app_name = options.app_name.clone();
        }
        if let Some(ref callback) = options.on_event {
            event::install(&mut client_options, Arc::clone(callback));
        }

        let client = Client::with_options(client_options).map_err(Error::from)?;
        let database = client.database(&database_name);

        let context = Self {
            inner: Arc::new(ContextInner {
                client,
                database,
                database_name: database_name.clone(),
                hooks: Arc::new(hooks),
                session: Arc::new(Mutex::new(SessionState::new())),
                use_transaction: AtomicBool::new(false),
                transaction_latched: options.force_transaction,
                collections: StdMutex::new(HashMap::new()),
                bootstrap: Mutex::new(()),
                collection_names: StdMutex::new(Arc::new(Vec::new())),
            }),
        };

        let key = InitKey::new(
            std::any::type_name::<H>(),
            &options.connection_string,
            &database_name,
        );
        context.bootstrap_once(key).await?;

        if options.force_transaction {
            context.start_session().await?;
            context.start_transaction().await?;
        }

        Ok(context)
    }

    /// Runs user configuration and snapshots the collection names, once per
    /// process for `key`.
    async fn bootstrap_once(&self, key: InitKey) -> Result<()> {
        let cell = registry::cell(key);
        let snapshot = cell
            .get_or_try_init(|| async {
                self.inner.hooks.configure(self).await?;
                let names = self
                    .inner
                    .database
                    .list_collection_names()
                    .await
                    .map_err(Error::from)?;
                tracing::debug!(
                    database = %self.inner.database_name,
                    collections = names.len(),
                    "context bootstrap complete"
                );
                Ok::<Snapshot, Error>(Arc::new(names))
            })
            .await?
            .clone();
        *lock_std(&self.inner.collection_names) = snapshot;
        Ok(())
    }

    /// The underlying driver client.
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// The database this context is bound to.
    pub fn database(&self) -> &Database {
        &self.inner.database
    }

    /// The database name parsed from the connection string.
    pub fn database_name(&self) -> &str {
        &self.inner.database_name
    }

    /// The collection names snapshotted at bootstrap.
    pub fn collection_names(&self) -> Arc<Vec<String>> {
        lock_std(&self.inner.collection_names).clone()
    }

    /// Refreshes the collection-name snapshot from the server.
    pub async fn refresh_collection_names(&self) -> Result<Arc<Vec<String>>> {
        let names = Arc::new(
            self.inner
                .database
                .list_collection_names()
                .await
                .map_err(Error::from)?,
        );
        *lock_std(&self.inner.collection_names) = Arc::clone(&names);
        Ok(names)
    }

    /// Creates a collection if it does not exist yet. With
    /// [`TimeSeriesOptions`](crate::coll::options::TimeSeriesOptions) the
    /// collection is created as a time series.
    pub async fn create_collection(
        &self,
        name: &str,
        timeseries: Option<crate::coll::options::TimeSeriesOptions>,
    ) -> Result<()> {
        let existing = self
            .inner
            .database
            .list_collection_names()
            .await
            .map_err(Error::from)?;
        if existing.iter().any(|n| n == name) {
            return Ok(());
        }

        let action = self.inner.database.create_collection(name);
        match timeseries {
            Some(options) => action
                .with_options(options.to_create_collection_options())
                .await
                .map_err(Error::from)?,
            None => action.await.map_err(Error::from)?,
        }
        Ok(())
    }

    /// Obtains the typed handle for `T`'s default collection. The first call
    /// for a collection declares and creates its indexes.
    pub async fn db_set<T: DbDocument>(&self) -> Result<DbSet<T>> {
        DbSet::new(self.clone(), DbSetOptions::default()).await
    }

    /// Obtains a typed handle with an explicit collection name or index
    /// failure behavior.
    pub async fn db_set_with<T: DbDocument>(&self, options: DbSetOptions) -> Result<DbSet<T>> {
        DbSet::new(self.clone(), options).await
    }

    /// Starts the context's session if none exists. Idempotent.
    pub async fn start_session(&self) -> Result<()> {
        let mut guard = self.inner.session.lock().await;
        self.ensure_session(&mut guard).await
    }

    /// Whether a session currently exists.
    pub async fn has_session(&self) -> bool {
        self.inner.session.lock().await.session.is_some()
    }

    /// The current transaction state of the session slot.
    pub async fn transaction_state(&self) -> TransactionState {
        self.inner.session.lock().await.state
    }

    /// Whether operations default to running inside the context's
    /// transaction.
    pub fn in_transaction_mode(&self) -> bool {
        self.inner.use_transaction.load(Ordering::SeqCst)
    }

    /// Begins a transaction on the context's session, creating the session if
    /// necessary. Fails with a `Transaction` error when a transaction is
    /// already in progress.
    pub async fn start_transaction(&self) -> Result<()> {
        let mut guard = self.inner.session.lock().await;
        self.ensure_session(&mut guard).await?;
        let next = guard.state.start_transaction()?;
        guard.session_mut()?.start_transaction().await?;
        guard.state = next;
        self.inner.use_transaction.store(true, Ordering::SeqCst);
        tracing::debug!(database = %self.inner.database_name, "transaction started");
        Ok(())
    }

    /// Commits the active transaction and disposes the session.
    pub async fn commit_transaction(&self) -> Result<()> {
        let mut guard = self.inner.session.lock().await;
        let next = guard.state.commit_transaction()?;
        guard.session_mut()?.commit_transaction().await?;
        guard.state = next;
        guard.session = None;
        if !self.inner.transaction_latched {
            self.inner.use_transaction.store(false, Ordering::SeqCst);
        }
        tracing::debug!(database = %self.inner.database_name, "transaction committed");
        Ok(())
    }

    /// Aborts the active transaction. The session stays usable; the next
    /// `start_transaction` reuses it.
    pub async fn abort_transaction(&self) -> Result<()> {
        let mut guard = self.inner.session.lock().await;
        let next = guard.state.abort_transaction()?;
        // Abort failures leave the server to expire the transaction.
        let _ = guard.session_mut()?.abort_transaction().await;
        guard.state = next;
        if !self.inner.transaction_latched {
            self.inner.use_transaction.store(false, Ordering::SeqCst);
        }
        tracing::debug!(database = %self.inner.database_name, "transaction aborted");
        Ok(())
    }

    /// Aborts any active transaction and releases the session. The context
    /// stays usable; a later transactional operation starts a fresh session.
    pub async fn dispose(&self) -> Result<()> {
        let mut guard = self.inner.session.lock().await;
        if guard.state == TransactionState::InTransaction {
            if let Ok(session) = guard.session_mut() {
                let _ = session.abort_transaction().await;
            }
        }
        guard.dispose();
        Ok(())
    }

    /// Decides the session routing for one operation.
    ///
    /// `force = Some(true)` always routes through the session, creating one
    /// if needed. `Some(false)` never does. `None` follows the context's
    /// transactional mode.
    pub(crate) async fn transaction_session(
        &self,
        force: Option<bool>,
    ) -> Result<Option<SessionGuard>> {
        let use_session = match force {
            Some(force) => force,
            None => self.in_transaction_mode(),
        };
        if !use_session {
            return Ok(None);
        }
        let mut guard = Arc::clone(&self.inner.session).lock_owned().await;
        self.ensure_session(&mut guard).await?;
        Ok(Some(guard))
    }

    async fn ensure_session(&self, state: &mut SessionState) -> Result<()> {
        if state.session.is_none() {
            let session = self
                .inner
                .client
                .start_session()
                .await
                .map_err(Error::from)?;
            state.session = Some(session);
            state.state = state.state.on_session_started();
        }
        Ok(())
    }

    pub(crate) fn run_before_insert(&self, document: Document) -> Result<Document> {
        self.inner
            .hooks
            .before_insert(document)
            .ok_or_else(|| Error::hook_null("before_insert"))
    }

    pub(crate) fn run_before_update(&self, update: Document) -> Result<Document> {
        self.inner
            .hooks
            .before_update(update)
            .ok_or_else(|| Error::hook_null("before_update"))
    }

    pub(crate) fn run_before_replace(&self, document: Document) -> Result<Document> {
        self.inner
            .hooks
            .before_replace(document)
            .ok_or_else(|| Error::hook_null("before_replace"))
    }

    pub(crate) fn run_before_aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        self.inner
            .hooks
            .before_aggregate(pipeline)
            .ok_or_else(|| Error::hook_null("before_aggregate"))
    }

    /// The metadata recorded for a collection, if a handle was constructed.
    pub fn collection_metadata(&self, name: &str) -> Option<Arc<ContextCollectionMetadata>> {
        lock_std(&self.inner.collections).get(name).cloned()
    }

    pub(crate) fn insert_collection_metadata(
        &self,
        metadata: ContextCollectionMetadata,
    ) -> Arc<ContextCollectionMetadata> {
        let mut map = lock_std(&self.inner.collections);
        Arc::clone(
            map.entry(metadata.name.clone())
                .or_insert_with(|| Arc::new(metadata)),
        )
    }

    pub(crate) fn handle_bootstrap_lock(&self) -> &Mutex<()> {
        &self.inner.bootstrap
    }
}

fn lock_std<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
