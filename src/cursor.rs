//! Streaming adapters over driver cursors.
//!
//! All lazy sequences returned by this crate are [`DocumentStream`]s. Each
//! stream owns its driver cursor; dropping the stream early disposes the
//! cursor through the driver. A stream obtained under the context's
//! transaction also owns the session guard, so the session cannot be shared
//! with a concurrent consumer while the stream is alive.

use std::pin::Pin;

use futures_core::Stream;
use futures_util::stream;
use mongodb::{Cursor, SessionCursor};
use serde::de::DeserializeOwned;

use crate::{
    context::SessionGuard,
    error::{Error, Result},
};

/// An asynchronous sequence of results. The consumer pulls one driver batch
/// per suspension point; backpressure belongs to the consumer.
pub type DocumentStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

/// Adapts a sessionless driver cursor.
pub(crate) fn from_cursor<T>(cursor: Cursor<T>) -> DocumentStream<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    Box::pin(stream::try_unfold(cursor, |mut cursor| async move {
        if cursor.advance().await.map_err(Error::from)? {
            let document = cursor.deserialize_current().map_err(Error::from)?;
            Ok(Some((document, cursor)))
        } else {
            Ok(None)
        }
    }))
}

/// Adapts a session-bound driver cursor. The stream holds the session guard
/// until it is exhausted or dropped.
pub(crate) fn from_session_cursor<T>(
    cursor: SessionCursor<T>,
    guard: SessionGuard,
) -> DocumentStream<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    Box::pin(stream::try_unfold(
        (cursor, guard),
        |(mut cursor, mut guard)| async move {
            let session = guard.session_mut()?;
            if cursor.advance(session).await.map_err(Error::from)? {
                let document = cursor.deserialize_current().map_err(Error::from)?;
                Ok(Some((document, (cursor, guard))))
            } else {
                Ok(None)
            }
        },
    ))
}

/// Drains a session-bound cursor into a vector while the guard is held.
pub(crate) async fn collect_session_cursor<T>(
    mut cursor: SessionCursor<T>,
    mut guard: SessionGuard,
) -> Result<Vec<T>>
where
    T: DeserializeOwned + Send + Sync,
{
    let mut items = Vec::new();
    let session = guard.session_mut()?;
    while cursor.advance(session).await.map_err(Error::from)? {
        items.push(cursor.deserialize_current().map_err(Error::from)?);
    }
    Ok(items)
}

/// Drains a sessionless cursor into a vector.
pub(crate) async fn collect_cursor<T>(mut cursor: Cursor<T>) -> Result<Vec<T>>
where
    T: DeserializeOwned + Send + Sync,
{
    let mut items = Vec::new();
    while cursor.advance().await.map_err(Error::from)? {
        items.push(cursor.deserialize_current().map_err(Error::from)?);
    }
    Ok(items)
}
