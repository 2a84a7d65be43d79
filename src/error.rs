//! Contains the `Error` and `Result` types that `dbset` uses.

use std::sync::Arc;

use thiserror::Error;

/// The result type for all methods that can return an error in the `dbset` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the `dbset` crate. The inner
/// [`ErrorKind`] is boxed to keep the type small on the happy path.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn transaction(message: impl Into<String>) -> Self {
        ErrorKind::Transaction {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn hook_null(hook: &'static str) -> Self {
        ErrorKind::HookNull { hook }.into()
    }

    pub(crate) fn query_incomplete(message: impl Into<String>) -> Self {
        ErrorKind::QueryIncomplete {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn index_build(message: impl Into<String>) -> Self {
        ErrorKind::IndexBuild {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    /// Whether this error wraps an error raised by the underlying driver.
    pub fn is_driver_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Driver(..))
    }

    /// Whether this error was caused by an illegal transaction-state transition.
    pub fn is_transaction_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Transaction { .. })
    }

    /// Whether this error was caused by an invalid argument.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::InvalidArgument { .. })
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into())
    }
}

impl From<mongodb::error::Error> for ErrorKind {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Driver(err)
    }
}

impl From<crate::bson::ser::Error> for ErrorKind {
    fn from(err: crate::bson::ser::Error) -> Self {
        Self::BsonSerialization(Arc::new(err))
    }
}

impl From<crate::bson::de::Error> for ErrorKind {
    fn from(err: crate::bson::de::Error) -> Self {
        Self::BsonDeserialization(Arc::new(err))
    }
}

impl From<serde_json::Error> for ErrorKind {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided, e.g. non-positive paging values.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// An illegal transaction-state transition was attempted.
    #[error("{message}")]
    #[non_exhaustive]
    Transaction { message: String },

    /// A pre-write hook returned no document. Hooks are total; a missing
    /// result is a caller bug.
    #[error("the {hook} hook returned no document")]
    #[non_exhaustive]
    HookNull { hook: &'static str },

    /// A query with an unbound parameter was rendered without
    /// `complete_expression` being called first.
    #[error("{message}")]
    #[non_exhaustive]
    QueryIncomplete { message: String },

    /// Creating indexes failed. Surfaced only when the handle was constructed
    /// with `throw_index_exceptions`; otherwise logged and swallowed.
    #[error("index creation failed: {message}")]
    #[non_exhaustive]
    IndexBuild { message: String },

    /// Wrapper around `mongodb::error::Error`. Driver errors propagate
    /// unchanged.
    #[error("{0}")]
    Driver(mongodb::error::Error),

    /// Wrapper around `bson::ser::Error`.
    #[error("{0}")]
    BsonSerialization(Arc<crate::bson::ser::Error>),

    /// Wrapper around `bson::de::Error`.
    #[error("{0}")]
    BsonDeserialization(Arc<crate::bson::de::Error>),

    /// Wrapper around `serde_json::Error`.
    #[error("{0}")]
    Json(Arc<serde_json::Error>),

    #[error("Internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },
}

#[cfg(test)]
mod test {
    use super::{Error, ErrorKind};

    #[test]
    fn kind_predicates() {
        assert!(Error::invalid_argument("bad page").is_invalid_argument());
        assert!(Error::transaction("no transaction started").is_transaction_error());
        assert!(!Error::transaction("x").is_driver_error());
    }

    #[test]
    fn hook_null_names_the_hook() {
        let error = Error::hook_null("before_insert");
        assert!(matches!(
            error.kind.as_ref(),
            ErrorKind::HookNull { hook: "before_insert" }
        ));
        assert!(error.to_string().contains("before_insert"));
    }

    #[test]
    fn json_errors_convert() {
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: Error = json.into();
        assert!(matches!(error.kind.as_ref(), ErrorKind::Json(_)));
    }
}
