//! The per-context session slot and its transaction state machine.

use mongodb::ClientSession;

use crate::error::{Error, Result};

/// The transaction state of a context's session slot.
///
/// Allowed transitions:
///
/// ```text
/// NoSession      --start_session-->     Idle
/// Idle           --start_transaction--> InTransaction
/// InTransaction  --commit-->            Committed   (session disposed)
/// InTransaction  --abort-->             Aborted     (session reusable)
/// Aborted        --start_transaction--> InTransaction
/// any            --dispose-->           NoSession
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    /// No session has been started.
    NoSession,
    /// A session exists with no active transaction.
    Idle,
    /// A transaction is active on the session.
    InTransaction,
    /// The last transaction committed; the session was disposed.
    Committed,
    /// The last transaction aborted; the session is reusable.
    Aborted,
}

impl TransactionState {
    /// The state after a session is started. Idempotent for states that
    /// already hold a usable session.
    pub(crate) fn on_session_started(self) -> TransactionState {
        match self {
            Self::NoSession | Self::Committed => Self::Idle,
            other => other,
        }
    }

    /// Validates and applies `start_transaction`.
    pub(crate) fn start_transaction(self) -> Result<TransactionState> {
        match self {
            Self::Idle | Self::Aborted => Ok(Self::InTransaction),
            Self::InTransaction => Err(Error::transaction("transaction already in progress")),
            Self::NoSession | Self::Committed => Err(Error::transaction(
                "cannot start a transaction without an active session",
            )),
        }
    }

    /// Validates and applies `commit_transaction`.
    pub(crate) fn commit_transaction(self) -> Result<TransactionState> {
        match self {
            Self::InTransaction => Ok(Self::Committed),
            Self::NoSession | Self::Idle => Err(Error::transaction("no transaction started")),
            Self::Committed => Err(Error::transaction("cannot commit a transaction twice")),
            Self::Aborted => Err(Error::transaction(
                "cannot commit after the transaction was aborted",
            )),
        }
    }

    /// Validates and applies `abort_transaction`.
    pub(crate) fn abort_transaction(self) -> Result<TransactionState> {
        match self {
            Self::InTransaction => Ok(Self::Aborted),
            Self::NoSession | Self::Idle => Err(Error::transaction("no transaction started")),
            Self::Committed => Err(Error::transaction(
                "cannot abort after the transaction was committed",
            )),
            Self::Aborted => Err(Error::transaction("cannot abort a transaction twice")),
        }
    }
}

/// The single session slot owned by a context. Guarded by the context's
/// session lock; all state transitions happen under it.
pub(crate) struct SessionState {
    pub(crate) session: Option<ClientSession>,
    pub(crate) state: TransactionState,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            session: None,
            state: TransactionState::NoSession,
        }
    }

    /// The active session. Callers hold the lock and have ensured the session
    /// exists; absence at this point is an internal invariant violation.
    pub(crate) fn session_mut(&mut self) -> Result<&mut ClientSession> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::internal("session slot is empty while a guard is held"))
    }

    /// Disposes the session, returning the slot to `NoSession`.
    pub(crate) fn dispose(&mut self) {
        self.session = None;
        self.state = TransactionState::NoSession;
    }
}
