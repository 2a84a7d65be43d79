use super::{registry, TransactionState};
use super::TransactionState::*;

#[test]
fn session_start_is_idempotent_for_live_states() {
    assert_eq!(NoSession.on_session_started(), Idle);
    assert_eq!(Committed.on_session_started(), Idle);
    assert_eq!(Idle.on_session_started(), Idle);
    assert_eq!(InTransaction.on_session_started(), InTransaction);
    assert_eq!(Aborted.on_session_started(), Aborted);
}

#[test]
fn start_requires_idle_or_aborted() {
    assert_eq!(Idle.start_transaction().unwrap(), InTransaction);
    assert_eq!(Aborted.start_transaction().unwrap(), InTransaction);
    assert!(InTransaction.start_transaction().unwrap_err().is_transaction_error());
    assert!(NoSession.start_transaction().unwrap_err().is_transaction_error());
    assert!(Committed.start_transaction().unwrap_err().is_transaction_error());
}

#[test]
fn commit_requires_in_transaction() {
    assert_eq!(InTransaction.commit_transaction().unwrap(), Committed);
    for state in [NoSession, Idle, Committed, Aborted] {
        assert!(state.commit_transaction().unwrap_err().is_transaction_error());
    }
}

#[test]
fn abort_requires_in_transaction() {
    assert_eq!(InTransaction.abort_transaction().unwrap(), Aborted);
    for state in [NoSession, Idle, Committed, Aborted] {
        assert!(state.abort_transaction().unwrap_err().is_transaction_error());
    }
}

#[test]
fn aborted_transaction_can_restart_but_committed_needs_a_session() {
    // InTransaction -> Aborted -> InTransaction is legal on the same session.
    let aborted = InTransaction.abort_transaction().unwrap();
    assert_eq!(aborted.start_transaction().unwrap(), InTransaction);

    // InTransaction -> Committed disposes the session; a new one is needed.
    let committed = InTransaction.commit_transaction().unwrap();
    assert!(committed.start_transaction().is_err());
    assert_eq!(committed.on_session_started().start_transaction().unwrap(), InTransaction);
}

#[test]
fn bootstrap_keys_include_the_hook_type() {
    let a = registry::InitKey::new("hooks::A", "mongodb://localhost/db", "db");
    let b = registry::InitKey::new("hooks::B", "mongodb://localhost/db", "db");
    assert_ne!(a, b);
}
