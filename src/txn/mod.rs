//! Transaction layer
//!
//! Provides snapshot-isolated transactions over the copy-on-write tree:
//! - Unlimited concurrent read-only transactions, each pinned to the root
//!   published at its start
//! - Exactly one writing transaction at a time, admitted FIFO
//! - Monotonic transaction numbering, atomically published on commit
//! - Prefix-scoped key views with relative key and rank reporting

mod cursor;
mod database;
mod transaction;

pub use database::Database;
pub use transaction::Transaction;

use thiserror::Error;

/// Transaction lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting operations.
    Active,
    /// Committed; its root became the published root.
    Committed,
    /// Abandoned; its mutations were discarded.
    RolledBack,
}

/// Transaction operation errors.
#[derive(Error, Debug)]
pub enum KvError {
    /// Another writing transaction currently holds the writer slot.
    /// Retry with a fresh transaction once it finishes.
    #[error("write conflict: another writing transaction is running")]
    WriterActive,

    /// A writing transaction committed after this handle captured its
    /// snapshot, so the snapshot can no longer become the next version.
    /// Retry with a fresh transaction.
    #[error("write conflict: another writing transaction already committed")]
    SnapshotOutdated,

    /// Mutation attempted through a read-only transaction.
    #[error("write conflict: transaction is read-only")]
    ReadOnly,

    /// The transaction has already committed or rolled back.
    #[error("transaction is not active (state: {0:?})")]
    NotActive(TransactionState),

    /// The cursor is not positioned on a key.
    #[error("no current key")]
    NoCurrentKey,

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl KvError {
    /// Whether the caller can recover by retrying with a fresh transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KvError::WriterActive | KvError::SnapshotOutdated | KvError::ReadOnly
        )
    }
}

/// Result type for transaction operations.
pub type KvResult<T> = Result<T, KvError>;
