//! snapkv - an embedded ordered key-value store with snapshot transactions
//!
//! Features:
//! - Immutable copy-on-write B-tree sharing unmodified subtrees between versions
//! - Snapshot isolation: unlimited concurrent readers, one writer at a time
//! - FIFO writer admission with async suspension and retryable conflicts
//! - Rank (positional) navigation and structural bulk range erase
//! - Prefix-scoped views reporting keys and ranks relative to the prefix

pub mod tree;
pub mod txn;

pub use tree::FindResult;
pub use txn::{Database, KvError, KvResult, Transaction, TransactionState};
