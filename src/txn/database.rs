//! Database instance - owns the published root and writer admission
//!
//! The only mutable shared state in the engine is the published root
//! pointer: the tree version visible to newly started transactions. It is
//! replaced by exactly one actor (the committing writer), so the swap needs
//! no coordination beyond writer admission itself.
//!
//! Writer admission is a single-permit FIFO semaphore. Suspending callers
//! queue on it without holding a thread; the permit is owned by the granted
//! transaction and released on every exit path, including drops, which
//! wakes the next queued writer.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::transaction::Transaction;
use super::{KvError, KvResult};
use crate::tree::TreeRoot;

/// An embedded ordered key-value store.
///
/// Explicitly constructed and owned; any number of independent instances
/// can coexist in one process. Cloning a `Database` yields another handle
/// to the same store.
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

/// State shared by the database handle and every transaction started from it.
pub(crate) struct Shared {
    /// The tree version visible to newly started transactions.
    published: RwLock<Arc<TreeRoot>>,

    /// Single-permit FIFO writer slot.
    writer_slot: Arc<Semaphore>,
}

impl Database {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                published: RwLock::new(Arc::new(TreeRoot::new_empty())),
                writer_slot: Arc::new(Semaphore::new(1)),
            }),
        }
    }

    /// Start a transaction against the currently published root.
    ///
    /// Returns immediately. The handle reads its snapshot freely; the first
    /// mutating call tries to claim the writer slot and fails with a
    /// retryable conflict if another writer is active or has committed
    /// since this snapshot was captured.
    pub fn start_transaction(&self) -> Transaction {
        let snapshot = self.shared.capture();
        Transaction::new(self.shared.clone(), snapshot, None, false)
    }

    /// Start a read-only transaction against the currently published root.
    ///
    /// Never blocks and never conflicts with the writer; mutation attempts
    /// through this handle fail with a retryable conflict.
    pub fn start_read_only_transaction(&self) -> Transaction {
        let snapshot = self.shared.capture();
        Transaction::new(self.shared.clone(), snapshot, None, true)
    }

    /// Start a writing transaction, suspending until the writer slot frees.
    ///
    /// Queued callers are granted the slot strictly in arrival order, one
    /// at a time, each capturing the root published by its predecessor.
    pub async fn start_writing_transaction(&self) -> KvResult<Transaction> {
        let permit = self
            .shared
            .writer_slot
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| KvError::Internal("writer slot closed".into()))?;
        let snapshot = self.shared.capture();
        let working = snapshot.new_version();
        tracing::trace!(
            "writer slot granted for transaction {}",
            working.transaction_number()
        );
        Ok(Transaction::new(
            self.shared.clone(),
            snapshot,
            Some((permit, working)),
            false,
        ))
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    /// Snapshot the currently published root.
    pub(crate) fn capture(&self) -> Arc<TreeRoot> {
        self.published.read().clone()
    }

    /// Claim the writer slot for a transaction holding `captured`.
    ///
    /// Fails when another writer is active, or when the captured root is no
    /// longer the published one (a writer committed in between) - in both
    /// cases the caller must retry with a fresh snapshot.
    pub(crate) fn try_claim_writer(
        &self,
        captured: &Arc<TreeRoot>,
    ) -> KvResult<(OwnedSemaphorePermit, TreeRoot)> {
        let permit = self
            .writer_slot
            .clone()
            .try_acquire_owned()
            .map_err(|_| KvError::WriterActive)?;
        let published = self.capture();
        if !Arc::ptr_eq(captured, &published) {
            // The permit drops here, releasing the slot for other callers.
            return Err(KvError::SnapshotOutdated);
        }
        Ok((permit, published.new_version()))
    }

    /// Install `root` as the version visible to new transactions.
    ///
    /// Called by the committing writer while it still holds the slot, so
    /// the next granted writer is guaranteed to capture this root.
    pub(crate) fn publish(&self, root: Arc<TreeRoot>) {
        *self.published.write() = root;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_is_empty() {
        let db = Database::new();
        let tr = db.start_transaction();
        assert_eq!(tr.key_value_count(), 0);
        assert_eq!(tr.transaction_number(), 0);
    }

    #[test]
    fn test_independent_instances() {
        let a = Database::new();
        let b = Database::new();
        let mut tr = a.start_transaction();
        tr.create_key(b"only-in-a").unwrap();
        tr.commit().unwrap();

        assert!(!b.start_transaction().find_exact(b"only-in-a"));
        assert!(a.start_transaction().find_exact(b"only-in-a"));
    }

    #[test]
    fn test_cloned_handle_shares_store() {
        let db = Database::new();
        let db2 = db.clone();
        let mut tr = db.start_transaction();
        tr.create_key(b"shared").unwrap();
        tr.commit().unwrap();

        assert!(db2.start_transaction().find_exact(b"shared"));
    }

    #[tokio::test]
    async fn test_writing_transaction_captures_fresh_root() {
        let db = Database::new();
        {
            let mut tr = db.start_writing_transaction().await.unwrap();
            assert_eq!(tr.transaction_number(), 1);
            tr.create_key(b"a").unwrap();
            tr.commit().unwrap();
        }
        let mut tr = db.start_writing_transaction().await.unwrap();
        assert_eq!(tr.transaction_number(), 2);
        assert!(tr.find_exact(b"a"));
        tr.rollback().unwrap();
    }
}
