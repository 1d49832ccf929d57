//! Transaction handle
//!
//! A transaction is pinned to the tree version captured at its start: keys
//! committed by other transactions afterwards are never visible through it.
//! Reads and navigation run lock-free against that immutable version.
//!
//! Mutation goes through a working root owned by the handle. An immediate
//! handle claims the writer slot lazily on its first mutating call; a
//! handle from `start_writing_transaction` owns the slot from the start.
//! `commit` publishes the working root atomically; dropping the handle
//! without committing discards it and releases the slot either way.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::OwnedSemaphorePermit;

use super::cursor::Cursor;
use super::database::Shared;
use super::{KvError, KvResult, TransactionState};
use crate::tree::{FindResult, TreeRoot};

/// A snapshot-isolated transaction over the store.
pub struct Transaction {
    shared: Arc<Shared>,

    /// Root captured at start; also the identity checked when claiming the
    /// writer slot (a commit elsewhere makes this snapshot unpublishable).
    snapshot: Arc<TreeRoot>,

    /// New version under construction; `Some` once in writing mode.
    working: Option<TreeRoot>,

    /// Writer slot ownership. Dropping it wakes the next queued writer.
    permit: Option<OwnedSemaphorePermit>,

    read_only: bool,
    state: TransactionState,
    cursor: Cursor,
}

impl Transaction {
    pub(crate) fn new(
        shared: Arc<Shared>,
        snapshot: Arc<TreeRoot>,
        writing: Option<(OwnedSemaphorePermit, TreeRoot)>,
        read_only: bool,
    ) -> Self {
        let (permit, working) = match writing {
            Some((permit, working)) => (Some(permit), Some(working)),
            None => (None, None),
        };
        Self {
            shared,
            snapshot,
            working,
            permit,
            read_only,
            state: TransactionState::Active,
            cursor: Cursor::new(),
        }
    }

    /// The tree version this transaction currently sees.
    fn root(&self) -> &TreeRoot {
        match &self.working {
            Some(working) => working,
            None => &self.snapshot,
        }
    }

    fn root_and_cursor(&mut self) -> (&TreeRoot, &mut Cursor) {
        let root = match &self.working {
            Some(working) => working,
            None => &self.snapshot,
        };
        (root, &mut self.cursor)
    }

    /// Enter writing mode, claiming the writer slot if not yet held.
    fn writable(&mut self) -> KvResult<&mut TreeRoot> {
        if self.state != TransactionState::Active {
            return Err(KvError::NotActive(self.state));
        }
        if self.read_only {
            return Err(KvError::ReadOnly);
        }
        if self.working.is_none() {
            let (permit, working) = self.shared.try_claim_writer(&self.snapshot)?;
            tracing::trace!(
                "transaction upgraded to writing as number {}",
                working.transaction_number()
            );
            self.permit = Some(permit);
            self.working = Some(working);
        }
        match self.working.as_mut() {
            Some(working) => Ok(working),
            None => Err(KvError::Internal("writer upgrade lost working root".into())),
        }
    }

    /// Current state of this transaction.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Transaction number of the version this handle sees: the number of
    /// the last commit visible to its snapshot or, once in writing mode,
    /// the number this transaction will publish.
    pub fn transaction_number(&self) -> u64 {
        self.root().transaction_number()
    }

    /// Restrict all following operations to keys starting with `prefix`.
    ///
    /// Keys are reported with the prefix stripped and ranks are renumbered
    /// within the restricted space. An empty prefix restores the full key
    /// space. The cursor position is dropped.
    pub fn set_key_prefix(&mut self, prefix: &[u8]) {
        self.cursor.set_prefix(Bytes::copy_from_slice(prefix));
    }

    /// Look up `key` (prefix-relative), positioning the cursor on the exact
    /// match or its nearest stored neighbor. Ranks in the result are
    /// relative to the active prefix.
    pub fn find(&mut self, key: &[u8]) -> FindResult {
        let (root, cursor) = self.root_and_cursor();
        cursor.find(root, key)
    }

    /// Position the cursor on `key` (prefix-relative) if it is stored.
    pub fn find_exact(&mut self, key: &[u8]) -> bool {
        let (root, cursor) = self.root_and_cursor();
        cursor.find_exact(root, key)
    }

    /// Position on the first key under the active prefix.
    pub fn find_first(&mut self) -> bool {
        let (root, cursor) = self.root_and_cursor();
        cursor.find_first(root)
    }

    /// Position on the last key under the active prefix.
    pub fn find_last(&mut self) -> bool {
        let (root, cursor) = self.root_and_cursor();
        cursor.find_last(root)
    }

    /// Advance the cursor. From an unpositioned cursor this positions on
    /// the first key. Returns false (and unpositions) past the end.
    pub fn find_next(&mut self) -> bool {
        let (root, cursor) = self.root_and_cursor();
        cursor.find_next(root)
    }

    /// Step the cursor back. From an unpositioned cursor this positions on
    /// the last key. Returns false (and unpositions) before the start.
    pub fn find_previous(&mut self) -> bool {
        let (root, cursor) = self.root_and_cursor();
        cursor.find_previous(root)
    }

    /// Number of keys under the active prefix. O(log n).
    pub fn key_value_count(&self) -> u64 {
        self.cursor.count(self.root())
    }

    /// Prefix-relative rank of the current key, or -1 when unpositioned.
    pub fn key_index(&self) -> i64 {
        self.cursor.index(self.root())
    }

    /// Position the cursor on the prefix-relative rank `index`.
    pub fn set_key_index(&mut self, index: u64) -> bool {
        let (root, cursor) = self.root_and_cursor();
        cursor.set_index(root, index)
    }

    /// Current key with the active prefix stripped.
    pub fn key(&self) -> Option<Bytes> {
        self.cursor.key(self.root())
    }

    /// Current value.
    pub fn value(&self) -> Option<Bytes> {
        self.cursor.value(self.root())
    }

    /// Stored size (key bytes, value bytes) of the current pair. The key
    /// size covers the full stored key, prefix included.
    pub fn storage_size_of_current_key(&self) -> Option<(u64, u64)> {
        self.root().storage_size(self.cursor.position()?)
    }

    /// Insert `key` (prefix-relative) or replace its value, positioning the
    /// cursor on the written pair. Returns whether the key was newly
    /// inserted. The payload is retrievable unchanged until it is erased or
    /// overwritten.
    pub fn create_or_update(&mut self, key: &[u8], value: &[u8]) -> KvResult<bool> {
        let full = self.cursor.full_key(key);
        let value = Bytes::copy_from_slice(value);
        let root = self.writable()?;
        let inserted = root.insert(full.clone(), value);
        let (rank, _) = root.locate(&full);
        self.cursor.set_position(Some(rank));
        Ok(inserted)
    }

    /// Insert `key` with an empty value. Returns false if it already existed.
    pub fn create_key(&mut self, key: &[u8]) -> KvResult<bool> {
        self.create_or_update(key, &[])
    }

    /// Erase the pair under the cursor. The cursor becomes unpositioned.
    pub fn erase_current(&mut self) -> KvResult<()> {
        let position = self.cursor.position().ok_or(KvError::NoCurrentKey)?;
        let root = self.writable()?;
        root.erase(position);
        self.cursor.invalidate();
        Ok(())
    }

    /// Erase the prefix-relative rank range `from..=to`, clamped to the
    /// keys present. One structural operation regardless of range size.
    pub fn erase_range(&mut self, from: u64, to: u64) -> KvResult<()> {
        let (start, end) = {
            let (root, cursor) = self.root_and_cursor();
            cursor.window(root)
        };
        if start == end || from > to || from >= end - start {
            return Ok(());
        }
        let abs_from = start + from;
        let abs_to = start + to.min(end - start - 1);
        let root = self.writable()?;
        root.erase_range(abs_from, abs_to);
        self.cursor.invalidate();
        Ok(())
    }

    /// Erase every key under the active prefix.
    pub fn erase_all(&mut self) -> KvResult<()> {
        let count = self.key_value_count();
        if count == 0 {
            return Ok(());
        }
        self.erase_range(0, count - 1)
    }

    /// Publish this transaction's mutations as the new store version.
    ///
    /// After commit the handle keeps reading the committed version, but all
    /// further mutation attempts fail. Committing a transaction that never
    /// entered writing mode publishes nothing.
    pub fn commit(&mut self) -> KvResult<()> {
        if self.state != TransactionState::Active {
            return Err(KvError::NotActive(self.state));
        }
        self.state = TransactionState::Committed;
        if let Some(working) = self.working.take() {
            #[cfg(debug_assertions)]
            working.check_invariants();
            let number = working.transaction_number();
            let keys = working.len();
            let root = Arc::new(working);
            // Publish before releasing the slot so the next granted writer
            // captures this version.
            self.shared.publish(root.clone());
            self.snapshot = root;
            self.permit = None;
            tracing::debug!("transaction {} committed with {} keys", number, keys);
        }
        Ok(())
    }

    /// Discard this transaction's mutations and release the writer slot.
    pub fn rollback(&mut self) -> KvResult<()> {
        if self.state != TransactionState::Active {
            return Err(KvError::NotActive(self.state));
        }
        self.state = TransactionState::RolledBack;
        if self.working.take().is_some() {
            tracing::debug!("writing transaction rolled back");
        }
        self.permit = None;
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // Dropping without commit is a rollback; the permit field drop
        // releases the writer slot and wakes the next queued writer.
        if self.state == TransactionState::Active && self.working.is_some() {
            self.state = TransactionState::RolledBack;
            tracing::trace!("writing transaction dropped without commit");
        }
    }
}
