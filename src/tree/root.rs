//! Snapshot roots over the copy-on-write tree
//!
//! A `TreeRoot` is one immutable version of the key space: a root node plus
//! the transaction number that produced it. Mutating operations rewrite
//! only the path they touch, so older roots held by other snapshots remain
//! fully readable at zero cost.

use std::sync::Arc;

use bytes::Bytes;

use super::node::{erase_range_in, insert_into, BranchNode, LeafNode, Node};

/// Outcome of a key lookup.
///
/// The four-way result lets callers distinguish "key absent but a neighbor
/// exists on this side" (with the neighbor's rank) from "no keys at all" —
/// both matter to cursor navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindResult {
    /// The key exists at this rank.
    Exact(u64),
    /// The key is absent; the nearest smaller key is at this rank.
    Previous(u64),
    /// The key is absent and nothing sorts below it; the nearest greater
    /// key is at this rank.
    Next(u64),
    /// The key space is empty.
    Empty,
}

/// One immutable version of the tree.
#[derive(Clone)]
pub struct TreeRoot {
    transaction_number: u64,
    node: Option<Arc<Node>>,
}

impl TreeRoot {
    /// The empty key space, as published by a freshly created database.
    pub fn new_empty() -> Self {
        Self {
            transaction_number: 0,
            node: None,
        }
    }

    /// Start a new version of this root for the next writing transaction.
    /// The node graph is shared until the new version mutates it.
    pub fn new_version(&self) -> Self {
        Self {
            transaction_number: self.transaction_number + 1,
            node: self.node.clone(),
        }
    }

    /// The transaction number that produced this version.
    pub fn transaction_number(&self) -> u64 {
        self.transaction_number
    }

    /// Number of stored keys.
    pub fn len(&self) -> u64 {
        self.node.as_ref().map_or(0, |n| n.len())
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_none()
    }

    /// Rank of the first key >= `key`, plus whether `key` itself is stored.
    pub(crate) fn locate(&self, key: &[u8]) -> (u64, bool) {
        match &self.node {
            None => (0, false),
            Some(node) => node.locate(key),
        }
    }

    /// Rank of the first key >= `key`.
    pub(crate) fn lower_bound(&self, key: &[u8]) -> u64 {
        self.locate(key).0
    }

    /// Look up `key`, reporting the nearest existing neighbor when absent.
    pub fn find(&self, key: &[u8]) -> FindResult {
        if self.node.is_none() {
            return FindResult::Empty;
        }
        let (rank, exact) = self.locate(key);
        if exact {
            FindResult::Exact(rank)
        } else if rank > 0 {
            FindResult::Previous(rank - 1)
        } else {
            FindResult::Next(0)
        }
    }

    /// Pair at `rank`, or `None` beyond the end.
    pub fn get(&self, rank: u64) -> Option<(&Bytes, &Bytes)> {
        let node = self.node.as_ref()?;
        if rank >= node.len() {
            return None;
        }
        let (key, value) = node.get(rank);
        Some((key, value))
    }

    /// Physical footprint (key bytes, value bytes) of the pair at `rank`.
    pub fn storage_size(&self, rank: u64) -> Option<(u64, u64)> {
        self.get(rank)
            .map(|(key, value)| (key.len() as u64, value.len() as u64))
    }

    /// Insert `key` or replace its value. Returns whether the key was newly
    /// inserted. Only the root-to-leaf path is rewritten; other snapshots
    /// holding the previous version are unaffected.
    pub fn insert(&mut self, key: Bytes, value: Bytes) -> bool {
        match &mut self.node {
            None => {
                self.node = Some(Arc::new(Node::Leaf(LeafNode {
                    pairs: vec![(key, value)],
                })));
                true
            }
            Some(root) => {
                let (split, inserted) = insert_into(root, key, value);
                if let Some(entry) = split {
                    let left = (root.min_key().clone(), root.clone());
                    self.node = Some(Arc::new(Node::Branch(BranchNode::new(vec![left, entry]))));
                }
                inserted
            }
        }
    }

    /// Erase the pair at `rank`.
    pub fn erase(&mut self, rank: u64) -> u64 {
        self.erase_range(rank, rank)
    }

    /// Erase ranks `from..=to` as one structural operation, clamped to the
    /// stored range. Returns the number of pairs erased.
    pub fn erase_range(&mut self, from: u64, to: u64) -> u64 {
        let len = self.len();
        if len == 0 || from >= len || from > to {
            return 0;
        }
        let to = to.min(len - 1);
        let root = match self.node.as_mut() {
            Some(root) => root,
            None => return 0,
        };
        if erase_range_in(root, from, to) {
            self.node = None;
        } else {
            // A large erase can leave a chain of single-child branches at
            // the top; shed them so the height matches the content again.
            loop {
                let collapsed = match &**root {
                    Node::Branch(branch) if branch.children.len() == 1 => {
                        branch.children[0].1.clone()
                    }
                    _ => break,
                };
                *root = collapsed;
            }
        }
        to - from + 1
    }

    /// Assert the structural invariants of this version. Test and debug aid.
    pub fn check_invariants(&self) {
        if let Some(node) = &self.node {
            let (_, count, _, _) = node.check_invariants();
            assert_eq!(count, node.len(), "root count does not match leaves");
        }
    }
}
