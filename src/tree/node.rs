//! Immutable copy-on-write tree nodes
//!
//! Nodes are shared between snapshot versions through `Arc`: a mutation
//! rewrites only the nodes on the path from the root to the affected pair
//! and reuses every untouched sibling subtree. A node is freed when the
//! last root referencing it is dropped.
//!
//! Every branch caches the number of pairs below it, so rank (positional)
//! lookups descend in O(log n) and a rebuilt node recomputes its count from
//! its direct children only. Branch children are tagged with their
//! subtree's minimum key, which keeps separators locally recomputable after
//! splits and merges.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use super::key::compare_keys;

/// Maximum key-value pairs per leaf before it splits.
pub const MAX_LEAF_PAIRS: usize = 32;

/// Minimum pairs per leaf below which erase rebalances it into a sibling.
pub const MIN_LEAF_PAIRS: usize = MAX_LEAF_PAIRS / 2;

/// Maximum children per branch before it splits.
pub const MAX_BRANCH_CHILDREN: usize = 32;

/// Minimum children per branch below which erase rebalances it.
pub const MIN_BRANCH_CHILDREN: usize = MAX_BRANCH_CHILDREN / 2;

/// A tree node: leaf pairs or min-key-tagged child subtrees.
#[derive(Clone)]
pub enum Node {
    Leaf(LeafNode),
    Branch(BranchNode),
}

/// Sorted key-value pairs.
#[derive(Clone)]
pub struct LeafNode {
    pub pairs: Vec<(Bytes, Bytes)>,
}

/// Child subtrees, each tagged with its minimum key, plus a cached pair total.
#[derive(Clone)]
pub struct BranchNode {
    total: u64,
    pub children: Vec<(Bytes, Arc<Node>)>,
}

impl BranchNode {
    pub fn new(children: Vec<(Bytes, Arc<Node>)>) -> Self {
        let total = children.iter().map(|(_, c)| c.len()).sum();
        Self { total, children }
    }
}

impl Node {
    /// Number of key-value pairs in this subtree. O(1).
    pub fn len(&self) -> u64 {
        match self {
            Node::Leaf(leaf) => leaf.pairs.len() as u64,
            Node::Branch(branch) => branch.total,
        }
    }

    /// Smallest key in this subtree. O(1).
    pub fn min_key(&self) -> &Bytes {
        match self {
            Node::Leaf(leaf) => &leaf.pairs[0].0,
            Node::Branch(branch) => &branch.children[0].0,
        }
    }

    /// Rank of the first key >= `key` within this subtree, plus whether the
    /// key itself is present.
    pub fn locate(&self, key: &[u8]) -> (u64, bool) {
        match self {
            Node::Leaf(leaf) => {
                match leaf.pairs.binary_search_by(|(k, _)| compare_keys(k, key)) {
                    Ok(i) => (i as u64, true),
                    Err(i) => (i as u64, false),
                }
            }
            Node::Branch(branch) => {
                let idx = descent_child(&branch.children, key);
                let offset: u64 = branch.children[..idx].iter().map(|(_, c)| c.len()).sum();
                let (rank, exact) = branch.children[idx].1.locate(key);
                (offset + rank, exact)
            }
        }
    }

    /// Pair at `rank`. The caller guarantees `rank < self.len()`.
    pub fn get(&self, mut rank: u64) -> &(Bytes, Bytes) {
        match self {
            Node::Leaf(leaf) => &leaf.pairs[rank as usize],
            Node::Branch(branch) => {
                for (_, child) in &branch.children {
                    let n = child.len();
                    if rank < n {
                        return child.get(rank);
                    }
                    rank -= n;
                }
                // Reaching here means the cached subtree counts are corrupt.
                panic!("rank {rank} beyond subtree size")
            }
        }
    }

    fn is_underfull(&self) -> bool {
        match self {
            Node::Leaf(leaf) => leaf.pairs.len() < MIN_LEAF_PAIRS,
            Node::Branch(branch) => branch.children.len() < MIN_BRANCH_CHILDREN,
        }
    }

    /// Walk the subtree asserting ordering, min-key tags, cached counts and
    /// uniform depth. Panics on violation: a broken structural invariant is
    /// a bug in the tree itself and must not produce silently wrong results.
    ///
    /// Returns (height, pair count, min key, max key).
    pub fn check_invariants(&self) -> (usize, u64, Bytes, Bytes) {
        match self {
            Node::Leaf(leaf) => {
                assert!(!leaf.pairs.is_empty(), "empty leaf node");
                assert!(leaf.pairs.len() <= MAX_LEAF_PAIRS, "leaf over capacity");
                for pair in leaf.pairs.windows(2) {
                    assert_eq!(
                        compare_keys(&pair[0].0, &pair[1].0),
                        Ordering::Less,
                        "leaf keys out of order"
                    );
                }
                let min = leaf.pairs[0].0.clone();
                let max = leaf.pairs[leaf.pairs.len() - 1].0.clone();
                (1, leaf.pairs.len() as u64, min, max)
            }
            Node::Branch(branch) => {
                assert!(
                    branch.children.len() >= 2,
                    "branch with fewer than two children"
                );
                assert!(
                    branch.children.len() <= MAX_BRANCH_CHILDREN,
                    "branch over capacity"
                );
                let (first_tag, first_child) = &branch.children[0];
                let (height, mut total, min, mut prev_max) = first_child.check_invariants();
                assert_eq!(first_tag, &min, "child minimum key tag out of date");
                for (tag, child) in &branch.children[1..] {
                    let (child_height, child_total, child_min, child_max) =
                        child.check_invariants();
                    assert_eq!(height, child_height, "uneven subtree heights");
                    assert_eq!(tag, &child_min, "child minimum key tag out of date");
                    assert_eq!(
                        compare_keys(&prev_max, &child_min),
                        Ordering::Less,
                        "branch children out of order"
                    );
                    total += child_total;
                    prev_max = child_max;
                }
                assert_eq!(total, branch.total, "cached subtree size drifted");
                (height + 1, total, min, prev_max)
            }
        }
    }
}

/// Index of the child whose key range covers `key`: the last child whose
/// minimum key is <= `key`, or the first child when `key` sorts below all.
fn descent_child(children: &[(Bytes, Arc<Node>)], key: &[u8]) -> usize {
    let idx = children.partition_point(|(tag, _)| compare_keys(tag, key) != Ordering::Greater);
    idx.saturating_sub(1)
}

fn leaf_entry(pairs: Vec<(Bytes, Bytes)>) -> (Bytes, Arc<Node>) {
    let tag = pairs[0].0.clone();
    (tag, Arc::new(Node::Leaf(LeafNode { pairs })))
}

fn branch_entry(children: Vec<(Bytes, Arc<Node>)>) -> (Bytes, Arc<Node>) {
    let tag = children[0].0.clone();
    (tag, Arc::new(Node::Branch(BranchNode::new(children))))
}

/// Insert or update `key` in the subtree, cloning shared nodes on the path.
///
/// Returns an optional split-off right sibling (tagged with its minimum
/// key) and whether the key was newly inserted rather than updated.
pub fn insert_into(node: &mut Arc<Node>, key: Bytes, value: Bytes) -> (Option<(Bytes, Arc<Node>)>, bool) {
    match Arc::make_mut(node) {
        Node::Leaf(leaf) => {
            match leaf.pairs.binary_search_by(|(k, _)| compare_keys(k, &key)) {
                Ok(i) => {
                    leaf.pairs[i].1 = value;
                    (None, false)
                }
                Err(i) => {
                    leaf.pairs.insert(i, (key, value));
                    if leaf.pairs.len() > MAX_LEAF_PAIRS {
                        let right = leaf.pairs.split_off(leaf.pairs.len() / 2);
                        (Some(leaf_entry(right)), true)
                    } else {
                        (None, true)
                    }
                }
            }
        }
        Node::Branch(branch) => {
            let idx = descent_child(&branch.children, &key);
            let (split, inserted) = insert_into(&mut branch.children[idx].1, key, value);
            // The insert may have produced a new subtree minimum.
            branch.children[idx].0 = branch.children[idx].1.min_key().clone();
            if inserted {
                branch.total += 1;
            }
            if let Some(entry) = split {
                branch.children.insert(idx + 1, entry);
                if branch.children.len() > MAX_BRANCH_CHILDREN {
                    let right = branch.children.split_off(branch.children.len() / 2);
                    branch.total = branch.children.iter().map(|(_, c)| c.len()).sum();
                    return (Some(branch_entry(right)), inserted);
                }
            }
            (None, inserted)
        }
    }
}

/// Erase ranks `from..=to` (relative to this subtree), cloning shared nodes
/// along the two boundary paths. Subtrees entirely inside the range are
/// dropped whole without descending into them, so the cost is bounded by
/// the boundary paths rather than the number of erased pairs.
///
/// Returns `true` when the subtree became empty.
pub fn erase_range_in(node: &mut Arc<Node>, from: u64, to: u64) -> bool {
    match Arc::make_mut(node) {
        Node::Leaf(leaf) => {
            leaf.pairs.drain(from as usize..=to as usize);
            leaf.pairs.is_empty()
        }
        Node::Branch(branch) => {
            let old_children = std::mem::take(&mut branch.children);
            let mut children = Vec::with_capacity(old_children.len());
            let mut touched = Vec::new();
            let mut offset = 0u64;
            for (tag, child) in old_children {
                let lo = offset;
                let hi = offset + child.len();
                offset = hi;
                if hi <= from || lo > to {
                    children.push((tag, child));
                } else if from <= lo && to >= hi - 1 {
                    // Entire subtree erased; its nodes are freed when the
                    // last snapshot referencing them goes away.
                } else {
                    let mut child = child;
                    if !erase_range_in(&mut child, from.max(lo) - lo, to.min(hi - 1) - lo) {
                        touched.push(children.len());
                        children.push((child.min_key().clone(), child));
                    }
                }
            }
            // At most the two boundary children were rewritten; merge them
            // back to legal occupancy. Right to left so indices stay valid.
            for &i in touched.iter().rev() {
                fix_underflow(&mut children, i);
            }
            branch.total = children.iter().map(|(_, c)| c.len()).sum();
            branch.children = children;
            branch.children.is_empty()
        }
    }
}

/// Merge the child at `i` with a neighbor while it stays underfull and a
/// neighbor exists. A merge that overflows is re-split evenly, which always
/// yields two legally occupied nodes.
fn fix_underflow(children: &mut Vec<(Bytes, Arc<Node>)>, mut i: usize) {
    while children.len() > 1 {
        if i >= children.len() {
            i = children.len() - 1;
        }
        if !children[i].1.is_underfull() {
            break;
        }
        let j = if i + 1 < children.len() { i } else { i - 1 };
        let merged = merge_siblings(children[j].1.as_ref(), children[j + 1].1.as_ref());
        children.splice(j..=j + 1, merged);
        i = j;
    }
}

fn merge_siblings(left: &Node, right: &Node) -> Vec<(Bytes, Arc<Node>)> {
    match (left, right) {
        (Node::Leaf(a), Node::Leaf(b)) => {
            let mut pairs = Vec::with_capacity(a.pairs.len() + b.pairs.len());
            pairs.extend(a.pairs.iter().cloned());
            pairs.extend(b.pairs.iter().cloned());
            if pairs.len() > MAX_LEAF_PAIRS {
                let upper = pairs.split_off(pairs.len() / 2);
                vec![leaf_entry(pairs), leaf_entry(upper)]
            } else {
                vec![leaf_entry(pairs)]
            }
        }
        (Node::Branch(a), Node::Branch(b)) => {
            let mut children = Vec::with_capacity(a.children.len() + b.children.len());
            children.extend(a.children.iter().cloned());
            children.extend(b.children.iter().cloned());
            if children.len() > MAX_BRANCH_CHILDREN {
                let upper = children.split_off(children.len() / 2);
                vec![branch_entry(children), branch_entry(upper)]
            } else {
                vec![branch_entry(children)]
            }
        }
        // Siblings always share a height; mixing kinds means the tree is corrupt.
        _ => panic!("subtree height mismatch while rebalancing"),
    }
}
