//! Prefix-scoped cursor
//!
//! A cursor restricts the visible key space to keys sharing a byte prefix
//! and renumbers ranks relative to that window. The window is derived from
//! two rank boundaries (first matching key, first key past the prefix), so
//! counting and clamping cost O(log n) regardless of how many keys match.
//!
//! The cursor stores absolute ranks internally and translates at the API
//! boundary; reported keys have the prefix stripped.

use bytes::Bytes;

use crate::tree::{prefix_upper_bound, FindResult, TreeRoot};

/// Cursor state: the active prefix and an absolute rank, if positioned.
pub(crate) struct Cursor {
    prefix: Bytes,
    position: Option<u64>,
}

impl Cursor {
    pub fn new() -> Self {
        Self {
            prefix: Bytes::new(),
            position: None,
        }
    }

    /// Restrict the visible key space to keys starting with `prefix` and
    /// drop the current position. An empty prefix restores the full space.
    pub fn set_prefix(&mut self, prefix: Bytes) {
        self.prefix = prefix;
        self.position = None;
    }

    /// Absolute rank window `[start, end)` of keys under the prefix.
    pub fn window(&self, root: &TreeRoot) -> (u64, u64) {
        if self.prefix.is_empty() {
            return (0, root.len());
        }
        let start = root.lower_bound(&self.prefix);
        let end = match prefix_upper_bound(&self.prefix) {
            Some(bound) => root.lower_bound(&bound),
            None => root.len(),
        };
        (start, end)
    }

    /// Number of keys under the prefix.
    pub fn count(&self, root: &TreeRoot) -> u64 {
        let (start, end) = self.window(root);
        end - start
    }

    /// The stored form of a prefix-relative key.
    pub fn full_key(&self, key: &[u8]) -> Bytes {
        if self.prefix.is_empty() {
            return Bytes::copy_from_slice(key);
        }
        let mut buf = Vec::with_capacity(self.prefix.len() + key.len());
        buf.extend_from_slice(&self.prefix);
        buf.extend_from_slice(key);
        Bytes::from(buf)
    }

    /// Look up a prefix-relative key; ranks in the result are relative to
    /// the window. Positions the cursor on the reported key, or invalidates
    /// it when the window is empty.
    pub fn find(&mut self, root: &TreeRoot, key: &[u8]) -> FindResult {
        let (start, end) = self.window(root);
        if start == end {
            self.position = None;
            return FindResult::Empty;
        }
        let (rank, exact) = root.locate(&self.full_key(key));
        if exact {
            self.position = Some(rank);
            FindResult::Exact(rank - start)
        } else if rank > start {
            self.position = Some(rank - 1);
            FindResult::Previous(rank - 1 - start)
        } else {
            self.position = Some(start);
            FindResult::Next(0)
        }
    }

    /// Position on a prefix-relative key if it is stored.
    pub fn find_exact(&mut self, root: &TreeRoot, key: &[u8]) -> bool {
        let (rank, exact) = root.locate(&self.full_key(key));
        self.position = exact.then_some(rank);
        exact
    }

    pub fn find_first(&mut self, root: &TreeRoot) -> bool {
        let (start, end) = self.window(root);
        if start == end {
            self.position = None;
            return false;
        }
        self.position = Some(start);
        true
    }

    pub fn find_last(&mut self, root: &TreeRoot) -> bool {
        let (start, end) = self.window(root);
        if start == end {
            self.position = None;
            return false;
        }
        self.position = Some(end - 1);
        true
    }

    /// Advance to the next key in the window. From an unpositioned cursor
    /// this behaves like [`Cursor::find_first`].
    pub fn find_next(&mut self, root: &TreeRoot) -> bool {
        let position = match self.position {
            Some(position) => position,
            None => return self.find_first(root),
        };
        let (_, end) = self.window(root);
        if position + 1 < end {
            self.position = Some(position + 1);
            true
        } else {
            self.position = None;
            false
        }
    }

    /// Step to the previous key in the window. From an unpositioned cursor
    /// this behaves like [`Cursor::find_last`].
    pub fn find_previous(&mut self, root: &TreeRoot) -> bool {
        let position = match self.position {
            Some(position) => position,
            None => return self.find_last(root),
        };
        let (start, _) = self.window(root);
        if position > start {
            self.position = Some(position - 1);
            true
        } else {
            self.position = None;
            false
        }
    }

    /// Position on the window-relative rank `index`.
    pub fn set_index(&mut self, root: &TreeRoot, index: u64) -> bool {
        let (start, end) = self.window(root);
        if index < end - start {
            self.position = Some(start + index);
            true
        } else {
            self.position = None;
            false
        }
    }

    /// Window-relative rank of the current key, or -1 when unpositioned.
    pub fn index(&self, root: &TreeRoot) -> i64 {
        match self.position {
            Some(position) => {
                let (start, _) = self.window(root);
                (position - start) as i64
            }
            None => -1,
        }
    }

    /// Current key with the prefix stripped.
    pub fn key(&self, root: &TreeRoot) -> Option<Bytes> {
        let (key, _) = root.get(self.position?)?;
        Some(key.slice(self.prefix.len()..))
    }

    /// Current value.
    pub fn value(&self, root: &TreeRoot) -> Option<Bytes> {
        let (_, value) = root.get(self.position?)?;
        Some(value.clone())
    }

    pub fn position(&self) -> Option<u64> {
        self.position
    }

    pub fn set_position(&mut self, position: Option<u64>) {
        self.position = position;
    }

    pub fn invalidate(&mut self) {
        self.position = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(bytes: &[u8]) -> Bytes {
        Bytes::copy_from_slice(bytes)
    }

    fn sample_root() -> TreeRoot {
        let mut root = TreeRoot::new_empty();
        for key in [
            &[1u8, 2, 3][..],
            &[1, 2, 3, 4],
            &[1, 2, 4],
            &[1, 3, 0],
            &[2, 0],
        ] {
            root.insert(b(key), b(key));
        }
        root
    }

    #[test]
    fn test_window_bounds() {
        let root = sample_root();
        let mut cursor = Cursor::new();
        assert_eq!(cursor.window(&root), (0, 5));

        cursor.set_prefix(b(&[1, 2]));
        assert_eq!(cursor.window(&root), (0, 3));

        cursor.set_prefix(b(&[1, 3]));
        assert_eq!(cursor.window(&root), (3, 4));

        cursor.set_prefix(b(&[9]));
        assert_eq!(cursor.count(&root), 0);
    }

    #[test]
    fn test_relative_navigation_and_keys() {
        let root = sample_root();
        let mut cursor = Cursor::new();
        cursor.set_prefix(b(&[1, 2]));

        assert!(cursor.find_first(&root));
        assert_eq!(cursor.index(&root), 0);
        assert_eq!(cursor.key(&root).unwrap().as_ref(), &[3]);

        assert!(cursor.find_next(&root));
        assert_eq!(cursor.key(&root).unwrap().as_ref(), &[3, 4]);

        assert!(cursor.find_last(&root));
        assert_eq!(cursor.index(&root), 2);
        assert_eq!(cursor.key(&root).unwrap().as_ref(), &[4]);

        assert!(!cursor.find_next(&root));
        assert_eq!(cursor.index(&root), -1);
    }

    #[test]
    fn test_navigation_wraps_from_unpositioned() {
        let root = sample_root();
        let mut cursor = Cursor::new();

        assert!(cursor.find_next(&root));
        assert_eq!(cursor.index(&root), 0);

        cursor.invalidate();
        assert!(cursor.find_previous(&root));
        assert_eq!(cursor.index(&root), 4);

        // Falling off the end invalidates; the next call wraps again.
        assert!(!cursor.find_next(&root));
        assert!(cursor.find_previous(&root));
        assert_eq!(cursor.index(&root), 4);
    }

    #[test]
    fn test_find_clamps_to_window() {
        let root = sample_root();
        let mut cursor = Cursor::new();
        cursor.set_prefix(b(&[1, 2]));

        // Probe above every key in the window: nearest is the window's last.
        assert_eq!(cursor.find(&root, &[9]), FindResult::Previous(2));
        // Probe below every key in the window.
        assert_eq!(cursor.find(&root, &[]), FindResult::Next(0));
        assert_eq!(cursor.find(&root, &[3]), FindResult::Exact(0));

        cursor.set_prefix(b(&[7]));
        assert_eq!(cursor.find(&root, &[0]), FindResult::Empty);
        assert_eq!(cursor.index(&root), -1);
    }

    #[test]
    fn test_set_index_bounds() {
        let root = sample_root();
        let mut cursor = Cursor::new();
        cursor.set_prefix(b(&[1, 2]));

        assert!(cursor.set_index(&root, 2));
        assert_eq!(cursor.key(&root).unwrap().as_ref(), &[4]);
        assert!(!cursor.set_index(&root, 3));
        assert_eq!(cursor.index(&root), -1);
    }

    #[test]
    fn test_find_exact_strips_prefix() {
        let root = sample_root();
        let mut cursor = Cursor::new();
        cursor.set_prefix(b(&[1]));

        assert!(cursor.find_exact(&root, &[3, 0]));
        assert_eq!(cursor.key(&root).unwrap().as_ref(), &[3, 0]);
        assert_eq!(cursor.value(&root).unwrap().as_ref(), &[1, 3, 0]);

        assert!(!cursor.find_exact(&root, &[3, 1]));
        assert_eq!(cursor.index(&root), -1);
    }
}
