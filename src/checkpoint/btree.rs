//! In-memory B-tree over checkpoint keys
//!
//! Keys are (timestamp, rank) pairs ordered lexicographically, so duplicate
//! timestamps stay distinct and a floor lookup with rank `u32::MAX` lands on
//! the latest checkpoint at that timestamp.

/// Maximum keys per node before it splits
const MAX_KEYS: usize = 15;

/// One checkpoint key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Key {
    pub timestamp: i64,
    pub rank: u32,
}

#[derive(Debug, Default)]
struct BTreeNode {
    keys: Vec<Key>,
    /// Empty for leaves, otherwise `keys.len() + 1` entries
    children: Vec<BTreeNode>,
}

impl BTreeNode {
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn is_full(&self) -> bool {
        self.keys.len() == MAX_KEYS
    }

    /// Split full child `idx`, hoisting its median key into `self`
    fn split_child(&mut self, idx: usize) {
        let child = &mut self.children[idx];
        let mid = MAX_KEYS / 2;

        let right_keys = child.keys.split_off(mid + 1);
        let median = child.keys.pop().expect("full node has a median");
        let right_children = if child.is_leaf() {
            Vec::new()
        } else {
            child.children.split_off(mid + 1)
        };

        self.keys.insert(idx, median);
        self.children.insert(
            idx + 1,
            BTreeNode {
                keys: right_keys,
                children: right_children,
            },
        );
    }

    /// Insert into a node known not to be full
    fn insert_non_full(&mut self, key: Key) {
        let mut idx = self.keys.partition_point(|k| *k <= key);
        if self.is_leaf() {
            self.keys.insert(idx, key);
            return;
        }
        if self.children[idx].is_full() {
            self.split_child(idx);
            if key > self.keys[idx] {
                idx += 1;
            }
        }
        self.children[idx].insert_non_full(key);
    }

    /// Largest key <= `key` in this subtree
    fn floor(&self, key: Key) -> Option<Key> {
        let idx = self.keys.partition_point(|k| *k <= key);
        let here = idx.checked_sub(1).map(|i| self.keys[i]);
        if self.is_leaf() {
            return here;
        }
        // Keys below children[idx] all sit between keys[idx-1] and keys[idx]
        self.children[idx].floor(key).or(here)
    }
}

/// B-tree of checkpoint keys with floor lookup
#[derive(Debug, Default)]
pub struct CheckpointBTree {
    root: BTreeNode,
    len: usize,
}

impl CheckpointBTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, key: Key) {
        if self.root.is_full() {
            let old_root = std::mem::take(&mut self.root);
            self.root.children.push(old_root);
            self.root.split_child(0);
        }
        self.root.insert_non_full(key);
        self.len += 1;
    }

    /// Largest key <= `key`, `None` when every key is greater
    pub fn floor(&self, key: Key) -> Option<Key> {
        self.root.floor(key)
    }
}
