//! The history tree proper: incremental construction and time queries
//!
//! The tree is built left to right, following insertion time. Only the
//! "latest branch" (the rightmost path, root to leaf) is open and mutable;
//! every node left of it is closed, written once, and immutable. When the
//! active leaf runs out of block space it is closed at the current tree end
//! and a sibling starting one unit later is opened, splitting ancestors and
//! growing a new root as fan-out limits are hit.
//!
//! Core nodes carry intervals too (those too long to fit under one child),
//! so queries inspect every node on the root-to-leaf path for `t`, picking
//! the child covering `t` by binary search on child start times.
//!
//! One writer mutates the tree; any number of readers may query it
//! concurrently. The latest branch sits behind a `parking_lot::RwLock`,
//! closed nodes are served lock-free through `NodeStore`.

use std::mem;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::history::error::{HistoryError, HistoryResult};
use crate::history::interval::Interval;
use crate::history::io::{FileHeader, NodeStore};
use crate::history::node::{ChildRef, Node};

/// Construction parameters for a new tree
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    /// Size of one node block in bytes
    pub block_size: usize,
    /// Maximum children per core node
    pub max_children: usize,
    /// Version of the event provider building this history
    pub provider_version: u32,
    /// Slots in the direct-mapped read cache
    pub cache_slots: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024,
            max_children: 50,
            provider_version: 0,
            cache_slots: 256,
        }
    }
}

/// Mutable part of the tree, guarded by one RwLock
#[derive(Debug)]
struct TreeState {
    /// Open nodes, root first, active leaf last. Empty once the tree is
    /// complete.
    latest_branch: Vec<Node>,
    node_count: u32,
    root_seq: u32,
    /// Latest end time seen so far
    tree_end: i64,
    interval_count: u64,
    complete: bool,
}

/// Disk-backed interval tree over one time range
#[derive(Debug)]
pub struct HistoryTree {
    store: NodeStore,
    block_size: usize,
    max_children: usize,
    provider_version: u32,
    tree_start: i64,
    state: RwLock<TreeState>,
}

impl HistoryTree {
    /// Create a new, empty tree starting at `tree_start`, truncating any
    /// file already at `path`
    pub fn create<P: AsRef<Path>>(
        path: P,
        tree_start: i64,
        params: TreeParams,
    ) -> HistoryResult<Self> {
        let store = NodeStore::create(
            &path,
            params.block_size,
            params.max_children,
            params.cache_slots,
        )?;

        let root = Node::new_leaf(0, -1, tree_start);
        let tree = Self {
            store,
            block_size: params.block_size,
            max_children: params.max_children,
            provider_version: params.provider_version,
            tree_start,
            state: RwLock::new(TreeState {
                latest_branch: vec![root],
                node_count: 1,
                root_seq: 0,
                tree_end: tree_start,
                interval_count: 0,
                complete: false,
            }),
        };

        // Mark the file in-progress up front so a crash mid-build is
        // detected on the next open
        tree.store.write_header(&tree.header_snapshot(&tree.state.read()))?;
        info!(tree_start, block_size = params.block_size, "created history tree");
        Ok(tree)
    }

    /// Open a finished tree for querying.
    ///
    /// Incomplete files and provider version mismatches are rejected with a
    /// dedicated error so the caller rebuilds instead of trusting stale or
    /// partial data.
    pub fn open<P: AsRef<Path>>(
        path: P,
        expected_provider_version: u32,
        cache_slots: usize,
    ) -> HistoryResult<Self> {
        // Block size and fan-out come from the header, so probe with a
        // throwaway store first
        let probe = NodeStore::open(&path, 0, 0, 1)?;
        let header = probe.read_header()?;
        drop(probe);

        if !header.complete {
            return Err(HistoryError::IncompleteHistory);
        }
        if header.provider_version != expected_provider_version {
            return Err(HistoryError::VersionMismatch {
                expected: expected_provider_version,
                found: header.provider_version,
            });
        }

        let store = NodeStore::open(
            &path,
            header.block_size as usize,
            header.max_children as usize,
            cache_slots,
        )?;
        let root = store.read_node(header.root_seq)?;

        info!(
            nodes = header.node_count,
            tree_start = header.tree_start,
            tree_end = root.end(),
            "opened history tree"
        );

        Ok(Self {
            block_size: header.block_size as usize,
            max_children: header.max_children as usize,
            provider_version: header.provider_version,
            tree_start: header.tree_start,
            state: RwLock::new(TreeState {
                latest_branch: Vec::new(),
                node_count: header.node_count,
                root_seq: header.root_seq,
                tree_end: root.end(),
                interval_count: 0,
                complete: true,
            }),
            store,
        })
    }

    pub fn start_time(&self) -> i64 {
        self.tree_start
    }

    /// Latest end time seen so far
    pub fn end_time(&self) -> i64 {
        self.state.read().tree_end
    }

    pub fn node_count(&self) -> u32 {
        self.state.read().node_count
    }

    /// Intervals inserted since creation. Not tracked across reopen.
    pub fn interval_count(&self) -> u64 {
        self.state.read().interval_count
    }

    pub fn is_complete(&self) -> bool {
        self.state.read().complete
    }

    pub fn provider_version(&self) -> u32 {
        self.provider_version
    }

    fn header_snapshot(&self, st: &TreeState) -> FileHeader {
        FileHeader {
            provider_version: self.provider_version,
            block_size: self.block_size as u32,
            max_children: self.max_children as u32,
            node_count: st.node_count,
            root_seq: st.root_seq,
            tree_start: self.tree_start,
            complete: st.complete,
        }
    }

    /// Insert one finished interval.
    ///
    /// Inserts are expected in roughly chronological order of start times;
    /// an interval starting before the tree start is out of range.
    pub fn insert(&self, interval: Interval) -> HistoryResult<()> {
        let mut st = self.state.write();
        if st.complete {
            return Err(HistoryError::AlreadyClosed);
        }
        if interval.start < self.tree_start {
            return Err(HistoryError::TimeOutOfRange {
                t: interval.start,
                start: self.tree_start,
                end: st.tree_end,
            });
        }

        let end = interval.end;
        self.insert_in_branch(&mut st, interval)?;
        st.tree_end = st.tree_end.max(end);
        st.interval_count += 1;
        Ok(())
    }

    /// Place the interval in the deepest open node that has room and whose
    /// start does not exceed the interval's start
    fn insert_in_branch(&self, st: &mut TreeState, interval: Interval) -> HistoryResult<()> {
        let need = interval.size_on_disk();
        let mut idx = st.latest_branch.len() - 1;
        loop {
            let node = &st.latest_branch[idx];
            if need > node.free_space(self.block_size, self.max_children) {
                // Splitting opens an empty node of the same kind, so an
                // interval exceeding that capacity can never be placed
                let capacity = node.capacity(self.block_size, self.max_children);
                if need > capacity {
                    return Err(HistoryError::InvalidInterval(format!(
                        "interval needs {} bytes but a node at this level holds at most {}",
                        need, capacity
                    )));
                }
                self.add_sibling(st, idx)?;
                idx = st.latest_branch.len() - 1;
                continue;
            }
            if interval.start < node.start() {
                // The root starts at tree_start, which the caller validated
                idx -= 1;
                continue;
            }
            match st.latest_branch[idx].add_interval(interval, self.block_size, self.max_children)
            {
                Ok(()) => return Ok(()),
                // Free space was checked above
                Err(_) => unreachable!(),
            }
        }
    }

    /// Close the branch from `idx` down at the current tree end and open
    /// fresh siblings starting one unit later. Recurses upward when the
    /// parent's fan-out is already exhausted.
    fn add_sibling(&self, st: &mut TreeState, idx: usize) -> HistoryResult<()> {
        if idx == 0 {
            return self.add_new_root(st);
        }
        if st.latest_branch[idx - 1].children().len() == self.max_children {
            return self.add_sibling(st, idx - 1);
        }

        let split = st.tree_end;
        let depth = st.latest_branch.len();
        debug!(level = idx, split, "splitting branch");

        for i in (idx..depth).rev() {
            st.latest_branch[i].close(split);
        }
        for i in idx..depth {
            let seq = st.node_count;
            st.node_count += 1;
            let parent_seq = st.latest_branch[i - 1].seq() as i32;
            let fresh = if i == depth - 1 {
                Node::new_leaf(seq, parent_seq, split + 1)
            } else {
                Node::new_core(seq, parent_seq, split + 1)
            };
            let closed = mem::replace(&mut st.latest_branch[i], fresh);
            self.store.write_node(&Arc::new(closed))?;

            // Room at level idx was verified above; deeper parents are fresh
            if st.latest_branch[i - 1]
                .add_child(ChildRef { seq, start: split + 1 }, self.max_children)
                .is_err()
            {
                unreachable!();
            }
        }
        Ok(())
    }

    /// Grow the tree one level: close the whole branch, put a new core root
    /// above the old one, and rebuild an open branch one deeper
    fn add_new_root(&self, st: &mut TreeState) -> HistoryResult<()> {
        let split = st.tree_end;
        let depth = st.latest_branch.len();

        let root_seq = st.node_count;
        st.node_count += 1;
        let mut new_root = Node::new_core(root_seq, -1, self.tree_start);
        debug!(root_seq, depth = depth + 1, "growing new root");

        let old_root = &mut st.latest_branch[0];
        old_root.set_parent(root_seq as i32);
        if new_root
            .add_child(
                ChildRef {
                    seq: old_root.seq(),
                    start: old_root.start(),
                },
                self.max_children,
            )
            .is_err()
        {
            // A fresh root always has room for its first child
            unreachable!();
        }

        for node in &mut st.latest_branch {
            node.close(split);
        }
        for closed in st.latest_branch.drain(..) {
            self.store.write_node(&Arc::new(closed))?;
        }

        st.latest_branch.push(new_root);
        st.root_seq = root_seq;
        for i in 1..=depth {
            let seq = st.node_count;
            st.node_count += 1;
            let parent_seq = st.latest_branch[i - 1].seq() as i32;
            let fresh = if i == depth {
                Node::new_leaf(seq, parent_seq, split + 1)
            } else {
                Node::new_core(seq, parent_seq, split + 1)
            };
            if st.latest_branch[i - 1]
                .add_child(ChildRef { seq, start: split + 1 }, self.max_children)
                .is_err()
            {
                // Every node on the rebuilt branch is fresh
                unreachable!();
            }
            st.latest_branch.push(fresh);
        }
        Ok(())
    }

    /// The state of `quark` at timestamp `t`, `None` when no interval of
    /// this quark covers `t`. Timestamps outside the tree's range have no
    /// state by definition.
    pub fn query_state(&self, quark: u32, t: i64) -> HistoryResult<Option<Interval>> {
        let st = self.state.read();
        if t < self.tree_start || t > st.tree_end {
            return Ok(None);
        }
        match self.probe(&st, quark, t)? {
            Probe::Found(interval) => Ok(Some(interval)),
            Probe::Gap { .. } => Ok(None),
        }
    }

    /// All intervals of `quark` intersecting `[t1, t2]`, in time order, as
    /// a lazy iterator. The range is clamped to the tree's range; an
    /// inverted range is an error.
    pub fn query_range(&self, quark: u32, t1: i64, t2: i64) -> HistoryResult<RangeIter<'_>> {
        if t2 < t1 {
            return Err(HistoryError::InvalidInterval(format!(
                "range end {} before range start {}",
                t2, t1
            )));
        }
        let tree_end = self.state.read().tree_end;
        Ok(RangeIter {
            tree: self,
            quark,
            cursor: t1.max(self.tree_start),
            end: t2.min(tree_end),
            done: false,
        })
    }

    /// One root-to-leaf descent for `(quark, t)`. Must be called with `t`
    /// inside the tree's range.
    fn probe(&self, st: &TreeState, quark: u32, t: i64) -> HistoryResult<Probe> {
        let mut seq = st.root_seq;
        let mut next_start: Option<i64> = None;

        loop {
            // The open branch is authoritative for its nodes; everything
            // else is on disk
            let open = st.latest_branch.iter().find(|n| n.seq() == seq);
            let from_disk;
            let node: &Node = match open {
                Some(node) => node,
                None => {
                    from_disk = self.store.read_node(seq)?;
                    &from_disk
                }
            };

            if let Some(interval) = node.find_interval(quark, t) {
                return Ok(Probe::Found(interval.clone()));
            }
            if let Some(start) = node.next_start_after(quark, t) {
                next_start = Some(next_start.map_or(start, |s| s.min(start)));
            }

            match node.select_child(t) {
                Some(child) => seq = child.seq,
                None => {
                    let covered_end = if node.is_closed() {
                        node.end()
                    } else {
                        st.tree_end
                    };
                    return Ok(Probe::Gap {
                        next_start,
                        covered_end,
                    });
                }
            }
        }
    }

    /// Freeze the tree: close and write every open node, then persist the
    /// header with the complete flag. Idempotent failure mode: a crash
    /// before the header write leaves the file detectably incomplete.
    pub fn close(&self, end_time: i64) -> HistoryResult<()> {
        let mut st = self.state.write();
        if st.complete {
            return Err(HistoryError::AlreadyClosed);
        }

        // Never cut off intervals already inserted
        let end = end_time.max(st.tree_end);
        st.tree_end = end;

        for node in &mut st.latest_branch {
            node.close(end);
        }
        for closed in st.latest_branch.drain(..) {
            self.store.write_node(&Arc::new(closed))?;
        }

        st.complete = true;
        self.store.write_header(&self.header_snapshot(&st))?;
        self.store.sync()?;
        info!(
            nodes = st.node_count,
            intervals = st.interval_count,
            tree_end = end,
            "closed history tree"
        );
        Ok(())
    }

    /// Append application data (e.g. the attribute registry) past the node
    /// grid. Only valid once the tree is complete.
    pub fn write_trailing_data(&self, data: &[u8]) -> HistoryResult<()> {
        let st = self.state.read();
        if !st.complete {
            return Err(HistoryError::IncompleteHistory);
        }
        self.store.write_trailing_data(st.node_count, data)
    }

    /// Read back the trailing application data
    pub fn read_trailing_data(&self) -> HistoryResult<Vec<u8>> {
        let st = self.state.read();
        if !st.complete {
            return Err(HistoryError::IncompleteHistory);
        }
        self.store.read_trailing_data(st.node_count)
    }
}

/// Outcome of one descent
enum Probe {
    Found(Interval),
    /// No interval of the quark covers `t`. `next_start` is the smallest
    /// start > `t` seen on the path; `covered_end` is how far the path's
    /// bottom node extends, beyond which a new descent is needed.
    Gap {
        next_start: Option<i64>,
        covered_end: i64,
    },
}

/// Lazy range query. Each step re-descends from the root, so the iterator
/// stays valid while the tree keeps growing.
#[derive(Debug)]
pub struct RangeIter<'a> {
    tree: &'a HistoryTree,
    quark: u32,
    cursor: i64,
    end: i64,
    done: bool,
}

impl Iterator for RangeIter<'_> {
    type Item = HistoryResult<Interval>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.cursor <= self.end {
            let st = self.tree.state.read();
            let probe = match self.tree.probe(&st, self.quark, self.cursor) {
                Ok(probe) => probe,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            drop(st);

            match probe {
                Probe::Found(interval) => {
                    match interval.end.checked_add(1) {
                        Some(next) => self.cursor = next,
                        None => self.done = true,
                    }
                    return Some(Ok(interval));
                }
                Probe::Gap {
                    next_start,
                    covered_end,
                } => {
                    // Anything starting within the covered range would have
                    // been on this path, so the jump is exact
                    let jump = next_start
                        .filter(|s| *s <= covered_end)
                        .unwrap_or_else(|| covered_end.saturating_add(1));
                    if jump <= self.cursor {
                        // Covered range cannot extend backwards; stop rather
                        // than spin
                        self.done = true;
                    } else {
                        self.cursor = jump;
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::value::StateValue;
    use tempfile::tempdir;

    /// Small blocks so a few hundred inserts exercise splits and root growth
    fn tiny_params() -> TreeParams {
        TreeParams {
            block_size: 256,
            max_children: 3,
            provider_version: 1,
            cache_slots: 16,
        }
    }

    fn iv(start: i64, end: i64, quark: u32) -> Interval {
        Interval::new(start, end, quark, StateValue::Long(start)).unwrap()
    }

    #[test]
    fn test_single_node_insert_and_query() {
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(dir.path().join("t.ht"), 0, tiny_params()).unwrap();

        tree.insert(iv(0, 10, 1)).unwrap();
        tree.insert(iv(11, 20, 1)).unwrap();
        tree.insert(iv(0, 20, 2)).unwrap();

        let hit = tree.query_state(1, 5).unwrap().unwrap();
        assert_eq!((hit.start, hit.end), (0, 10));
        let hit = tree.query_state(1, 11).unwrap().unwrap();
        assert_eq!((hit.start, hit.end), (11, 20));
        assert_eq!(tree.query_state(2, 20).unwrap().unwrap().quark, 2);
        assert!(tree.query_state(3, 5).unwrap().is_none());
    }

    #[test]
    fn test_query_outside_range_finds_nothing() {
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(dir.path().join("t.ht"), 100, tiny_params()).unwrap();
        tree.insert(iv(100, 200, 1)).unwrap();

        assert!(tree.query_state(1, 99).unwrap().is_none());
        assert!(tree.query_state(1, 201).unwrap().is_none());
        assert!(tree.query_state(1, 150).unwrap().is_some());

        assert!(matches!(
            tree.query_range(1, 50, 10).unwrap_err(),
            HistoryError::InvalidInterval(_)
        ));
    }

    #[test]
    fn test_insert_before_tree_start() {
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(dir.path().join("t.ht"), 100, tiny_params()).unwrap();
        assert!(matches!(
            tree.insert(iv(50, 150, 1)).unwrap_err(),
            HistoryError::TimeOutOfRange { t: 50, .. }
        ));
    }

    #[test]
    fn test_interval_larger_than_a_block_rejected() {
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(dir.path().join("t.ht"), 0, tiny_params()).unwrap();

        // 300-byte payload cannot fit a 256-byte block even when empty
        let big = Interval::new(0, 10, 1, StateValue::Str("x".repeat(300))).unwrap();
        assert!(matches!(
            tree.insert(big).unwrap_err(),
            HistoryError::InvalidInterval(_)
        ));
        assert_eq!(tree.node_count(), 1);

        // The tree is still usable afterwards
        tree.insert(iv(0, 10, 1)).unwrap();
        assert!(tree.query_state(1, 5).unwrap().is_some());
    }

    #[test]
    fn test_interval_too_large_for_a_core_node_rejected() {
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(dir.path().join("t.ht"), 0, tiny_params()).unwrap();

        // Force splits so the open leaf no longer starts at time zero
        for i in 0..50 {
            tree.insert(iv(i * 10, i * 10 + 9, 1)).unwrap();
        }
        assert!(tree.node_count() > 1);

        // Fits an empty leaf (226 bytes of interval space) but not an empty
        // core (186 bytes), and its early start forces it up into a core
        let long = Interval::new(0, 495, 2, StateValue::Str("y".repeat(180))).unwrap();
        assert!(matches!(
            tree.insert(long).unwrap_err(),
            HistoryError::InvalidInterval(_)
        ));

        // Nothing was lost along the way
        for i in 0..50 {
            assert!(tree.query_state(1, i * 10 + 5).unwrap().is_some());
        }
    }

    #[test]
    fn test_splits_preserve_every_interval() {
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(dir.path().join("t.ht"), 0, tiny_params()).unwrap();

        // Enough sequential intervals to force sibling splits and at least
        // one new root with a 256-byte block and fan-out 3
        let n = 500;
        for i in 0..n {
            tree.insert(iv(i * 10, i * 10 + 9, (i % 4) as u32)).unwrap();
        }
        assert!(tree.node_count() > 4, "expected the tree to split");

        for i in 0..n {
            let hit = tree
                .query_state((i % 4) as u32, i * 10 + 5)
                .unwrap()
                .unwrap_or_else(|| panic!("lost interval starting at {}", i * 10));
            assert_eq!(hit.start, i * 10);
            assert_eq!(hit.value, StateValue::Long(i * 10));
        }
    }

    #[test]
    fn test_long_interval_lands_in_core_node() {
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(dir.path().join("t.ht"), 0, tiny_params()).unwrap();

        for i in 0..200 {
            tree.insert(iv(i * 10, i * 10 + 9, 1)).unwrap();
        }
        // Starts near the beginning: must climb above the current leaf
        tree.insert(iv(5, 1995, 9)).unwrap();

        let hit = tree.query_state(9, 1000).unwrap().unwrap();
        assert_eq!((hit.start, hit.end), (5, 1995));
    }

    #[test]
    fn test_range_query_with_gaps() {
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(dir.path().join("t.ht"), 0, tiny_params()).unwrap();

        tree.insert(iv(0, 9, 1)).unwrap();
        tree.insert(iv(30, 39, 1)).unwrap();
        tree.insert(iv(70, 79, 1)).unwrap();
        // Other quarks fill the timeline so the tree splits around the gaps
        for i in 0..200 {
            tree.insert(iv(i * 10, i * 10 + 9, 2)).unwrap();
        }

        let starts: Vec<i64> = tree
            .query_range(1, 0, 100)
            .unwrap()
            .map(|r| r.unwrap().start)
            .collect();
        assert_eq!(starts, vec![0, 30, 70]);

        // Range cut mid-interval still yields the covering interval first
        let starts: Vec<i64> = tree
            .query_range(1, 5, 35)
            .unwrap()
            .map(|r| r.unwrap().start)
            .collect();
        assert_eq!(starts, vec![0, 30]);
    }

    #[test]
    fn test_range_query_clamps_end() {
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(dir.path().join("t.ht"), 0, tiny_params()).unwrap();
        tree.insert(iv(0, 50, 1)).unwrap();

        let hits: Vec<Interval> = tree
            .query_range(1, 0, i64::MAX)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_close_then_insert_fails() {
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(dir.path().join("t.ht"), 0, tiny_params()).unwrap();
        tree.insert(iv(0, 10, 1)).unwrap();
        tree.close(100).unwrap();

        assert!(matches!(
            tree.insert(iv(20, 30, 1)).unwrap_err(),
            HistoryError::AlreadyClosed
        ));
        assert!(matches!(
            tree.close(200).unwrap_err(),
            HistoryError::AlreadyClosed
        ));
    }

    #[test]
    fn test_reopen_and_query() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ht");

        let n = 300;
        {
            let tree = HistoryTree::create(&path, 0, tiny_params()).unwrap();
            for i in 0..n {
                tree.insert(iv(i * 10, i * 10 + 9, (i % 3) as u32)).unwrap();
            }
            tree.close(n * 10).unwrap();
        }

        let tree = HistoryTree::open(&path, 1, 16).unwrap();
        assert!(tree.is_complete());
        assert_eq!(tree.start_time(), 0);
        assert_eq!(tree.end_time(), n * 10);

        for i in 0..n {
            let hit = tree.query_state((i % 3) as u32, i * 10 + 5).unwrap().unwrap();
            assert_eq!(hit.start, i * 10);
        }
    }

    #[test]
    fn test_open_incomplete_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ht");
        {
            let tree = HistoryTree::create(&path, 0, tiny_params()).unwrap();
            tree.insert(iv(0, 10, 1)).unwrap();
            // Dropped without close
        }
        assert!(matches!(
            HistoryTree::open(&path, 1, 16).unwrap_err(),
            HistoryError::IncompleteHistory
        ));
    }

    #[test]
    fn test_open_provider_version_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ht");
        {
            let tree = HistoryTree::create(&path, 0, tiny_params()).unwrap();
            tree.close(10).unwrap();
        }
        assert!(matches!(
            HistoryTree::open(&path, 2, 16).unwrap_err(),
            HistoryError::VersionMismatch {
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn test_trailing_data_through_tree() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ht");

        let tree = HistoryTree::create(&path, 0, tiny_params()).unwrap();
        assert!(matches!(
            tree.write_trailing_data(b"too early").unwrap_err(),
            HistoryError::IncompleteHistory
        ));

        tree.insert(iv(0, 10, 1)).unwrap();
        tree.close(10).unwrap();
        tree.write_trailing_data(b"registry").unwrap();
        drop(tree);

        let tree = HistoryTree::open(&path, 1, 16).unwrap();
        assert_eq!(tree.read_trailing_data().unwrap(), b"registry");
    }

    #[test]
    fn test_close_extends_to_requested_end() {
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(dir.path().join("t.ht"), 0, tiny_params()).unwrap();
        tree.insert(iv(0, 10, 1)).unwrap();
        tree.close(1000).unwrap();
        assert_eq!(tree.end_time(), 1000);

        // And never truncates below inserted data
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(dir.path().join("t.ht"), 0, tiny_params()).unwrap();
        tree.insert(iv(0, 500, 1)).unwrap();
        tree.close(100).unwrap();
        assert_eq!(tree.end_time(), 500);
    }
}
