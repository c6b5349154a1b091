//! Tree nodes and their fixed-size block format
//!
//! Every node serializes into exactly one `block_size`-byte block.
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ COMMON HEADER (30 bytes)                    │
//! │   type: u8 (1 = core, 2 = leaf)             │
//! │   start: i64                                │
//! │   end: i64                                  │
//! │   seq: u32                                  │
//! │   parent: i32 (-1 for the root)             │
//! │   interval_count: u32                       │
//! │   closed: u8                                │
//! ├─────────────────────────────────────────────┤
//! │ CORE HEADER (core nodes only, fixed size)   │
//! │   child_count: u32                          │
//! │   children: max_children x (seq u32,        │
//! │             start i64), unused slots zeroed │
//! ├─────────────────────────────────────────────┤
//! │ INTERVALS (variable), then zero padding     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The core header is always serialized at its full size so the interval
//! section starts at a fixed offset and free-space accounting never shifts.

use crate::history::error::{HistoryError, HistoryResult};
use crate::history::interval::Interval;
use crate::history::value::ByteReader;

/// On-disk type tag for core (internal) nodes
const NODE_TYPE_CORE: u8 = 1;
/// On-disk type tag for leaf nodes
const NODE_TYPE_LEAF: u8 = 2;

/// Size of the header part shared by both node types
pub const COMMON_HEADER_SIZE: usize = 1 + 8 + 8 + 4 + 4 + 4 + 1;

/// Capacity signal: the node has no room for the requested addition.
///
/// This is expected control flow (the caller splits the node), not an error
/// surfaced to users, so it is a plain unit struct rather than a
/// `HistoryError` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeFull;

/// Descriptor of one child held by a core node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRef {
    /// Sequence number of the child node
    pub seq: u32,
    /// Start time of the child node
    pub start: i64,
}

/// Type-specific part of a node
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Internal node holding ordered child descriptors
    Core { children: Vec<ChildRef> },
    /// Bottom-level node
    Leaf,
}

/// One node of the history tree
#[derive(Debug, Clone)]
pub struct Node {
    /// Position in the node grid of the file; assigned once, never changes
    seq: u32,
    /// Parent sequence number, -1 for the root
    parent: i32,
    /// Start time, immutable
    start: i64,
    /// End time; meaningful only once the node is closed
    end: i64,
    /// Set when insertion time has passed this node's range
    closed: bool,
    /// Intervals, kept sorted by ascending end time
    intervals: Vec<Interval>,
    /// Sum of `size_on_disk()` over `intervals`
    interval_bytes: usize,
    kind: NodeKind,
}

impl Node {
    /// Create a new, empty core node
    pub fn new_core(seq: u32, parent: i32, start: i64) -> Self {
        Self {
            seq,
            parent,
            start,
            end: 0,
            closed: false,
            intervals: Vec::new(),
            interval_bytes: 0,
            kind: NodeKind::Core {
                children: Vec::new(),
            },
        }
    }

    /// Create a new, empty leaf node
    pub fn new_leaf(seq: u32, parent: i32, start: i64) -> Self {
        Self {
            seq,
            parent,
            start,
            end: 0,
            closed: false,
            intervals: Vec::new(),
            interval_bytes: 0,
            kind: NodeKind::Leaf,
        }
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn parent(&self) -> i32 {
        self.parent
    }

    /// Change this node's parent. Used when a new root is created above it.
    pub fn set_parent(&mut self, parent: i32) {
        self.parent = parent;
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    /// End time of this node; only meaningful once closed
    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_core(&self) -> bool {
        matches!(self.kind, NodeKind::Core { .. })
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Size of the type-specific header part
    fn specific_header_size(&self, max_children: usize) -> usize {
        match self.kind {
            NodeKind::Core { .. } => 4 + max_children * (4 + 8),
            NodeKind::Leaf => 0,
        }
    }

    /// Interval bytes a node of this kind can hold when empty. An interval
    /// larger than this can never be stored at this level, no matter how
    /// often the branch splits.
    pub fn capacity(&self, block_size: usize, max_children: usize) -> usize {
        block_size
            .saturating_sub(COMMON_HEADER_SIZE)
            .saturating_sub(self.specific_header_size(max_children))
    }

    /// Free bytes left in the interval section of this node's block
    pub fn free_space(&self, block_size: usize, max_children: usize) -> usize {
        block_size
            .saturating_sub(COMMON_HEADER_SIZE)
            .saturating_sub(self.specific_header_size(max_children))
            .saturating_sub(self.interval_bytes)
    }

    /// Add an interval, keeping the list sorted by end time.
    ///
    /// Fails with the capacity signal when the block has no room left.
    pub fn add_interval(
        &mut self,
        interval: Interval,
        block_size: usize,
        max_children: usize,
    ) -> Result<(), NodeFull> {
        if interval.size_on_disk() > self.free_space(block_size, max_children) {
            return Err(NodeFull);
        }

        // Inserts arrive roughly ordered, so search from the back
        let mut index = self.intervals.len();
        while index > 0 && interval.end < self.intervals[index - 1].end {
            index -= 1;
        }
        self.interval_bytes += interval.size_on_disk();
        self.intervals.insert(index, interval);
        Ok(())
    }

    /// Append a child descriptor; fails with the capacity signal when the
    /// fan-out limit is reached.
    ///
    /// Children are linked in ascending start-time order by construction.
    pub fn add_child(&mut self, child: ChildRef, max_children: usize) -> Result<(), NodeFull> {
        match &mut self.kind {
            NodeKind::Core { children } => {
                if children.len() == max_children {
                    return Err(NodeFull);
                }
                children.push(child);
                Ok(())
            }
            NodeKind::Leaf => unreachable!("add_child called on a leaf node"),
        }
    }

    /// Child descriptors, empty for leaves
    pub fn children(&self) -> &[ChildRef] {
        match &self.kind {
            NodeKind::Core { children } => children,
            NodeKind::Leaf => &[],
        }
    }

    /// The most recently linked child, if any
    pub fn latest_child(&self) -> Option<ChildRef> {
        self.children().last().copied()
    }

    /// Select the child covering timestamp `t`: the last child whose start
    /// is <= `t`. Children cover contiguous, gap-free ranges.
    pub fn select_child(&self, t: i64) -> Option<ChildRef> {
        let children = self.children();
        let idx = children.partition_point(|c| c.start <= t);
        if idx == 0 {
            return None;
        }
        Some(children[idx - 1])
    }

    /// Freeze this node's end time. After this, the node is written once and
    /// becomes immutable.
    pub fn close(&mut self, end: i64) {
        debug_assert!(
            self.intervals.last().map_or(true, |iv| iv.end <= end),
            "closing end time must cover all contained intervals"
        );
        self.end = end;
        self.closed = true;
    }

    /// First index whose interval could still cover `t`, given the list is
    /// sorted by end time
    fn start_index_for(&self, t: i64) -> usize {
        self.intervals.partition_point(|iv| iv.end < t)
    }

    /// Look up the interval of `quark` covering timestamp `t` in this node
    pub fn find_interval(&self, quark: u32, t: i64) -> Option<&Interval> {
        self.intervals[self.start_index_for(t)..]
            .iter()
            .find(|iv| iv.quark == quark && iv.contains(t))
    }

    /// Smallest start strictly greater than `t` among this node's intervals
    /// for `quark`. Used by range queries to jump over gaps.
    pub fn next_start_after(&self, quark: u32, t: i64) -> Option<i64> {
        self.intervals
            .iter()
            .filter(|iv| iv.quark == quark && iv.start > t)
            .map(|iv| iv.start)
            .min()
    }

    /// Serialize this node into exactly one block
    pub fn serialize(&self, block_size: usize, max_children: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(block_size);

        let type_byte = match self.kind {
            NodeKind::Core { .. } => NODE_TYPE_CORE,
            NodeKind::Leaf => NODE_TYPE_LEAF,
        };
        buf.push(type_byte);
        buf.extend_from_slice(&self.start.to_le_bytes());
        buf.extend_from_slice(&self.end.to_le_bytes());
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&self.parent.to_le_bytes());
        buf.extend_from_slice(&(self.intervals.len() as u32).to_le_bytes());
        buf.push(self.closed as u8);

        if let NodeKind::Core { children } = &self.kind {
            buf.extend_from_slice(&(children.len() as u32).to_le_bytes());
            for child in children {
                buf.extend_from_slice(&child.seq.to_le_bytes());
                buf.extend_from_slice(&child.start.to_le_bytes());
            }
            // Zero out the unused slots so the interval section offset is fixed
            for _ in children.len()..max_children {
                buf.extend_from_slice(&0u32.to_le_bytes());
                buf.extend_from_slice(&0i64.to_le_bytes());
            }
        }

        for interval in &self.intervals {
            interval.write_to(&mut buf);
        }

        debug_assert!(buf.len() <= block_size, "node overflowed its block");
        buf.resize(block_size, 0);
        buf
    }

    /// Rebuild a node from one block. The node type is decoded from the tag
    /// byte into the `NodeKind` union; unknown tags and counts that would
    /// overflow the block are reported as corruption.
    pub fn deserialize(buf: &[u8], max_children: usize) -> HistoryResult<Self> {
        let mut reader = ByteReader::new(buf);

        let type_byte = reader.read_u8()?;
        let start = reader.read_i64()?;
        let end = reader.read_i64()?;
        let seq = reader.read_u32()?;
        let parent = reader.read_i32()?;
        let interval_count = reader.read_u32()? as usize;
        let closed = reader.read_u8()? != 0;

        let kind = match type_byte {
            NODE_TYPE_CORE => {
                let child_count = reader.read_u32()? as usize;
                if child_count > max_children {
                    return Err(HistoryError::Corruption(format!(
                        "node #{} claims {} children, max is {}",
                        seq, child_count, max_children
                    )));
                }
                let mut children = Vec::with_capacity(child_count);
                for _ in 0..child_count {
                    let child_seq = reader.read_u32()?;
                    let child_start = reader.read_i64()?;
                    children.push(ChildRef {
                        seq: child_seq,
                        start: child_start,
                    });
                }
                reader.skip((max_children - child_count) * (4 + 8))?;
                NodeKind::Core { children }
            }
            NODE_TYPE_LEAF => NodeKind::Leaf,
            other => {
                return Err(HistoryError::Corruption(format!(
                    "unknown node type tag: {}",
                    other
                )));
            }
        };

        // A corrupt count cannot claim more intervals than the block can hold
        if interval_count > buf.len() / INTERVAL_MIN_SIZE {
            return Err(HistoryError::Corruption(format!(
                "node #{} claims {} intervals in a {}-byte block",
                seq,
                interval_count,
                buf.len()
            )));
        }

        let mut intervals = Vec::with_capacity(interval_count);
        let mut interval_bytes = 0;
        for _ in 0..interval_count {
            let interval = Interval::read_from(&mut reader)?;
            interval_bytes += interval.size_on_disk();
            intervals.push(interval);
        }

        Ok(Self {
            seq,
            parent,
            start,
            end,
            closed,
            intervals,
            interval_bytes,
            kind,
        })
    }
}

/// Smallest possible serialized interval (null value)
const INTERVAL_MIN_SIZE: usize = 21;
