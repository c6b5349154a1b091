//! History-tree-backed segment store
//!
//! Disk-backed variant for segment sets too large to keep in memory.
//! Segments are packed onto "lanes": each lane is one quark of an
//! underlying history tree, and a lane only holds segments that do not
//! overlap each other. The label rides along as the interval's string
//! value.
//!
//! The store must be finished (closing its tree) before it can be queried.

use std::path::Path;

use tracing::debug;

use crate::history::error::{HistoryError, HistoryResult};
use crate::history::interval::Interval;
use crate::history::tree::{HistoryTree, TreeParams};
use crate::history::value::StateValue;
use crate::segment::{Segment, SegmentStore};

/// Disk-backed segment store packing segments onto non-overlapping lanes
pub struct HistorySegmentStore {
    tree: HistoryTree,
    /// Highest end time stored on each lane so far
    lane_ends: Vec<i64>,
    len: usize,
    finished: bool,
}

impl HistorySegmentStore {
    /// Create a store backed by a fresh tree file at `path`. Segments must
    /// not start before `start_time`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        start_time: i64,
        params: TreeParams,
    ) -> HistoryResult<Self> {
        Ok(Self {
            tree: HistoryTree::create(path, start_time, params)?,
            lane_ends: Vec::new(),
            len: 0,
            finished: false,
        })
    }

    /// First lane whose segments all end before `start`, allocating a new
    /// one when every existing lane still overlaps
    fn pick_lane(&mut self, start: i64) -> usize {
        match self.lane_ends.iter().position(|&end| end < start) {
            Some(lane) => lane,
            None => {
                self.lane_ends.push(i64::MIN);
                debug!(lanes = self.lane_ends.len(), "opened segment lane");
                self.lane_ends.len() - 1
            }
        }
    }

    /// Flush and close the underlying tree. No more segments can be added;
    /// queries become available.
    pub fn finish(&mut self) -> HistoryResult<()> {
        let end = self.tree.end_time();
        self.tree.close(end)?;
        self.finished = true;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl SegmentStore for HistorySegmentStore {
    fn add(&mut self, segment: Segment) -> HistoryResult<()> {
        if self.finished {
            return Err(HistoryError::AlreadyClosed);
        }
        let lane = self.pick_lane(segment.start);
        let interval = Interval::new(
            segment.start,
            segment.end,
            lane as u32,
            StateValue::Str(segment.label),
        )?;
        self.tree.insert(interval)?;
        self.lane_ends[lane] = self.lane_ends[lane].max(segment.end);
        self.len += 1;
        Ok(())
    }

    fn len(&self) -> usize {
        self.len
    }

    fn intersecting(&self, start: i64, end: i64) -> HistoryResult<Vec<Segment>> {
        if !self.finished {
            return Err(HistoryError::IncompleteHistory);
        }

        let tree_start = self.tree.start_time();
        let tree_end = self.tree.end_time();
        if end < tree_start || start > tree_end {
            return Ok(Vec::new());
        }
        let from = start.max(tree_start);

        let mut segments = Vec::new();
        for lane in 0..self.lane_ends.len() as u32 {
            for item in self.tree.query_range(lane, from, end)? {
                let interval = item?;
                let label = match interval.value {
                    StateValue::Str(label) => label,
                    other => {
                        return Err(HistoryError::Corruption(format!(
                            "segment lane {} holds non-string value {}",
                            lane, other
                        )))
                    }
                };
                segments.push(Segment {
                    start: interval.start,
                    end: interval.end,
                    label,
                });
            }
        }

        segments.sort();
        Ok(segments)
    }
}
