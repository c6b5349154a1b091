//! Balanced-tree segment store
//!
//! Uses a `BTreeMap` keyed by start time, so inserts stay cheap for large,
//! unordered segment sets and range queries only touch the keys up to the
//! query end.

use std::collections::BTreeMap;

use crate::history::error::HistoryResult;
use crate::segment::{Segment, SegmentStore};

/// Segments bucketed by start time in a balanced tree
#[derive(Debug, Default)]
pub struct BTreeSegmentStore {
    /// Buckets sorted by (end, label) so full results come out
    /// (start, end)-ordered
    by_start: BTreeMap<i64, Vec<Segment>>,
    len: usize,
}

impl BTreeSegmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SegmentStore for BTreeSegmentStore {
    fn add(&mut self, segment: Segment) -> HistoryResult<()> {
        let bucket = self.by_start.entry(segment.start).or_default();
        let idx = bucket.partition_point(|s| (s.end, &s.label) <= (segment.end, &segment.label));
        bucket.insert(idx, segment);
        self.len += 1;
        Ok(())
    }

    fn len(&self) -> usize {
        self.len
    }

    fn intersecting(&self, start: i64, end: i64) -> HistoryResult<Vec<Segment>> {
        Ok(self
            .by_start
            .range(..=end)
            .flat_map(|(_, bucket)| bucket.iter())
            .filter(|s| s.end >= start)
            .cloned()
            .collect())
    }
}
