//! Sorted-vector segment store
//!
//! Cheapest store for moderate counts: one contiguous allocation, binary
//! search on insert and a bounded scan on query.

use crate::history::error::HistoryResult;
use crate::segment::{Segment, SegmentStore};

/// Segments in a vector kept sorted by (start, end, label)
#[derive(Debug, Default)]
pub struct ListSegmentStore {
    segments: Vec<Segment>,
}

impl ListSegmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SegmentStore for ListSegmentStore {
    fn add(&mut self, segment: Segment) -> HistoryResult<()> {
        let idx = self.segments.partition_point(|s| *s <= segment);
        self.segments.insert(idx, segment);
        Ok(())
    }

    fn len(&self) -> usize {
        self.segments.len()
    }

    fn intersecting(&self, start: i64, end: i64) -> HistoryResult<Vec<Segment>> {
        // Sorted by start, so the scan stops at the first segment past the
        // range; earlier segments still need the end check
        Ok(self
            .segments
            .iter()
            .take_while(|s| s.start <= end)
            .filter(|s| s.end >= start)
            .cloned()
            .collect())
    }
}
