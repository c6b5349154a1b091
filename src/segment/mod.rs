//! Segment stores: labeled time ranges with intersection queries
//!
//! A segment is a closed `[start, end]` range with a label, typically a
//! latency or a span of activity derived from the state history. Stores are
//! interchangeable behind one trait; they differ in memory footprint and
//! lookup cost.

pub mod btree;
pub mod history;
pub mod list;

use crate::history::error::{HistoryError, HistoryResult};

pub use btree::BTreeSegmentStore;
pub use history::HistorySegmentStore;
pub use list::ListSegmentStore;

/// One labeled time range, bounds inclusive
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Segment {
    pub start: i64,
    pub end: i64,
    pub label: String,
}

impl Segment {
    pub fn new(start: i64, end: i64, label: impl Into<String>) -> HistoryResult<Self> {
        if start > end {
            return Err(HistoryError::InvalidInterval(format!(
                "segment start {} after end {}",
                start, end
            )));
        }
        Ok(Self {
            start,
            end,
            label: label.into(),
        })
    }

    /// Closed-range intersection test
    pub fn intersects(&self, start: i64, end: i64) -> bool {
        self.start <= end && self.end >= start
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

/// Common surface of the segment store implementations
pub trait SegmentStore {
    fn add(&mut self, segment: Segment) -> HistoryResult<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Segments intersecting `[start, end]` (inclusive on both bounds),
    /// ordered by (start, end)
    fn intersecting(&self, start: i64, end: i64) -> HistoryResult<Vec<Segment>>;
}

#[cfg(test)]
pub(crate) mod store_tests {
    //! Shared behavioral checks run against every store implementation

    use super::*;

    pub fn seg(start: i64, end: i64, label: &str) -> Segment {
        Segment::new(start, end, label).unwrap()
    }

    /// Fill a store with a fixed scenario and verify intersection queries
    pub fn check_store_contract<S: SegmentStore>(store: &mut S) {
        store.add(seg(0, 10, "a")).unwrap();
        store.add(seg(5, 25, "b")).unwrap();
        store.add(seg(30, 40, "c")).unwrap();
        store.add(seg(35, 35, "d")).unwrap();
        assert_eq!(store.len(), 4);
    }

    pub fn check_store_queries<S: SegmentStore>(store: &S) {
        // Bounds are inclusive on both sides
        let hits = store.intersecting(10, 30).unwrap();
        let labels: Vec<&str> = hits.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "b", "c"]);

        // Point query inside one segment
        let hits = store.intersecting(35, 35).unwrap();
        let labels: Vec<&str> = hits.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["c", "d"]);

        // Ordered by (start, end)
        let hits = store.intersecting(i64::MIN, i64::MAX).unwrap();
        let starts: Vec<i64> = hits.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![0, 5, 30, 35]);

        // Nothing in the gap
        assert!(store.intersecting(26, 29).unwrap().is_empty());
    }

    #[test]
    fn test_segment_rejects_inverted_range() {
        assert!(matches!(
            Segment::new(10, 5, "x").unwrap_err(),
            HistoryError::InvalidInterval(_)
        ));
    }

    #[test]
    fn test_segment_intersects() {
        let s = seg(10, 20, "x");
        assert!(s.intersects(20, 30));
        assert!(s.intersects(0, 10));
        assert!(s.intersects(15, 15));
        assert!(!s.intersects(21, 30));
        assert!(!s.intersects(0, 9));
        assert_eq!(s.duration(), 10);
    }
}
