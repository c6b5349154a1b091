//! Positional checkpoint table
//!
//! Checkpoints are appended in insertion order; the rank is the position.
//! Pairs with the B-tree, which answers "which rank covers timestamp t".

use serde::{Deserialize, Serialize};

/// One persisted checkpoint: a timestamp and where the producer was in its
/// input at that moment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub timestamp: i64,
    /// Producer-defined position, typically a byte offset or event ordinal
    pub location: u64,
    pub rank: u32,
}

/// Append-only, rank-addressed checkpoint storage
#[derive(Debug, Default)]
pub struct RankTable {
    checkpoints: Vec<Checkpoint>,
}

impl RankTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a checkpoint and return its rank
    pub fn push(&mut self, timestamp: i64, location: u64) -> u32 {
        let rank = self.checkpoints.len() as u32;
        self.checkpoints.push(Checkpoint {
            timestamp,
            location,
            rank,
        });
        rank
    }

    pub fn get(&self, rank: u32) -> Option<&Checkpoint> {
        self.checkpoints.get(rank as usize)
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Checkpoint> {
        self.checkpoints.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_assigns_sequential_ranks() {
        let mut table = RankTable::new();
        assert_eq!(table.push(100, 0), 0);
        assert_eq!(table.push(200, 512), 1);
        assert_eq!(table.push(300, 1024), 2);
        assert_eq!(table.len(), 3);

        let cp = table.get(1).unwrap();
        assert_eq!(cp.timestamp, 200);
        assert_eq!(cp.location, 512);
        assert_eq!(cp.rank, 1);
        assert!(table.get(3).is_none());
    }
}
