//! # tracehist
//!
//! Temporal key-value store for trace analysis - persists computed system
//! state as a disk-backed interval tree and answers "what was the value of
//! attribute A at time T" over traces with billions of events.
//!
//! ## Features
//!
//! - **Bounded memory**: only the open branch of the tree lives in RAM
//! - **One-pass builds**: nodes are written once, never rewritten
//! - **Concurrent queries**: readers run while the build is in flight
//! - **Seek support**: checkpoint index for resuming raw event streams
//! - **Segment stores**: labeled time ranges with intersection queries
//!
//! ## Modules
//!
//! - [`history`]: the interval tree, its file format and build pipeline
//! - [`checkpoint`]: timestamp-to-location checkpoint index
//! - [`segment`]: interchangeable segment store implementations
//! - [`source`]: event sources and the attribute registry
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tracehist::history::{HistoryPipeline, HistoryTree, StateValue, TreeParams};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Create a tree starting at the first event's timestamp
//!     let tree = Arc::new(HistoryTree::create("trace.ht", 0, TreeParams::default())?);
//!
//!     // Feed intervals through the pipeline; one worker thread writes
//!     let pipeline = HistoryPipeline::new(10_000);
//!     pipeline.attach(Arc::clone(&tree))?;
//!     pipeline.insert_past_state(0, 99, 1, StateValue::Long(42))?;
//!     pipeline.close(100)?;
//!
//!     // Query the finished history
//!     let state = tree.query_state(1, 50)?;
//!     println!("state at t=50: {:?}", state);
//!
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod history;
pub mod segment;
pub mod source;

// Re-export top-level types for convenience
pub use history::{
    HistoryError, HistoryPipeline, HistoryResult, HistoryTree, Interval, RangeIter, StateValue,
    TreeParams,
};

pub use checkpoint::{Checkpoint, CheckpointIndex, IndexError, IndexResult};

pub use segment::{
    BTreeSegmentStore, HistorySegmentStore, ListSegmentStore, Segment, SegmentStore,
};

pub use source::{
    AttributeRegistry, EventSource, QuarkResolver, SourceError, SourceResult, StateEvent,
    StateTracker, TextEventSource,
};

pub use config::{
    CheckpointConfig, Config, ConfigError, HistoryConfig, LoggingConfig, PipelineConfig,
};
