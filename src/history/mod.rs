//! Disk-backed state history: interval tree storage, queries and the
//! construction pipeline

pub mod error;
pub mod interval;
pub mod io;
pub mod node;
pub mod pipeline;
pub mod tree;
pub mod value;

pub use error::{HistoryError, HistoryResult};
pub use interval::Interval;
pub use pipeline::HistoryPipeline;
pub use tree::{HistoryTree, RangeIter, TreeParams};
pub use value::StateValue;
