//! Execution-block layer: the tuple-batch data model, the pull-based
//! iteration contract every operator implements, sort keys, and per-query
//! statistics/warning plumbing.

pub mod batch;
pub mod block;
pub mod context;
pub mod sort;
pub mod stats;

pub use batch::{TupleBatch, TupleValue};
pub use block::{ExecutionBlock, DEFAULT_BATCH_SIZE};
pub use context::{QueryContext, Warning};
pub use sort::{SortElement, SortKey};
pub use stats::ExecutionStats;
