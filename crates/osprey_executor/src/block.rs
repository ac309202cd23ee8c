//! The pull-based iteration contract every execution block implements.

use osprey_common::error::OspreyResult;

use crate::batch::TupleBatch;

/// Default number of rows requested per pull when a block refills its own
/// buffers.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// A node in the execution tree.
///
/// Downstream blocks pull batches from upstream blocks:
/// `get_some(at_least, at_most)` yields between 0 and `at_most` rows, and
/// may yield fewer than `at_least` only when the stream is ending;
/// `None` means permanent end for the current cursor cycle.
/// `initialize_cursor` may be called repeatedly to rewind. A block owns
/// every batch it buffers until the batch is handed to the caller.
pub trait ExecutionBlock {
    fn initialize(&mut self) -> OspreyResult<()>;

    /// Rewind to the start, optionally seeding with an input row
    /// (`seed` batch, row `pos`).
    fn initialize_cursor(&mut self, seed: Option<&TupleBatch>, pos: usize) -> OspreyResult<()>;

    /// Abort/finish the cursor. Walks upstream dependencies first.
    fn shutdown(&mut self, error_code: i32) -> OspreyResult<()>;

    /// Pull between `at_least` and `at_most` rows; `None` = end of stream.
    fn get_some(&mut self, at_least: usize, at_most: usize)
        -> OspreyResult<Option<TupleBatch>>;

    /// Like `get_some` without materializing output; returns the number of
    /// rows skipped.
    fn skip_some(&mut self, at_least: usize, at_most: usize) -> OspreyResult<usize>;

    fn has_more(&mut self) -> OspreyResult<bool>;

    /// Total row count if known, `-1` otherwise.
    fn count(&self) -> OspreyResult<i64>;

    /// Rows not yet emitted if known, `-1` otherwise.
    fn remaining(&mut self) -> OspreyResult<i64>;
}
