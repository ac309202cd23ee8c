//! N→1 operator: plain concatenation of its dependencies, or a stable
//! k-way merge preserving a sort key over streams already sorted under it.

use std::collections::VecDeque;

use osprey_common::error::OspreyResult;
use osprey_executor::batch::TupleBatch;
use osprey_executor::block::{ExecutionBlock, DEFAULT_BATCH_SIZE};
use osprey_executor::sort::SortKey;

/// Merges N upstream dependencies into one stream.
///
/// With an empty sort key it runs in plain mode: dependencies are drained
/// one after the other, in list order, with no buffering of its own. With
/// a sort key it keeps one batch FIFO and one cursor per dependency and
/// repeatedly copies the lex-smallest fronting row into the output.
pub struct GatherBlock {
    dependencies: Vec<Box<dyn ExecutionBlock>>,
    sort_key: SortKey,
    /// One batch FIFO per dependency (sorted mode only).
    buffers: Vec<VecDeque<TupleBatch>>,
    /// Cursor per dependency: (dependency index, row in front batch).
    pos: Vec<(usize, usize)>,
    /// Current dependency in plain mode.
    at_dep: usize,
    done: bool,
}

impl GatherBlock {
    pub fn new(dependencies: Vec<Box<dyn ExecutionBlock>>, sort_key: SortKey) -> Self {
        let n = dependencies.len();
        GatherBlock {
            dependencies,
            sort_key,
            buffers: (0..n).map(|_| VecDeque::new()).collect(),
            pos: (0..n).map(|i| (i, 0)).collect(),
            at_dep: 0,
            done: false,
        }
    }

    fn is_sorted(&self) -> bool {
        !self.sort_key.is_empty()
    }

    /// Pull one batch from dependency `i` into its FIFO (sorted mode).
    fn pull_into_buffer(
        &mut self,
        i: usize,
        at_least: usize,
        at_most: usize,
    ) -> OspreyResult<bool> {
        if let Some(batch) = self.dependencies[i].get_some(at_least, at_most)? {
            self.buffers[i].push_back(batch);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// `a < b` for two cursors. A dependency whose buffer is empty acts as
    /// +∞ so it never wins the min-selection.
    fn cursor_less_than(&self, a: (usize, usize), b: (usize, usize)) -> bool {
        if self.buffers[a.0].is_empty() {
            return false;
        }
        if self.buffers[b.0].is_empty() {
            return true;
        }
        self.sort_key
            .compare_rows(&self.buffers[a.0][0], a.1, &self.buffers[b.0][0], b.1)
            == std::cmp::Ordering::Less
    }

    /// Linear scan for the smallest cursor. Strict-less replacement keeps
    /// the earliest dependency on ties, which makes the merge stable.
    fn min_cursor(&self) -> (usize, usize) {
        let mut best = self.pos[0];
        for &candidate in self.pos.iter().skip(1) {
            if self.cursor_less_than(candidate, best) {
                best = candidate;
            }
        }
        best
    }

    /// Move the cursor of dependency `dep` one row forward, freeing its
    /// front batch when fully consumed. An emptied buffer is refilled
    /// right away: without the pull, the dependency would act as +∞ for
    /// the rest of the merge loop and its later rows could be overtaken.
    fn advance(&mut self, dep: usize, at_least: usize, at_most: usize) -> OspreyResult<()> {
        self.pos[dep].1 += 1;
        if self.pos[dep].1 == self.buffers[dep][0].size() {
            self.buffers[dep].pop_front();
            self.pos[dep] = (dep, 0);
            if self.buffers[dep].is_empty() {
                self.pull_into_buffer(dep, at_least, at_most)?;
            }
        }
        Ok(())
    }

    /// Refill empty buffers and count buffered rows not yet emitted.
    fn refill_and_count(&mut self, at_least: usize, at_most: usize) -> OspreyResult<usize> {
        let mut available = 0;
        for i in 0..self.dependencies.len() {
            if self.buffers[i].is_empty() && self.pull_into_buffer(i, at_least, at_most)? {
                self.pos[i] = (i, 0);
            }
            if let Some(front) = self.buffers[i].front() {
                available += front.size() - self.pos[i].1;
                available += self.buffers[i].iter().skip(1).map(TupleBatch::size).sum::<usize>();
            }
        }
        Ok(available)
    }

    fn clear_buffers(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
        for (i, pos) in self.pos.iter_mut().enumerate() {
            *pos = (i, 0);
        }
    }
}

impl ExecutionBlock for GatherBlock {
    fn initialize(&mut self) -> OspreyResult<()> {
        self.at_dep = 0;
        for dependency in &mut self.dependencies {
            dependency.initialize()?;
        }
        Ok(())
    }

    fn initialize_cursor(&mut self, seed: Option<&TupleBatch>, pos: usize) -> OspreyResult<()> {
        for dependency in &mut self.dependencies {
            dependency.initialize_cursor(seed, pos)?;
        }
        self.at_dep = 0;
        if self.is_sorted() {
            self.clear_buffers();
        }
        self.done = false;
        Ok(())
    }

    fn shutdown(&mut self, error_code: i32) -> OspreyResult<()> {
        // best effort: every dependency is shut down even when one fails,
        // the first non-success is reported
        let mut result = Ok(());
        for dependency in &mut self.dependencies {
            if let Err(e) = dependency.shutdown(error_code) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        if self.is_sorted() {
            self.clear_buffers();
        }
        result
    }

    fn get_some(
        &mut self,
        at_least: usize,
        at_most: usize,
    ) -> OspreyResult<Option<TupleBatch>> {
        if self.done {
            return Ok(None);
        }

        // the simple case: drain dependencies in list order
        if !self.is_sorted() {
            let mut result = self.dependencies[self.at_dep].get_some(at_least, at_most)?;
            while result.is_none() && self.at_dep < self.dependencies.len() - 1 {
                self.at_dep += 1;
                result = self.dependencies[self.at_dep].get_some(at_least, at_most)?;
            }
            match result {
                Some(batch) => {
                    osprey_observability::record_gather_rows(false, batch.size());
                    return Ok(Some(batch));
                }
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }

        let available = self.refill_and_count(at_least, at_most)?;
        if available == 0 {
            self.done = true;
            return Ok(None);
        }

        let to_send = available.min(at_most);
        let nr_regs = self
            .buffers
            .iter()
            .find_map(|buffer| buffer.front().map(TupleBatch::nr_regs))
            .unwrap_or(0);

        let mut result = TupleBatch::new(to_send, nr_regs);
        for row in 0..to_send {
            // next smallest row across all cursors
            let val = self.min_cursor();
            for reg in 0..nr_regs {
                let cell = self.buffers[val.0][0].value(val.1, reg);
                if !cell.is_empty() {
                    result.set_value(row, reg, cell.clone());
                }
            }
            self.advance(val.0, at_least, at_most)?;
        }

        osprey_observability::record_gather_rows(true, to_send);
        Ok(Some(result))
    }

    fn skip_some(&mut self, at_least: usize, at_most: usize) -> OspreyResult<usize> {
        if self.done {
            return Ok(0);
        }

        if !self.is_sorted() {
            let mut skipped = self.dependencies[self.at_dep].skip_some(at_least, at_most)?;
            while skipped == 0 && self.at_dep < self.dependencies.len() - 1 {
                self.at_dep += 1;
                skipped = self.dependencies[self.at_dep].skip_some(at_least, at_most)?;
            }
            if skipped == 0 {
                self.done = true;
            }
            return Ok(skipped);
        }

        let available = self.refill_and_count(at_least, at_most)?;
        if available == 0 {
            self.done = true;
            return Ok(0);
        }

        let skipped = available.min(at_most);
        for _ in 0..skipped {
            let val = self.min_cursor();
            self.advance(val.0, at_least, at_most)?;
        }
        Ok(skipped)
    }

    fn has_more(&mut self) -> OspreyResult<bool> {
        if self.done {
            return Ok(false);
        }

        if !self.is_sorted() {
            for dependency in &mut self.dependencies {
                if dependency.has_more()? {
                    return Ok(true);
                }
            }
        } else {
            for i in 0..self.dependencies.len() {
                if !self.buffers[i].is_empty() {
                    return Ok(true);
                }
                if self.pull_into_buffer(i, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE)? {
                    self.pos[i] = (i, 0);
                    return Ok(true);
                }
            }
        }
        self.done = true;
        Ok(false)
    }

    fn count(&self) -> OspreyResult<i64> {
        let mut sum = 0;
        for dependency in &self.dependencies {
            match dependency.count()? {
                -1 => return Ok(-1),
                n => sum += n,
            }
        }
        Ok(sum)
    }

    fn remaining(&mut self) -> OspreyResult<i64> {
        let mut sum = 0;
        for dependency in &mut self.dependencies {
            match dependency.remaining()? {
                -1 => return Ok(-1),
                n => sum += n,
            }
        }
        Ok(sum)
    }
}
