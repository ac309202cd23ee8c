//! Shared fixtures for the cluster execution integration tests.

use std::collections::VecDeque;

use serde_json::Value;

use osprey_common::error::OspreyResult;
use osprey_executor::batch::{TupleBatch, TupleValue};
use osprey_executor::block::ExecutionBlock;

/// An upstream block yielding a fixed batch sequence; rewinds on
/// `initialize_cursor`.
pub struct FixtureBlock {
    template: Vec<TupleBatch>,
    queue: VecDeque<TupleBatch>,
}

impl FixtureBlock {
    pub fn new(batches: Vec<TupleBatch>) -> Self {
        FixtureBlock {
            queue: batches.iter().cloned().collect(),
            template: batches,
        }
    }
}

impl ExecutionBlock for FixtureBlock {
    fn initialize(&mut self) -> OspreyResult<()> {
        Ok(())
    }

    fn initialize_cursor(&mut self, _seed: Option<&TupleBatch>, _pos: usize) -> OspreyResult<()> {
        self.queue = self.template.iter().cloned().collect();
        Ok(())
    }

    fn shutdown(&mut self, _error_code: i32) -> OspreyResult<()> {
        self.queue.clear();
        Ok(())
    }

    fn get_some(&mut self, _at_least: usize, at_most: usize) -> OspreyResult<Option<TupleBatch>> {
        match self.queue.pop_front() {
            Some(batch) if batch.size() <= at_most => Ok(Some(batch)),
            Some(batch) => {
                self.queue.push_front(batch.slice(at_most, batch.size()));
                Ok(Some(batch.slice(0, at_most)))
            }
            None => Ok(None),
        }
    }

    fn skip_some(&mut self, at_least: usize, at_most: usize) -> OspreyResult<usize> {
        Ok(self.get_some(at_least, at_most)?.map_or(0, |b| b.size()))
    }

    fn has_more(&mut self) -> OspreyResult<bool> {
        Ok(!self.queue.is_empty())
    }

    fn count(&self) -> OspreyResult<i64> {
        Ok(self.template.iter().map(TupleBatch::size).sum::<usize>() as i64)
    }

    fn remaining(&mut self) -> OspreyResult<i64> {
        Ok(self.queue.iter().map(TupleBatch::size).sum::<usize>() as i64)
    }
}

/// Single-register batch from a list of documents.
pub fn batch_of(values: &[Value]) -> TupleBatch {
    let mut batch = TupleBatch::new(values.len(), 1);
    for (i, value) in values.iter().enumerate() {
        batch.set_value(i, 0, TupleValue::new(value.clone()));
    }
    batch
}

/// Flatten the register-0 documents of a batch.
pub fn column_of(batch: &TupleBatch) -> Vec<Value> {
    (0..batch.size())
        .map(|row| batch.value(row, 0).document().cloned().unwrap_or(Value::Null))
        .collect()
}
