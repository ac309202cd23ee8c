//! 1→N broadcast operator: every upstream row is delivered to every shard
//! client, in upstream order, exactly once per client.

use std::collections::VecDeque;

use osprey_common::error::{OspreyError, OspreyResult};
use osprey_common::types::ShardId;
use osprey_executor::batch::TupleBatch;
use osprey_executor::block::{ExecutionBlock, DEFAULT_BATCH_SIZE};

use super::multi_client::{ClientRegistry, MultiClientBlock};

/// Broadcasts one upstream stream to N shard clients.
///
/// All clients share one buffered batch deque; each client only carries an
/// index cursor `(batch, row)` into it. A buffered batch is freed exactly
/// when the slowest client has moved past it.
pub struct ScatterBlock {
    dependency: Box<dyn ExecutionBlock>,
    registry: ClientRegistry,
    /// Shared FIFO of upstream batches.
    buffer: VecDeque<TupleBatch>,
    /// Per-client cursor: (index into `buffer`, row inside that batch).
    pos_for_client: Vec<(usize, usize)>,
}

impl ScatterBlock {
    pub fn new(dependency: Box<dyn ExecutionBlock>, shard_ids: &[ShardId]) -> Self {
        let registry = ClientRegistry::new(shard_ids);
        let nr_clients = registry.nr_clients();
        ScatterBlock {
            dependency,
            registry,
            buffer: VecDeque::new(),
            pos_for_client: vec![(0, 0); nr_clients],
        }
    }

    /// Pull one batch from the dependency into the shared buffer.
    fn pull_block(&mut self, at_least: usize, at_most: usize) -> OspreyResult<bool> {
        if let Some(batch) = self.dependency.get_some(at_least, at_most)? {
            self.buffer.push_back(batch);
            osprey_observability::record_scatter_buffer_depth(self.buffer.len());
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

impl ExecutionBlock for ScatterBlock {
    fn initialize(&mut self) -> OspreyResult<()> {
        self.dependency.initialize()
    }

    fn initialize_cursor(&mut self, seed: Option<&TupleBatch>, pos: usize) -> OspreyResult<()> {
        self.dependency.initialize_cursor(seed, pos)?;
        self.buffer.clear();
        self.registry.reset();
        self.pos_for_client = vec![(0, 0); self.registry.nr_clients()];
        Ok(())
    }

    fn shutdown(&mut self, error_code: i32) -> OspreyResult<()> {
        let result = self.dependency.shutdown(error_code);
        self.buffer.clear();
        self.registry.clear();
        self.pos_for_client.clear();
        result
    }

    fn get_some(
        &mut self,
        _at_least: usize,
        _at_most: usize,
    ) -> OspreyResult<Option<TupleBatch>> {
        Err(OspreyError::internal(
            "scatter block is pulled through the per-shard interface",
        ))
    }

    fn skip_some(&mut self, _at_least: usize, _at_most: usize) -> OspreyResult<usize> {
        Err(OspreyError::internal(
            "scatter block is pulled through the per-shard interface",
        ))
    }

    fn has_more(&mut self) -> OspreyResult<bool> {
        Err(OspreyError::internal(
            "scatter block is pulled through the per-shard interface",
        ))
    }

    fn count(&self) -> OspreyResult<i64> {
        self.dependency.count()
    }

    fn remaining(&mut self) -> OspreyResult<i64> {
        Err(OspreyError::internal(
            "scatter block is pulled through the per-shard interface",
        ))
    }
}

impl MultiClientBlock for ScatterBlock {
    fn client_registry(&self) -> &ClientRegistry {
        &self.registry
    }

    fn client_registry_mut(&mut self) -> &mut ClientRegistry {
        &mut self.registry
    }

    fn get_or_skip_some_for_shard(
        &mut self,
        at_least: usize,
        at_most: usize,
        skipping: bool,
        shard_id: &str,
    ) -> OspreyResult<(Option<TupleBatch>, usize)> {
        debug_assert!(0 < at_least && at_least <= at_most);

        let client = self.registry.client_id(shard_id)?;
        if self.registry.is_done(client) {
            return Ok((None, 0));
        }

        // pull another block from the dependency if this client ran past
        // the buffered ones
        if self.pos_for_client[client].0 >= self.buffer.len() {
            if !self.pull_block(at_least, at_most)? {
                self.registry.set_done(client);
                return Ok((None, 0));
            }
        }

        let pos = self.pos_for_client[client];
        let available = self.buffer[pos.0].size() - pos.1;
        let taken = available.min(at_most);

        let result = if skipping {
            None
        } else {
            Some(self.buffer[pos.0].slice(pos.1, pos.1 + taken))
        };

        self.pos_for_client[client].1 += taken;

        // finished the current batch: advance to the next one and check
        // whether the head can be reclaimed
        if self.pos_for_client[client].1 == self.buffer[self.pos_for_client[client].0].size() {
            self.pos_for_client[client].0 += 1;
            self.pos_for_client[client].1 = 0;

            // the head batch may go exactly when every client is past it
            if self.pos_for_client.iter().all(|p| p.0 > 0) {
                self.buffer.pop_front();
                for pos in &mut self.pos_for_client {
                    pos.0 -= 1;
                }
            }
        }

        Ok((result, taken))
    }

    fn has_more_for_shard(&mut self, shard_id: &str) -> OspreyResult<bool> {
        let client = self.registry.client_id(shard_id)?;
        if self.registry.is_done(client) {
            return Ok(false);
        }

        let pos = self.pos_for_client[client];
        // NB: '>' here, so a client sitting exactly at the end of the
        // buffer answers true without pulling; the delivery path re-checks
        // with '>=' and pulls before slicing.
        if pos.0 > self.buffer.len() {
            if !self.pull_block(DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE)? {
                self.registry.set_done(client);
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn remaining_for_shard(&mut self, shard_id: &str) -> OspreyResult<i64> {
        let client = self.registry.client_id(shard_id)?;
        if self.registry.is_done(client) {
            return Ok(0);
        }

        let mut sum = self.dependency.remaining()?;
        if sum == -1 {
            return Ok(-1);
        }

        let pos = self.pos_for_client[client];
        if let Some(front) = self.buffer.get(pos.0) {
            sum += (front.size() - pos.1) as i64;
            for batch in self.buffer.iter().skip(pos.0 + 1) {
                sum += batch.size() as i64;
            }
        }
        Ok(sum)
    }
}
