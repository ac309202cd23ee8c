//! Shared substrate of the operators that serve N named shard clients
//! over one upstream stream.

use std::collections::HashMap;

use osprey_common::error::{OspreyError, OspreyResult};
use osprey_common::types::ShardId;
use osprey_executor::batch::TupleBatch;
use osprey_executor::block::ExecutionBlock;

/// Client bookkeeping: the stable shard-id → client-id mapping and the
/// per-client end-of-stream flags.
#[derive(Debug)]
pub struct ClientRegistry {
    shard_to_client: HashMap<String, usize>,
    nr_clients: usize,
    done_for_client: Vec<bool>,
}

impl ClientRegistry {
    /// Derive client ids from a stable ordered shard-id list.
    pub fn new(shard_ids: &[ShardId]) -> Self {
        let shard_to_client = shard_ids
            .iter()
            .enumerate()
            .map(|(i, shard)| (shard.0.clone(), i))
            .collect();
        ClientRegistry {
            shard_to_client,
            nr_clients: shard_ids.len(),
            done_for_client: vec![false; shard_ids.len()],
        }
    }

    pub fn nr_clients(&self) -> usize {
        self.nr_clients
    }

    /// Bounds-checked lookup; empty or unknown shard ids violate a
    /// planning invariant.
    pub fn client_id(&self, shard_id: &str) -> OspreyResult<usize> {
        if shard_id.is_empty() {
            return Err(OspreyError::internal("got empty shard id"));
        }
        self.shard_to_client
            .get(shard_id)
            .copied()
            .ok_or_else(|| OspreyError::internal(format!("unknown shard id {}", shard_id)))
    }

    pub fn is_done(&self, client: usize) -> bool {
        self.done_for_client[client]
    }

    pub fn set_done(&mut self, client: usize) {
        self.done_for_client[client] = true;
    }

    /// Reset the per-client end-of-stream flags (cursor rewind).
    pub fn reset(&mut self) {
        self.done_for_client = vec![false; self.nr_clients];
    }

    /// Drop the per-client flags (shutdown).
    pub fn clear(&mut self) {
        self.done_for_client.clear();
    }
}

/// The per-shard read surface served by Scatter and Distribute.
///
/// The plain `get_some`/`skip_some` of `ExecutionBlock` are rejected on
/// these operators; consumers address one of the N clients by shard id.
pub trait MultiClientBlock: ExecutionBlock {
    fn client_registry(&self) -> &ClientRegistry;

    fn client_registry_mut(&mut self) -> &mut ClientRegistry;

    /// Shared dispatch routine implemented by each operator: produce (or
    /// skip) up to `at_most` rows for the given shard. Returns the batch
    /// (never on skips) and the number of rows taken.
    fn get_or_skip_some_for_shard(
        &mut self,
        at_least: usize,
        at_most: usize,
        skipping: bool,
        shard_id: &str,
    ) -> OspreyResult<(Option<TupleBatch>, usize)>;

    fn has_more_for_shard(&mut self, shard_id: &str) -> OspreyResult<bool>;

    fn remaining_for_shard(&mut self, shard_id: &str) -> OspreyResult<i64>;

    fn get_some_for_shard(
        &mut self,
        at_least: usize,
        at_most: usize,
        shard_id: &str,
    ) -> OspreyResult<Option<TupleBatch>> {
        let (result, _skipped) =
            self.get_or_skip_some_for_shard(at_least, at_most, false, shard_id)?;
        Ok(result)
    }

    fn skip_some_for_shard(
        &mut self,
        at_least: usize,
        at_most: usize,
        shard_id: &str,
    ) -> OspreyResult<usize> {
        let (result, skipped) =
            self.get_or_skip_some_for_shard(at_least, at_most, true, shard_id)?;
        debug_assert!(result.is_none());
        Ok(skipped)
    }

    /// Skip `number` rows for the shard, pulling as often as needed.
    /// Returns `true` when the shard's stream is exhausted.
    fn skip_for_shard(&mut self, number: usize, shard_id: &str) -> OspreyResult<bool> {
        let mut skipped = self.skip_some_for_shard(number, number, shard_id)?;
        let mut nr = skipped;
        while nr != 0 && skipped < number {
            nr = self.skip_some_for_shard(number - skipped, number - skipped, shard_id)?;
            skipped += nr;
        }
        if nr == 0 {
            return Ok(true);
        }
        Ok(!self.has_more_for_shard(shard_id)?)
    }
}
