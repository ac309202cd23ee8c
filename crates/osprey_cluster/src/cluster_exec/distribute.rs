//! 1→N routing operator: every upstream row goes to exactly one shard
//! client, chosen by the row's document content; primary keys are
//! synthesized where the plan requires it.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::{json, Value};

use osprey_common::error::{OspreyError, OspreyResult};
use osprey_common::json as json_util;
use osprey_common::types::{RegisterId, ShardId, KEY_FIELD};
use osprey_executor::batch::{TupleBatch, TupleValue};
use osprey_executor::block::{ExecutionBlock, DEFAULT_BATCH_SIZE};

use crate::directory::ClusterDirectory;

use super::multi_client::{ClientRegistry, MultiClientBlock};

/// Routes each upstream row to the shard responsible for its document.
///
/// Upstream batches are retained in a shared deque until shutdown; clients
/// hold `(batch, row)` tickets into it. Key synthesis mutates the upstream
/// batch in place before any ticket referencing the row is handed out, so
/// every client observing the row sees the synthesized key.
pub struct DistributeBlock {
    dependency: Box<dyn ExecutionBlock>,
    registry: ClientRegistry,
    directory: Arc<ClusterDirectory>,
    /// Plan id of the target collection.
    collection: String,
    /// Register holding the document to inspect.
    register: RegisterId,
    /// Fallback register consulted when the primary value is null (upsert
    /// carries a search document and an insert document).
    alternative_register: Option<RegisterId>,
    /// Whether this block must guarantee a key on every routed document.
    create_keys: bool,
    /// Whether a plain string value may be rewritten to `{_key: <string>}`.
    allow_key_conversion_to_object: bool,
    /// Whether the target collection is sharded by the key attribute.
    uses_default_sharding: bool,
    /// Shared FIFO of upstream batches, kept alive until shutdown so
    /// tickets stay valid.
    buffer: VecDeque<TupleBatch>,
    /// Per-client ticket queues: (index into `buffer`, row).
    dist_buffer: Vec<VecDeque<(usize, usize)>>,
    /// Walk position across `buffer` while routing new rows.
    index: usize,
    /// Walk position inside `buffer[index]`.
    pos: usize,
}

impl DistributeBlock {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dependency: Box<dyn ExecutionBlock>,
        shard_ids: &[ShardId],
        directory: Arc<ClusterDirectory>,
        collection: impl Into<String>,
        register: RegisterId,
        alternative_register: Option<RegisterId>,
        create_keys: bool,
        allow_key_conversion_to_object: bool,
    ) -> OspreyResult<Self> {
        let collection = collection.into();
        let uses_default_sharding = directory.uses_default_sharding(&collection)?;
        let registry = ClientRegistry::new(shard_ids);
        let nr_clients = registry.nr_clients();
        Ok(DistributeBlock {
            dependency,
            registry,
            directory,
            collection,
            register,
            alternative_register,
            create_keys,
            allow_key_conversion_to_object,
            uses_default_sharding,
            buffer: VecDeque::new(),
            dist_buffer: vec![VecDeque::new(); nr_clients],
            index: 0,
            pos: 0,
        })
    }

    /// A fresh document key: the decimal form of a cluster-unique id.
    fn create_key(&self) -> String {
        self.directory.unique_id().to_string()
    }

    /// Overwrite the inspected cell of the current row in place.
    fn rewrite_current_cell(&mut self, register: RegisterId, document: Value) {
        let batch = &mut self.buffer[self.index];
        batch.destroy_value(self.pos, register);
        batch.set_value(self.pos, register, TupleValue::new(document));
    }

    /// Decide the destination client of the current row, synthesizing a
    /// key when required. May rewrite the row's inspected cell in place.
    fn send_to_client(&mut self) -> OspreyResult<usize> {
        let mut register = self.register;
        let mut document = match self.buffer[self.index].value(self.pos, register).document() {
            Some(value) => value.clone(),
            None => return Err(OspreyError::InvalidDocumentType),
        };

        if document.is_null() {
            if let Some(alternative) = self.alternative_register {
                // the primary value is set but null: fall back to the
                // second input register
                register = alternative;
                document = match self.buffer[self.index].value(self.pos, register).document() {
                    Some(value) => value.clone(),
                    None => return Err(OspreyError::InvalidDocumentType),
                };
            }
        }

        let mut has_created_key_attribute = false;
        if document.is_string() && self.allow_key_conversion_to_object {
            let wrapped = json!({ KEY_FIELD: document });
            self.rewrite_current_cell(register, wrapped.clone());
            document = wrapped;
            has_created_key_attribute = true;
        } else if !document.is_object() {
            return Err(OspreyError::InvalidDocumentType);
        }

        if self.create_keys {
            if self.uses_default_sharding {
                // the collection is sharded by _key
                if !has_created_key_attribute && document.get(KEY_FIELD).is_none() {
                    let keyed =
                        json_util::merge(&document, &json!({ KEY_FIELD: self.create_key() }));
                    self.rewrite_current_cell(register, keyed.clone());
                    document = keyed;
                }
            } else {
                // the collection is not sharded by _key: the user must not
                // supply one
                if has_created_key_attribute || document.get(KEY_FIELD).is_some() {
                    return Err(OspreyError::MustNotSpecifyKey);
                }
                let keyed = json_util::merge(&document, &json!({ KEY_FIELD: self.create_key() }));
                self.rewrite_current_cell(register, keyed.clone());
                document = keyed;
            }
        }

        let (shard, _uses_default_sharding) =
            self.directory
                .responsible_shard(&self.collection, &document, true)?;
        self.registry.client_id(shard.as_str())
    }

    /// Accrete tickets for `client` until it holds at least `at_least`,
    /// walking the upstream batches row by row. Rows destined for other
    /// clients are enqueued on their ticket queues as a side effect.
    /// Returns false when the upstream is exhausted and nothing is queued
    /// for `client`.
    fn fill_for_client(
        &mut self,
        at_least: usize,
        at_most: usize,
        client: usize,
    ) -> OspreyResult<bool> {
        if self.buffer.is_empty() {
            self.index = 0;
            self.pos = 0;
        }

        while self.dist_buffer[client].len() < at_least {
            if self.index == self.buffer.len() {
                match self.dependency.get_some(at_least, at_most)? {
                    Some(batch) => self.buffer.push_back(batch),
                    None => {
                        if self.dist_buffer[client].is_empty() {
                            return Ok(false);
                        }
                        break;
                    }
                }
            }

            while self.pos < self.buffer[self.index].size()
                && self.dist_buffer[client].len() < at_most
            {
                // may rewrite the inspected cell of the row in place
                let target = self.send_to_client()?;
                self.dist_buffer[target].push_back((self.index, self.pos));
                self.pos += 1;
            }

            if self.pos == self.buffer[self.index].size() {
                self.pos = 0;
                self.index += 1;
            } else {
                break;
            }
        }

        Ok(true)
    }
}

impl ExecutionBlock for DistributeBlock {
    fn initialize(&mut self) -> OspreyResult<()> {
        self.dependency.initialize()
    }

    fn initialize_cursor(&mut self, seed: Option<&TupleBatch>, pos: usize) -> OspreyResult<()> {
        self.dependency.initialize_cursor(seed, pos)?;
        self.registry.reset();
        self.buffer.clear();
        self.dist_buffer = vec![VecDeque::new(); self.registry.nr_clients()];
        self.index = 0;
        self.pos = 0;
        Ok(())
    }

    fn shutdown(&mut self, error_code: i32) -> OspreyResult<()> {
        let result = self.dependency.shutdown(error_code);
        // the shared upstream buffer is released only here; tickets may
        // reference it up to this point
        self.buffer.clear();
        self.dist_buffer.clear();
        self.registry.clear();
        result
    }

    fn get_some(
        &mut self,
        _at_least: usize,
        _at_most: usize,
    ) -> OspreyResult<Option<TupleBatch>> {
        Err(OspreyError::internal(
            "distribute block is pulled through the per-shard interface",
        ))
    }

    fn skip_some(&mut self, _at_least: usize, _at_most: usize) -> OspreyResult<usize> {
        Err(OspreyError::internal(
            "distribute block is pulled through the per-shard interface",
        ))
    }

    fn has_more(&mut self) -> OspreyResult<bool> {
        Err(OspreyError::internal(
            "distribute block is pulled through the per-shard interface",
        ))
    }

    fn count(&self) -> OspreyResult<i64> {
        self.dependency.count()
    }

    fn remaining(&mut self) -> OspreyResult<i64> {
        Err(OspreyError::internal(
            "distribute block is pulled through the per-shard interface",
        ))
    }
}

impl MultiClientBlock for DistributeBlock {
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

        if self.dist_buffer[client].is_empty()
            && !self.fill_for_client(at_least, at_most, client)?
        {
            self.registry.set_done(client);
            return Ok((None, 0));
        }

        let taken = self.dist_buffer[client].len().min(at_most);

        if skipping {
            for _ in 0..taken {
                self.dist_buffer[client].pop_front();
            }
            return Ok((None, taken));
        }

        // group consecutive tickets sharing a batch index and cut one
        // sub-batch per group
        let mut collector: Vec<TupleBatch> = Vec::new();
        let mut i = 0;
        while i < taken {
            let group_index = self.dist_buffer[client][0].0;
            let mut chosen: Vec<usize> = Vec::new();
            while i < taken {
                match self.dist_buffer[client].front() {
                    Some(&(batch_index, row)) if batch_index == group_index => {
                        chosen.push(row);
                        self.dist_buffer[client].pop_front();
                        i += 1;
                    }
                    _ => break,
                }
            }
            collector.push(self.buffer[group_index].project(&chosen));
        }

        let result = if collector.len() == 1 {
            collector.pop()
        } else {
            Some(TupleBatch::concatenate(collector)?)
        };

        osprey_observability::record_distribute_rows(shard_id, taken);
        Ok((result, taken))
    }

    fn has_more_for_shard(&mut self, shard_id: &str) -> OspreyResult<bool> {
        let client = self.registry.client_id(shard_id)?;
        if self.registry.is_done(client) {
            return Ok(false);
        }

        if !self.dist_buffer[client].is_empty() {
            return Ok(true);
        }

        if !self.fill_for_client(DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE, client)? {
            self.registry.set_done(client);
            return Ok(false);
        }
        Ok(true)
    }

    fn remaining_for_shard(&mut self, shard_id: &str) -> OspreyResult<i64> {
        let client = self.registry.client_id(shard_id)?;
        if self.registry.is_done(client) {
            return Ok(0);
        }

        let sum = self.dependency.remaining()?;
        if sum == -1 {
            return Ok(-1);
        }
        // rows already ticketed for this client plus whatever is still
        // upstream (unrouted rows may yet land anywhere)
        Ok(sum + self.dist_buffer[client].len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_exec::test_support::{batch_of, FixtureBlock};
    use crate::directory::CollectionInfo;

    fn shards(ids: &[&str]) -> Vec<ShardId> {
        ids.iter().map(|s| ShardId::from(*s)).collect()
    }

    fn directory_for(plan_id: &str, shard_keys: &[&str], shard_ids: &[&str]) -> Arc<ClusterDirectory> {
        let directory = ClusterDirectory::new().with_unique_id_base(42);
        directory.register_collection(CollectionInfo {
            plan_id: plan_id.into(),
            shard_ids: shards(shard_ids),
            shard_keys: shard_keys.iter().map(|s| s.to_string()).collect(),
        });
        Arc::new(directory)
    }

    fn distribute_over(
        rows: Vec<Value>,
        directory: Arc<ClusterDirectory>,
        shard_ids: &[&str],
        create_keys: bool,
        allow_key_conversion: bool,
    ) -> DistributeBlock {
        let upstream = FixtureBlock::new(vec![batch_of(&rows)]);
        let mut block = DistributeBlock::new(
            Box::new(upstream),
            &shards(shard_ids),
            directory,
            "users",
            0,
            None,
            create_keys,
            allow_key_conversion,
        )
        .expect("construct");
        block.initialize_cursor(None, 0).expect("cursor");
        block
    }

    /// Drain every shard and return (shard, document) pairs in delivery
    /// order per shard.
    fn drain(block: &mut DistributeBlock, shard_ids: &[&str]) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        for shard in shard_ids {
            while let Some(batch) = block.get_some_for_shard(1, 10, shard).expect("pull") {
                for row in 0..batch.size() {
                    out.push((
                        shard.to_string(),
                        batch.value(row, 0).document().cloned().unwrap(),
                    ));
                }
            }
        }
        out
    }

    #[test]
    fn test_rows_are_partitioned_exactly_once() {
        let directory = directory_for("users", &[KEY_FIELD], &["s0", "s1"]);
        let rows: Vec<Value> = (0..8).map(|i| json!({"_key": format!("k{}", i)})).collect();
        let mut block = distribute_over(rows.clone(), directory.clone(), &["s0", "s1"], false, false);

        let delivered = drain(&mut block, &["s0", "s1"]);
        assert_eq!(delivered.len(), rows.len());

        // every row lands exactly once, on the shard the directory names
        for (shard, doc) in &delivered {
            let (expected, _) = directory
                .responsible_shard("users", doc, true)
                .expect("route");
            assert_eq!(shard, expected.as_str());
        }
        // locality: per shard the upstream order is preserved
        let mut seen: Vec<&Value> = Vec::new();
        for row in &rows {
            if delivered.iter().any(|(_, d)| d == row) {
                seen.push(row);
            }
        }
        assert_eq!(seen.len(), rows.len());
    }

    #[test]
    fn test_key_synthesis_on_default_sharded_collection() {
        let directory = directory_for("users", &[KEY_FIELD], &["s0", "s1"]);
        let mut block = distribute_over(
            vec![json!({"a": 1}), json!({"_key": "x", "a": 2})],
            directory,
            &["s0", "s1"],
            true,
            false,
        );

        let delivered = drain(&mut block, &["s0", "s1"]);
        assert_eq!(delivered.len(), 2);

        let keyless = delivered
            .iter()
            .find(|(_, d)| d.get("a") == Some(&json!(1)))
            .expect("row 1");
        // first id handed out by the seeded allocator
        assert_eq!(keyless.1.get(KEY_FIELD), Some(&json!("42")));

        let keyed = delivered
            .iter()
            .find(|(_, d)| d.get("a") == Some(&json!(2)))
            .expect("row 2");
        assert_eq!(keyed.1.get(KEY_FIELD), Some(&json!("x")));
    }

    #[test]
    fn test_user_key_rejected_on_non_default_sharding() {
        let directory = directory_for("users", &["region"], &["s0", "s1"]);
        let mut block = distribute_over(
            vec![json!({"_key": "x", "region": "eu"})],
            directory,
            &["s0", "s1"],
            true,
            false,
        );
        let err = block.get_some_for_shard(1, 10, "s0").unwrap_err();
        assert_eq!(err, OspreyError::MustNotSpecifyKey);
    }

    #[test]
    fn test_key_synthesis_on_non_default_sharding() {
        let directory = directory_for("users", &["region"], &["s0", "s1"]);
        let mut block = distribute_over(
            vec![json!({"region": "eu"})],
            directory,
            &["s0", "s1"],
            true,
            false,
        );
        let delivered = drain(&mut block, &["s0", "s1"]);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1.get(KEY_FIELD), Some(&json!("42")));
    }

    #[test]
    fn test_string_value_becomes_key_object() {
        let directory = directory_for("users", &[KEY_FIELD], &["s0", "s1"]);
        let mut block = distribute_over(
            vec![json!("alice")],
            directory,
            &["s0", "s1"],
            false,
            true,
        );
        let delivered = drain(&mut block, &["s0", "s1"]);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1, json!({"_key": "alice"}));
    }

    #[test]
    fn test_string_value_without_conversion_is_invalid() {
        let directory = directory_for("users", &[KEY_FIELD], &["s0", "s1"]);
        let mut block = distribute_over(
            vec![json!("alice")],
            directory,
            &["s0", "s1"],
            false,
            false,
        );
        let err = block.get_some_for_shard(1, 10, "s0").unwrap_err();
        assert_eq!(err, OspreyError::InvalidDocumentType);
    }

    #[test]
    fn test_null_falls_back_to_alternative_register() {
        let directory = directory_for("users", &[KEY_FIELD], &["s0", "s1"]);
        // reg 0 holds null (search doc of an upsert), reg 1 the insert doc
        let mut batch = TupleBatch::new(1, 2);
        batch.set_value(0, 0, TupleValue::new(Value::Null));
        batch.set_value(0, 1, TupleValue::new(json!({"_key": "k1"})));
        let upstream = FixtureBlock::new(vec![batch]);

        let mut block = DistributeBlock::new(
            Box::new(upstream),
            &shards(&["s0", "s1"]),
            directory,
            "users",
            0,
            Some(1),
            false,
            false,
        )
        .expect("construct");
        block.initialize_cursor(None, 0).expect("cursor");

        let mut total = 0;
        for shard in ["s0", "s1"] {
            while let Some(batch) = block.get_some_for_shard(1, 10, shard).expect("pull") {
                total += batch.size();
                assert_eq!(batch.value(0, 1).document(), Some(&json!({"_key": "k1"})));
            }
        }
        assert_eq!(total, 1);
    }

    #[test]
    fn test_in_place_mutation_is_visible_through_tickets() {
        let directory = directory_for("users", &[KEY_FIELD], &["s0"]);
        let mut block = distribute_over(
            vec![json!({"a": 1}), json!({"b": 2})],
            directory,
            &["s0"],
            true,
            false,
        );
        let batch = block
            .get_some_for_shard(1, 10, "s0")
            .expect("pull")
            .expect("rows");
        // both rows were rewritten in the retained upstream batch before
        // delivery
        assert_eq!(batch.size(), 2);
        assert_eq!(batch.value(0, 0).document().unwrap()[KEY_FIELD], json!("42"));
        assert_eq!(batch.value(1, 0).document().unwrap()[KEY_FIELD], json!("43"));
    }

    #[test]
    fn test_skip_for_shard_pops_tickets() {
        let directory = directory_for("users", &[KEY_FIELD], &["s0"]);
        let rows: Vec<Value> = (0..5).map(|i| json!({"_key": format!("k{}", i)})).collect();
        let mut block = distribute_over(rows, directory, &["s0"], false, false);

        assert_eq!(block.skip_some_for_shard(2, 2, "s0").expect("skip"), 2);
        let rest = block
            .get_some_for_shard(1, 10, "s0")
            .expect("pull")
            .expect("rows");
        assert_eq!(rest.size(), 3);
        assert_eq!(rest.value(0, 0).document().unwrap()["_key"], json!("k2"));
    }

    #[test]
    fn test_empty_cell_is_invalid_document() {
        let directory = directory_for("users", &[KEY_FIELD], &["s0"]);
        let upstream = FixtureBlock::new(vec![TupleBatch::new(1, 1)]);
        let mut block = DistributeBlock::new(
            Box::new(upstream),
            &shards(&["s0"]),
            directory,
            "users",
            0,
            None,
            false,
            false,
        )
        .expect("construct");
        block.initialize_cursor(None, 0).expect("cursor");
        assert_eq!(
            block.get_some_for_shard(1, 10, "s0").unwrap_err(),
            OspreyError::InvalidDocumentType
        );
    }
}
