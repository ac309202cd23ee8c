//! Cluster directory: registered collections, shard→server placement,
//! responsible-shard computation and the unique-id allocator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use xxhash_rust::xxh3::xxh3_64;

use osprey_common::error::{OspreyError, OspreyResult};
use osprey_common::types::{ServerId, ShardId, KEY_FIELD};

/// Metadata of one sharded collection.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    /// Plan-level collection id, as referenced by operators.
    pub plan_id: String,
    /// Shards of the collection, in stable order.
    pub shard_ids: Vec<ShardId>,
    /// Attributes the collection is sharded by.
    pub shard_keys: Vec<String>,
}

impl CollectionInfo {
    /// True iff the collection is sharded by the key attribute alone.
    pub fn uses_default_sharding(&self) -> bool {
        self.shard_keys.len() == 1 && self.shard_keys[0] == KEY_FIELD
    }
}

/// The cluster directory: shard→server map, responsible-shard lookup for a
/// document, and a monotonic unique-id allocator.
pub struct ClusterDirectory {
    collections: RwLock<HashMap<String, CollectionInfo>>,
    shard_servers: DashMap<ShardId, ServerId>,
    ticker: AtomicU64,
}

impl ClusterDirectory {
    pub fn new() -> Self {
        ClusterDirectory {
            collections: RwLock::new(HashMap::new()),
            shard_servers: DashMap::new(),
            ticker: AtomicU64::new(0),
        }
    }

    /// Start the unique-id allocator at `base` (the next id handed out is
    /// `base`).
    pub fn with_unique_id_base(self, base: u64) -> Self {
        self.ticker.store(base.saturating_sub(1), Ordering::SeqCst);
        self
    }

    pub fn register_collection(&self, info: CollectionInfo) {
        self.collections.write().insert(info.plan_id.clone(), info);
    }

    pub fn set_shard_leader(&self, shard: ShardId, server: ServerId) {
        self.shard_servers.insert(shard, server);
    }

    /// The server currently holding `shard`.
    pub fn leader_for_shard(&self, shard: &ShardId) -> Option<ServerId> {
        self.shard_servers.get(shard).map(|s| s.clone())
    }

    pub fn collection(&self, plan_id: &str) -> OspreyResult<CollectionInfo> {
        self.collections
            .read()
            .get(plan_id)
            .cloned()
            .ok_or_else(|| OspreyError::internal(format!("unknown collection {}", plan_id)))
    }

    /// True iff `plan_id` is sharded by the key attribute alone.
    pub fn uses_default_sharding(&self, plan_id: &str) -> OspreyResult<bool> {
        Ok(self.collection(plan_id)?.uses_default_sharding())
    }

    /// The shard that stores or accepts `document`, together with whether
    /// the collection uses default (key-attribute) sharding.
    ///
    /// Each shard-key attribute of the document feeds the hash; a missing
    /// attribute hashes as `null` when `allow_create` is set and is an
    /// error otherwise.
    pub fn responsible_shard(
        &self,
        plan_id: &str,
        document: &Value,
        allow_create: bool,
    ) -> OspreyResult<(ShardId, bool)> {
        let info = self.collection(plan_id)?;
        if info.shard_ids.is_empty() {
            return Err(OspreyError::internal(format!(
                "collection {} has no shards",
                plan_id
            )));
        }

        let mut key_bytes: Vec<u8> = Vec::new();
        for attribute in &info.shard_keys {
            match document.get(attribute) {
                Some(value) => {
                    key_bytes.extend_from_slice(value.to_string().as_bytes());
                }
                None if allow_create => key_bytes.extend_from_slice(b"null"),
                None => {
                    return Err(OspreyError::internal(format!(
                        "document misses shard key attribute '{}' of collection {}",
                        attribute, plan_id
                    )));
                }
            }
            key_bytes.push(0);
        }

        let hash = xxh3_64(&key_bytes);
        let index = (hash % info.shard_ids.len() as u64) as usize;
        Ok((info.shard_ids[index].clone(), info.uses_default_sharding()))
    }

    /// A fresh cluster-unique id.
    pub fn unique_id(&self) -> u64 {
        self.ticker.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for ClusterDirectory {
    fn default() -> Self {
        Self::new()
    }
}
