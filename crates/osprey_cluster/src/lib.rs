//! Cluster-distributed query execution.
//!
//! A query plan is split across a coordinator and many data-bearing nodes;
//! the plan pieces that cross machine boundaries are realized by four
//! operator kinds streaming tuple batches between shards:
//!
//! - **Gather**: N upstream dependencies → one stream, plain concatenation
//!   or stable k-way merge over a sort key.
//! - **Scatter**: broadcast every upstream row to every shard client over
//!   one shared ring buffer.
//! - **Distribute**: route every upstream row to exactly one shard client
//!   by document content, synthesizing primary keys where required.
//! - **Remote**: forward every iterator call to a peer as one synchronous
//!   request.
//!
//! The seams they consume live here as well: the cluster directory
//! (shard→server map, responsible-shard lookup, unique-id allocation), the
//! synchronous RPC client trait, and the dispatcher-thread hook that lets
//! a blocking request yield its bounded worker slot.

pub mod cluster_exec;
pub mod directory;
pub mod dispatcher;
pub mod rpc;

pub use cluster_exec::{
    ClientRegistry, DistributeBlock, GatherBlock, MultiClientBlock, RemoteBlock, ScatterBlock,
};
pub use directory::{ClusterDirectory, CollectionInfo};
pub use dispatcher::{DispatcherThread, WorkDispatcher};
pub use rpc::{check_sync_result, HttpMethod, RpcClient, RpcResult, RpcStatus};
