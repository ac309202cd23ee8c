//! The four cluster operators and their shared multi-client substrate.
//!
//! All state is per-cursor and in-memory; a cursor is pulled on one thread
//! at a time. Ordering guarantees:
//! - plain Gather concatenates in dependency-list order;
//! - sorted Gather is a stable merge (ties go to the lower-indexed
//!   dependency);
//! - Scatter delivers upstream rows to every client in upstream order;
//! - Distribute delivers to each client, in upstream order, the subset of
//!   rows routed to it.

pub mod distribute;
pub mod gather;
pub mod multi_client;
pub mod remote;
pub mod scatter;

pub use distribute::DistributeBlock;
pub use gather::GatherBlock;
pub use multi_client::{ClientRegistry, MultiClientBlock};
pub use remote::RemoteBlock;
pub use scatter::ScatterBlock;
