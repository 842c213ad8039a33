//! Replicated placement-group write path
//!
//! A placement group (PG) is one replicated shard of the object namespace,
//! hosted by an ordered acting set of storage nodes. This crate coordinates
//! client reads and writes against one PG's local object store while
//! keeping the replicas mutually consistent: it assigns each mutation a
//! monotonic position in the PG's history, logs it, fans it out to peers
//! under the configured topology (primary, chain, or splay), gathers acks
//! and commits, and pulls or pushes out-of-date objects between peers in
//! the background while live writes continue.
//!
//! Cluster-map distribution, peering, the durable store internals, and the
//! wire transport are external collaborators reached through the
//! [`ObjectStore`](replio_store::ObjectStore) and [`Messenger`] traits.

pub mod gather;
pub mod info;
pub mod log;
pub mod messages;
pub mod missing;
pub mod osd;
pub mod pg;
mod recovery;
pub mod stats;
mod txn;

pub use gather::RepGather;
pub use info::{History, PgInfo};
pub use log::{EntryKind, LogEntry, PgLog};
pub use messages::{Message, Messenger, OpKind, OpResult, OpReply, OsdOp};
pub use missing::MissingSet;
pub use osd::{Osd, OsdShared};
pub use pg::ReplicatedPg;
pub use stats::OsdStats;
