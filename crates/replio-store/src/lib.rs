//! Object store boundary for replio
//!
//! The PG write path treats the durable store as a black box offering
//! transactional mutation with a post-durability commit callback, plus a
//! handful of read-side primitives. This crate defines that boundary
//! (`ObjectStore`, `Transaction`) and ships an in-memory backend used by
//! the test suites and by embedders that bring their own durability.

pub mod mem;
pub mod transaction;

pub use mem::{CommitMode, MemStore};
pub use transaction::{Transaction, TxOp};

use bytes::Bytes;
use replio_common::{ObjectId, PgId, Result};
use std::collections::BTreeMap;

/// Callback invoked once a transaction is durable. Never invoked inline on
/// the applying thread; the store's commit thread re-acquires whatever
/// locks the callback needs.
pub type CommitFn = Box<dyn FnOnce() + Send + 'static>;

/// Result of a stat
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectStat {
    /// Object size in bytes
    pub size: u64,
}

/// The durable object store consumed by the PG write path.
///
/// `apply_transaction` is atomic: either every op in the transaction is
/// applied or none is. The optional commit callback fires after the
/// transaction is durable.
pub trait ObjectStore: Send + Sync {
    /// Read `len` bytes at `off`; `len == 0` reads through end of object.
    fn read(&self, oid: ObjectId, off: u64, len: u64) -> Result<Bytes>;

    /// Stat an object
    fn stat(&self, oid: ObjectId) -> Result<ObjectStat>;

    /// Read one attribute. `Ok(None)` when the object or attribute does
    /// not exist.
    fn getattr(&self, oid: ObjectId, name: &str) -> Result<Option<Vec<u8>>>;

    /// Read all attributes of an object
    fn getattrs(&self, oid: ObjectId) -> Result<BTreeMap<String, Vec<u8>>>;

    /// List the objects of a collection, in id order
    fn collection_list(&self, cid: PgId) -> Result<Vec<ObjectId>>;

    /// Apply a transaction atomically; `on_commit` fires after durability.
    fn apply_transaction(&self, t: Transaction, on_commit: Option<CommitFn>) -> Result<()>;
}
