//! Store transactions
//!
//! A `Transaction` is an ordered batch of mutations applied atomically by
//! the store. The PG write path builds exactly one transaction per
//! mutation: log append, PG info write, the object change itself, and the
//! collection/attribute bookkeeping around it.

use bytes::Bytes;
use replio_common::{EVersion, ObjectId, PgId};
use std::collections::BTreeMap;

/// One mutation inside a transaction.
#[derive(Clone, Debug)]
pub enum TxOp {
    /// Write `data` at `offset`, extending the object if needed
    Write {
        oid: ObjectId,
        offset: u64,
        data: Bytes,
    },
    /// Truncate (or zero-extend) the object to `length`
    Truncate { oid: ObjectId, length: u64 },
    /// Remove the object. Removing a nonexistent object is a no-op.
    Remove { oid: ObjectId },
    /// Copy `oid`'s data and attributes to `noid`
    Clone { oid: ObjectId, noid: ObjectId },
    /// Set one object attribute
    SetAttr {
        oid: ObjectId,
        name: String,
        value: Vec<u8>,
    },
    /// Remove one object attribute
    RmAttr { oid: ObjectId, name: String },
    /// Replace the object's attributes wholesale
    SetAttrs {
        oid: ObjectId,
        attrs: BTreeMap<String, Vec<u8>>,
    },
    /// Add an object to a collection. A duplicate add is benign: the store
    /// counts it and the transaction continues.
    CollectionAdd { cid: PgId, oid: ObjectId },
    /// Remove an object from a collection
    CollectionRemove { cid: PgId, oid: ObjectId },
    /// Set a collection attribute
    CollectionSetAttr {
        cid: PgId,
        name: String,
        value: Vec<u8>,
    },
    /// Append one serialized log entry to the collection's log object and
    /// record the requested trim point
    LogAppend {
        cid: PgId,
        entry: Vec<u8>,
        trim_to: EVersion,
    },
}

/// An ordered, atomic batch of store mutations.
#[derive(Debug, Default)]
pub struct Transaction {
    ops: Vec<TxOp>,
}

impl Transaction {
    /// Create an empty transaction
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ops in the transaction
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if the transaction contains no ops
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterate the ops in application order
    pub fn ops(&self) -> impl Iterator<Item = &TxOp> {
        self.ops.iter()
    }

    /// Consume the transaction, yielding its ops
    #[must_use]
    pub fn into_ops(self) -> Vec<TxOp> {
        self.ops
    }

    pub fn write(&mut self, oid: ObjectId, offset: u64, data: Bytes) {
        self.ops.push(TxOp::Write { oid, offset, data });
    }

    pub fn truncate(&mut self, oid: ObjectId, length: u64) {
        self.ops.push(TxOp::Truncate { oid, length });
    }

    pub fn remove(&mut self, oid: ObjectId) {
        self.ops.push(TxOp::Remove { oid });
    }

    pub fn clone_object(&mut self, oid: ObjectId, noid: ObjectId) {
        self.ops.push(TxOp::Clone { oid, noid });
    }

    pub fn setattr(&mut self, oid: ObjectId, name: impl Into<String>, value: Vec<u8>) {
        self.ops.push(TxOp::SetAttr {
            oid,
            name: name.into(),
            value,
        });
    }

    pub fn rmattr(&mut self, oid: ObjectId, name: impl Into<String>) {
        self.ops.push(TxOp::RmAttr {
            oid,
            name: name.into(),
        });
    }

    pub fn setattrs(&mut self, oid: ObjectId, attrs: BTreeMap<String, Vec<u8>>) {
        self.ops.push(TxOp::SetAttrs { oid, attrs });
    }

    pub fn collection_add(&mut self, cid: PgId, oid: ObjectId) {
        self.ops.push(TxOp::CollectionAdd { cid, oid });
    }

    pub fn collection_remove(&mut self, cid: PgId, oid: ObjectId) {
        self.ops.push(TxOp::CollectionRemove { cid, oid });
    }

    pub fn collection_setattr(&mut self, cid: PgId, name: impl Into<String>, value: Vec<u8>) {
        self.ops.push(TxOp::CollectionSetAttr {
            cid,
            name: name.into(),
            value,
        });
    }

    pub fn log_append(&mut self, cid: PgId, entry: Vec<u8>, trim_to: EVersion) {
        self.ops.push(TxOp::LogAppend {
            cid,
            entry,
            trim_to,
        });
    }
}
