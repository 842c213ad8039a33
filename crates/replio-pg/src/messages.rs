//! Peer and client message types
//!
//! Transport-agnostic message shapes for the PG write path. The wire
//! format and the messenger itself are external; these types carry exactly
//! the fields the protocol needs and derive serde so any transport can
//! frame them.

use bytes::Bytes;
use replio_common::{Entity, EVersion, Epoch, ObjectId, OsdId, PgId, ReqId, Rev, Tid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Operation code for an [`OsdOp`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    // reads
    Read,
    Stat,
    // modify family
    WrNoop,
    WrLock,
    WrUnlock,
    Write,
    Zero,
    Truncate,
    Delete,
    // recovery
    Pull,
    Push,
}

impl OpKind {
    /// True for ops that mutate PG state and travel the replication path
    #[must_use]
    pub const fn is_modify(&self) -> bool {
        matches!(
            self,
            Self::WrNoop
                | Self::WrLock
                | Self::WrUnlock
                | Self::Write
                | Self::Zero
                | Self::Truncate
                | Self::Delete
        )
    }

    /// Short name for logging
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Stat => "stat",
            Self::WrNoop => "wrnoop",
            Self::WrLock => "wrlock",
            Self::WrUnlock => "wrunlock",
            Self::Write => "write",
            Self::Zero => "zero",
            Self::Truncate => "truncate",
            Self::Delete => "delete",
            Self::Pull => "pull",
            Self::Push => "push",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome code carried in replies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpResult {
    #[default]
    Ok,
    StaleEpoch,
    NoSuchObject,
    NoSuchRevision,
    NotImplemented,
}

impl OpResult {
    /// True on success
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// One operation against a PG: a client request, a replicated copy of one,
/// or a recovery pull/push.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OsdOp {
    pub reqid: ReqId,
    pub kind: OpKind,
    pub oid: ObjectId,
    pub pgid: PgId,
    /// Sender's cluster-map epoch; checked against PG history on entry
    pub epoch: Epoch,
    pub offset: u64,
    pub length: u64,
    pub data: Bytes,
    /// Replay hint on client ops; assigned position once versioned;
    /// needed/carried object version on pulls and pushes
    pub version: EVersion,
    /// Revision the client is writing at; `rev > stored crev > 0` implies
    /// a clone before the mutation
    pub rev: Rev,
    /// Ties replica replies to the in-flight replication record
    pub rep_tid: Tid,
    /// How far the sender permits the receiver to trim its log
    pub pg_trim_to: EVersion,
    /// Object attributes, carried by pushes only
    pub attrset: BTreeMap<String, Vec<u8>>,
    pub wants_ack: bool,
    pub wants_commit: bool,
}

impl OsdOp {
    /// Create an op with empty payload and default flags
    #[must_use]
    pub fn new(reqid: ReqId, kind: OpKind, oid: ObjectId, pgid: PgId, epoch: Epoch) -> Self {
        Self {
            reqid,
            kind,
            oid,
            pgid,
            epoch,
            offset: 0,
            length: 0,
            data: Bytes::new(),
            version: EVersion::ZERO,
            rev: 0,
            rep_tid: 0,
            pg_trim_to: EVersion::ZERO,
            attrset: BTreeMap::new(),
            wants_ack: true,
            wants_commit: true,
        }
    }
}

impl fmt::Display for OsdOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} {} {}~{} v {})",
            self.kind, self.reqid, self.oid, self.offset, self.length, self.version
        )
    }
}

/// Reply to an [`OsdOp`]: either an ack (applied, not yet durable) or a
/// commit (durable).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpReply {
    pub reqid: ReqId,
    pub kind: OpKind,
    pub pgid: PgId,
    pub epoch: Epoch,
    pub result: OpResult,
    /// True for commit replies, false for acks
    pub commit: bool,
    pub rep_tid: Tid,
    /// Sender's `last_complete` at the time the op committed
    pub pg_complete_thru: EVersion,
    pub length: u64,
    pub object_size: Option<u64>,
    pub data: Bytes,
}

impl OpReply {
    /// Build a reply mirroring `op`'s identifying fields
    #[must_use]
    pub fn to_op(op: &OsdOp, result: OpResult, epoch: Epoch, commit: bool) -> Self {
        Self {
            reqid: op.reqid,
            kind: op.kind,
            pgid: op.pgid,
            epoch,
            result,
            commit,
            rep_tid: op.rep_tid,
            pg_complete_thru: EVersion::ZERO,
            length: 0,
            object_size: None,
            data: Bytes::new(),
        }
    }
}

impl fmt::Display for OpReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reply({} {} {:?} {})",
            self.reqid,
            self.kind,
            self.result,
            if self.commit { "commit" } else { "ack" }
        )
    }
}

/// Any message routed to a PG.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    Op(OsdOp),
    Reply(OpReply),
}

impl Message {
    /// The PG this message addresses
    #[must_use]
    pub fn pgid(&self) -> PgId {
        match self {
            Self::Op(op) => op.pgid,
            Self::Reply(r) => r.pgid,
        }
    }
}

/// Outbound message delivery. The transport, framing and addressing are
/// external; the write path only ever hands a message and a destination to
/// this trait.
///
/// Sends may happen while the sending PG's mutex is held, so
/// implementations must enqueue rather than deliver into a PG on the
/// calling thread.
pub trait Messenger: Send + Sync {
    /// Send an op to a peer node
    fn send_op(&self, to: OsdId, op: OsdOp);

    /// Send a reply to a client or peer
    fn send_reply(&self, to: Entity, reply: OpReply);
}
