//! Replication gather records
//!
//! One `RepGather` lives on the acker for each in-flight mutation. It owns
//! the originating op, the pending store transaction, and the per-peer
//! wait sets that decide when the client gets its ack and its commit.

use crate::messages::OsdOp;
use replio_common::{EVersion, OsdId, Tid};
use replio_store::Transaction;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

/// In-flight replication state for one mutation.
#[derive(Debug)]
pub struct RepGather {
    pub rep_tid: Tid,
    /// The originating request, owned until the gather is destroyed
    pub op: OsdOp,
    /// Version assigned to the mutation
    pub version: EVersion,
    /// This node's `last_complete` when the gather was created
    pub pg_local_last_complete: EVersion,

    /// Every peer participating in the gather
    pub osds: BTreeSet<OsdId>,
    /// Peers whose ack is still outstanding
    pub waitfor_ack: BTreeSet<OsdId>,
    /// Peers whose commit is still outstanding
    pub waitfor_commit: BTreeSet<OsdId>,
    /// `last_complete` reported by each peer that has committed
    pub pg_complete_thru: BTreeMap<OsdId, EVersion>,

    pub applied: bool,
    pub sent_ack: bool,
    pub sent_commit: bool,

    pub start: Instant,
    /// The pending local store transaction, taken when applied
    pub t: Transaction,
}

impl RepGather {
    /// Create a gather for `op`, with empty wait sets; the dispatcher
    /// fills them according to the replication mode.
    #[must_use]
    pub fn new(op: OsdOp, rep_tid: Tid, version: EVersion, last_complete: EVersion) -> Self {
        Self {
            rep_tid,
            op,
            version,
            pg_local_last_complete: last_complete,
            osds: BTreeSet::new(),
            waitfor_ack: BTreeSet::new(),
            waitfor_commit: BTreeSet::new(),
            pg_complete_thru: BTreeMap::new(),
            applied: false,
            sent_ack: false,
            sent_commit: false,
            start: Instant::now(),
            t: Transaction::new(),
        }
    }

    /// Ready to send the client's ack
    #[must_use]
    pub fn can_send_ack(&self) -> bool {
        !self.sent_ack && self.waitfor_ack.is_empty()
    }

    /// Ready to send the client's commit
    #[must_use]
    pub fn can_send_commit(&self) -> bool {
        !self.sent_commit && self.waitfor_commit.is_empty()
    }

    /// Nothing left to wait for or send; the gather can be destroyed
    #[must_use]
    pub fn can_delete(&self) -> bool {
        if !self.applied {
            return false;
        }
        if self.op.wants_commit {
            self.sent_commit
        } else {
            self.sent_ack && self.waitfor_commit.is_empty()
        }
    }
}

impl fmt::Display for RepGather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "repgather(tid {} v {} wfack {:?} wfcommit {:?}{}{}{})",
            self.rep_tid,
            self.version,
            self.waitfor_ack,
            self.waitfor_commit,
            if self.applied { " applied" } else { "" },
            if self.sent_ack { " sent_ack" } else { "" },
            if self.sent_commit { " sent_commit" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::OpKind;
    use replio_common::{Entity, ObjectId, ObjectName, PgId, ReqId};

    fn gather(wants_commit: bool) -> RepGather {
        let mut op = OsdOp::new(
            ReqId::new(Entity::Osd(OsdId::new(0)), 0, 1),
            OpKind::Write,
            ObjectId::head(ObjectName::new(1)),
            PgId::new(1),
            1,
        );
        op.wants_commit = wants_commit;
        RepGather::new(op, 7, EVersion::new(1, 1), EVersion::ZERO)
    }

    #[test]
    fn test_ack_commit_readiness() {
        let mut g = gather(true);
        g.waitfor_ack.insert(OsdId::new(1));
        g.waitfor_commit.insert(OsdId::new(1));
        assert!(!g.can_send_ack());
        assert!(!g.can_send_commit());

        g.waitfor_ack.clear();
        assert!(g.can_send_ack());
        g.sent_ack = true;
        assert!(!g.can_send_ack());

        g.waitfor_commit.clear();
        assert!(g.can_send_commit());
        g.sent_commit = true;
        assert!(!g.can_send_commit());
    }

    #[test]
    fn test_can_delete_requires_applied() {
        let mut g = gather(true);
        g.sent_commit = true;
        assert!(!g.can_delete());
        g.applied = true;
        assert!(g.can_delete());
    }

    #[test]
    fn test_can_delete_ack_only() {
        let mut g = gather(false);
        g.applied = true;
        g.sent_ack = true;
        g.waitfor_commit.insert(OsdId::new(2));
        assert!(!g.can_delete());
        g.waitfor_commit.clear();
        assert!(g.can_delete());
    }
}
