//! Object transaction builder
//!
//! Translates one versioned op into a single atomic store transaction:
//! the implied clone, the log append with its trim point, the PG info
//! write, the mutation itself, and the collection/attribute bookkeeping.

use crate::info::{CREV_ATTR, INFO_ATTR, VERSION_ATTR, WRLOCK_ATTR};
use crate::log::{EntryKind, LogEntry};
use crate::messages::{Message, OpKind, OsdOp};
use crate::pg::ReplicatedPg;
use replio_common::{EVersion, ObjectId, Rev};
use replio_store::Transaction;
use tracing::debug;

impl ReplicatedPg {
    /// Append the op's log entries (the implied clone entry, then the
    /// modify/delete entry) to the in-memory log and to `t`, carrying the
    /// requested trim point. The trim point must already be bounded by
    /// the minimum `last_complete` across the acting set.
    pub(crate) fn prepare_log_transaction(
        &mut self,
        t: &mut Transaction,
        op: &OsdOp,
        version: EVersion,
        crev: Rev,
        trim_to: EVersion,
    ) {
        let oid = op.oid;
        let pgid = self.info.pgid;

        // clone entry?
        if crev != 0 && op.rev != 0 && op.rev > crev {
            let mut cv = version;
            cv.version -= 1;
            let cloneentry = LogEntry::new(EntryKind::Clone, oid, cv, op.reqid);
            debug!("prepare_log_transaction {} {}", op.kind, cloneentry);
            self.log.add(cloneentry);
            t.log_append(pgid, cloneentry.encode(), trim_to);
        }

        // actual op
        let kind = if op.kind == OpKind::Delete {
            EntryKind::Delete
        } else {
            EntryKind::Modify
        };
        let logentry = LogEntry::new(kind, oid, version, op.reqid);
        debug!("prepare_log_transaction {} {}", op.kind, logentry);

        debug_assert!(version > self.log.top);
        self.log.add(logentry);
        debug_assert!(self.log.top == version);

        // write to the pg log on disk, trimming what everyone has
        t.log_append(pgid, logentry.encode(), trim_to);
        self.log.trim(trim_to);
    }

    /// Build the store mutations for one op into `t`, raising
    /// `last_complete` (iff the PG was fully caught up) and `last_update`.
    pub(crate) fn prepare_op_transaction(
        &mut self,
        t: &mut Transaction,
        op: &mut OsdOp,
        version: EVersion,
        crev: Rev,
    ) {
        let oid = op.oid;
        let pgid = self.info.pgid;

        debug!(
            "prepare_op_transaction {} {} v {} crev {} rev {}",
            op.kind, oid, version, crev, op.rev
        );

        // a no-op write touches nothing
        if op.kind == OpKind::WrNoop {
            return;
        }

        // raise last_complete?
        if self.info.last_complete == self.info.last_update {
            self.info.last_complete = version;
        }

        // raise last_update
        debug_assert!(version > self.info.last_update);
        self.info.last_update = version;

        // write pg info
        t.collection_setattr(pgid, INFO_ATTR, self.info.encode());

        // clone?
        let mut did_clone = false;
        if crev != 0 && op.rev != 0 && op.rev > crev {
            let noid = ObjectId::with_rev(oid.name, op.rev);
            debug!(
                "prepare_op_transaction cloning {} crev {} to {}",
                oid, crev, noid
            );
            t.clone_object(oid, noid);
            t.collection_add(pgid, noid);
            did_clone = true;
        }

        // apply the op
        match op.kind {
            OpKind::WrLock => {
                t.setattr(
                    oid,
                    WRLOCK_ATTR,
                    bincode::serialize(&op.reqid.client).unwrap_or_default(),
                );
            }
            OpKind::WrUnlock => {
                t.rmattr(oid, WRLOCK_ATTR);
                // unblock ops that were waiting for this object to unlock
                if let Some(waiters) = self.waiting_for_wr_unlock.remove(&oid) {
                    debug!("waking {} ops parked on wrlock {}", waiters.len(), oid);
                    self.wakeups
                        .extend(waiters.into_iter().map(|(f, w)| (f, Message::Op(w))));
                }
            }
            OpKind::Write => {
                // hand the buffer to the store; the op keeps no reference
                let data = std::mem::take(&mut op.data);
                debug_assert_eq!(data.len() as u64, op.length);
                t.write(oid, op.offset, data);
            }
            OpKind::Truncate => {
                t.truncate(oid, op.length);
            }
            OpKind::Delete => {
                t.remove(oid);
            }
            other => unreachable!("{other} is not a store mutation"),
        }

        // object collection and version attrs
        if op.kind == OpKind::Delete {
            t.collection_remove(pgid, oid);
        } else {
            t.collection_add(pgid, oid);
            t.setattr(
                oid,
                VERSION_ATTR,
                bincode::serialize(&version).unwrap_or_default(),
            );
            // new object, or we cloned
            if crev == 0 || did_clone {
                t.setattr(
                    oid,
                    CREV_ATTR,
                    bincode::serialize(&op.rev).unwrap_or_default(),
                );
            }
        }
    }
}
