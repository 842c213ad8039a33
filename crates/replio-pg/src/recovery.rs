//! Recovery engine
//!
//! The primary drives recovery: it pulls objects it is missing from known
//! holders and pushes objects to peers that are behind. Client ops that
//! touch an unavailable object park on a per-object waiter list and are
//! re-dispatched when the object arrives, while live writes continue.

use crate::info::{INFO_ATTR, VERSION_ATTR};
use crate::messages::{Message, OpKind, OsdOp};
use crate::pg::ReplicatedPg;
use replio_common::{Entity, EVersion, ObjectId, OsdId, ReqId};
use replio_store::Transaction;
use tracing::{debug, warn};

impl ReplicatedPg {
    /// True if this node's log references `oid` but its data has not yet
    /// been pulled
    #[must_use]
    pub fn is_missing_object(&self, oid: ObjectId) -> bool {
        self.missing.is_missing(oid)
    }

    /// Park `op` until `oid` arrives, starting a pull if one is not
    /// already in flight.
    pub(crate) fn wait_for_missing_object(&mut self, from: Entity, op: OsdOp) {
        let oid = op.oid;
        debug_assert!(self.missing.is_missing(oid));
        let v = self.missing.needs(oid).unwrap_or(EVersion::ZERO);
        if self.objects_pulling.contains_key(&oid) {
            debug!("missing {} v {}, already pulling", oid, v);
        } else {
            debug!("missing {} v {}, pulling", oid, v);
            self.pull(oid);
        }
        self.waiting_for_missing_object
            .entry(oid)
            .or_default()
            .push((from, op));
    }

    /// Request `oid` from a known holder.
    pub(crate) fn pull(&mut self, oid: ObjectId) {
        let Some(v) = self.missing.needs(oid) else {
            return;
        };
        let Some(fromosd) = self.missing.loc(oid) else {
            warn!("pull {} v {} has no known holder", oid, v);
            return;
        };
        debug!("pull {} v {} from {}", oid, v, fromosd);

        let tid = self.shared.next_tid();
        let reqid = ReqId::new(Entity::Osd(self.shared.whoami), 0, tid);
        let mut op = OsdOp::new(reqid, OpKind::Pull, oid, self.info.pgid, self.shared.epoch());
        op.version = v;
        self.shared.messenger.send_op(fromosd, op);
        self.shared.stats.record_pull();

        debug_assert!(!self.objects_pulling.contains_key(&oid));
        self.objects_pulling.insert(oid, v);
    }

    /// Send `oid`'s data and attributes to `dest`.
    pub(crate) fn push(&mut self, oid: ObjectId, dest: OsdId) {
        // read data and attrs
        let data = match self.shared.store.read(oid, 0, 0) {
            Ok(d) => d,
            Err(e) => {
                warn!("push {} to {}: {}", oid, dest, e);
                return;
            }
        };
        let attrset = match self.shared.store.getattrs(oid) {
            Ok(a) => a,
            Err(e) => {
                warn!("push {} to {}: {}", oid, dest, e);
                return;
            }
        };
        let v: EVersion = attrset
            .get(VERSION_ATTR)
            .and_then(|b| bincode::deserialize(b).ok())
            .unwrap_or(EVersion::ZERO);

        debug!("push {} v {} size {} to {}", oid, v, data.len(), dest);
        self.shared.stats.record_push(data.len() as u64);

        let tid = self.shared.next_tid();
        let reqid = ReqId::new(Entity::Osd(self.shared.whoami), 0, tid);
        let mut op = OsdOp::new(reqid, OpKind::Push, oid, self.info.pgid, self.shared.epoch());
        op.length = data.len() as u64;
        op.data = data;
        op.version = v;
        op.attrset = attrset;
        self.shared.messenger.send_op(dest, op);
    }

    /// A peer asks for a whole object.
    pub(crate) fn op_pull(&mut self, from: Entity, op: OsdOp) {
        let oid = op.oid;
        let Some(fromosd) = from.osd() else {
            return;
        };
        debug!("op_pull {} v {} from {}", oid, op.version, fromosd);

        if self.is_primary() {
            // peering had better have told us about this peer
            match self.peer_missing.get(&fromosd) {
                None => {
                    warn!("op_pull from {} with no peer_missing entry", fromosd);
                    return;
                }
                Some(pm) if !pm.is_missing(oid) => {
                    debug!("op_pull {} isn't missing on {}, already pushed", oid, fromosd);
                    return;
                }
                Some(_) => {}
            }
            // do we have it yet?
            if self.missing.is_missing(oid) {
                self.wait_for_missing_object(from, op);
                return;
            }
        } else if self.missing.is_missing(oid) {
            debug!("op_pull not primary, and missing {}, ignoring", oid);
            return;
        }

        self.push(oid, fromosd);
    }

    /// A peer sends an object we are missing.
    pub(crate) fn op_push(&mut self, _from: Entity, op: OsdOp) {
        let oid = op.oid;
        let v = op.version;

        if !self.missing.is_missing(oid) {
            debug!("op_push not missing {}", oid);
            return;
        }
        debug!("op_push {} v {} size {}", oid, v, op.data.len());
        debug_assert_eq!(op.data.len() as u64, op.length);

        // write the object and add it to the pg
        let mut t = Transaction::new();
        t.remove(oid); // in case an old version exists
        t.write(oid, 0, op.data.clone());
        t.setattrs(oid, op.attrset.clone());
        t.collection_add(self.info.pgid, oid);

        // close out the pull
        self.objects_pulling.remove(&oid);
        self.missing.got(oid, v);

        // raise last_complete?
        let mut lc = self.info.last_complete;
        self.log.advance_complete_to(&self.missing, &mut lc);
        self.info.last_complete = lc;
        debug!("last_complete now {}", self.info.last_complete);

        t.collection_setattr(self.info.pgid, INFO_ATTR, self.info.encode());
        // a transaction failure at this layer means the pg is corrupt
        self.shared
            .store
            .apply_transaction(t, None)
            .expect("pg transaction apply failed");

        // are others missing this too?
        if self.is_primary() {
            let behind: Vec<OsdId> = self
                .acting
                .iter()
                .skip(1)
                .copied()
                .filter(|peer| {
                    self.peer_missing
                        .get(peer)
                        .is_some_and(|m| m.is_missing(oid))
                })
                .collect();
            for peer in behind {
                if let Some(m) = self.peer_missing.get_mut(&peer) {
                    m.got(oid, v);
                }
                self.push(oid, peer);
            }
        }

        // continue recovery
        self.do_recovery();

        // kick waiters
        if let Some(waiters) = self.waiting_for_missing_object.remove(&oid) {
            debug!("waking {} ops parked on {}", waiters.len(), oid);
            self.wakeups
                .extend(waiters.into_iter().map(|(f, w)| (f, Message::Op(w))));
        }
    }

    /// Pull further missing objects with a known holder, up to the
    /// configured concurrency cap. Only the primary drives recovery.
    pub fn do_recovery(&mut self) {
        if !self.is_primary() {
            return;
        }
        let max = self.shared.config.max_pulls;
        let candidates: Vec<ObjectId> = self
            .missing
            .iter()
            .map(|(oid, _)| oid)
            .filter(|oid| {
                !self.objects_pulling.contains_key(oid) && self.missing.loc(*oid).is_some()
            })
            .collect();
        for oid in candidates {
            if self.objects_pulling.len() >= max {
                break;
            }
            self.pull(oid);
        }
    }

    /// Position the recovery cursor from the current missing set and kick
    /// off pulls. Called once peering has installed `missing` and
    /// `peer_missing`.
    pub fn start_recovery(&mut self) {
        self.log.reset_complete_to(&self.missing);
        self.do_recovery();
    }
}
