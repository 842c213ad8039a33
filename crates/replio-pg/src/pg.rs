//! The replicated PG
//!
//! One `ReplicatedPg` per hosted placement group. All handlers for a PG
//! run under its mutex: client op entry, replicated copies from peers,
//! replies, pull/push traffic, and store commit callbacks (which
//! re-acquire the mutex on the store's callback thread through a weak
//! self-handle). Ops woken by recovery or unlock are accumulated in a
//! wake queue and re-dispatched after the current handler returns.

use crate::gather::RepGather;
use crate::info::{CREV_ATTR, History, PgInfo, WRLOCK_ATTR};
use crate::log::PgLog;
use crate::messages::{Message, OpKind, OpReply, OpResult, OsdOp};
use crate::missing::MissingSet;
use crate::osd::OsdShared;
use parking_lot::Mutex;
use replio_common::{Entity, EVersion, Epoch, ObjectId, OsdId, PgId, ReplicationMode, Rev, Tid};
use replio_store::{CommitFn, Transaction};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Replica-side state for one replicated modify: the commit to the acker
/// goes out once the op is both locally acknowledged and durable, in
/// whichever order those happen.
#[derive(Debug)]
pub(crate) struct RepModify {
    pub(crate) op: OsdOp,
    pub(crate) ackerosd: OsdId,
    /// `last_complete` snapshot taken after the op raised it
    pub(crate) last_complete: EVersion,
    pub(crate) acked: bool,
    pub(crate) committed: bool,
}

/// One hosted placement group.
pub struct ReplicatedPg {
    pub(crate) shared: Arc<OsdShared>,
    pub(crate) self_ref: Weak<Mutex<ReplicatedPg>>,

    pub(crate) info: PgInfo,
    pub(crate) log: PgLog,
    pub(crate) missing: MissingSet,
    pub(crate) acting: Vec<OsdId>,
    pub(crate) peer_missing: HashMap<OsdId, MissingSet>,
    /// Minimum `last_complete` across the acting set, as last observed
    pub(crate) peers_complete_thru: EVersion,

    pub(crate) rep_gather: HashMap<Tid, RepGather>,
    /// Replies that arrived before their gather existed
    pub(crate) waiting_for_repop: HashMap<Tid, Vec<(Entity, OpReply)>>,
    pub(crate) rep_modify_pending: HashMap<Tid, RepModify>,

    pub(crate) objects_pulling: HashMap<ObjectId, EVersion>,
    pub(crate) waiting_for_missing_object: HashMap<ObjectId, Vec<(Entity, OsdOp)>>,
    pub(crate) waiting_for_wr_unlock: HashMap<ObjectId, Vec<(Entity, OsdOp)>>,

    /// Ops and replies to re-dispatch once the current handler returns
    pub(crate) wakeups: Vec<(Entity, Message)>,
}

impl ReplicatedPg {
    pub(crate) fn new(
        shared: Arc<OsdShared>,
        pgid: PgId,
        acting: Vec<OsdId>,
        history: History,
        self_ref: Weak<Mutex<ReplicatedPg>>,
    ) -> Self {
        let mut info = PgInfo::new(pgid);
        info.history = history;
        Self {
            shared,
            self_ref,
            info,
            log: PgLog::new(),
            missing: MissingSet::new(),
            acting,
            peer_missing: HashMap::new(),
            peers_complete_thru: EVersion::ZERO,
            rep_gather: HashMap::new(),
            waiting_for_repop: HashMap::new(),
            rep_modify_pending: HashMap::new(),
            objects_pulling: HashMap::new(),
            waiting_for_missing_object: HashMap::new(),
            waiting_for_wr_unlock: HashMap::new(),
            wakeups: Vec::new(),
        }
    }

    // ==================== state access ====================

    /// This PG's id
    #[must_use]
    pub fn pgid(&self) -> PgId {
        self.info.pgid
    }

    /// Current persistent info
    #[must_use]
    pub fn info(&self) -> &PgInfo {
        &self.info
    }

    /// Mutable info, for the peering subsystem to install history and
    /// completeness markers
    pub fn info_mut(&mut self) -> &mut PgInfo {
        &mut self.info
    }

    /// The in-memory log
    #[must_use]
    pub fn log(&self) -> &PgLog {
        &self.log
    }

    /// The acting set, primary first
    #[must_use]
    pub fn acting(&self) -> &[OsdId] {
        &self.acting
    }

    /// Minimum `last_complete` across peers, as last gathered
    #[must_use]
    pub fn peers_complete_thru(&self) -> EVersion {
        self.peers_complete_thru
    }

    /// Objects this node is behind on
    #[must_use]
    pub fn missing(&self) -> &MissingSet {
        &self.missing
    }

    /// Mutable missing set, for the peering subsystem
    pub fn missing_mut(&mut self) -> &mut MissingSet {
        &mut self.missing
    }

    /// Mutable per-peer missing set, for the peering subsystem
    pub fn peer_missing_mut(&mut self, peer: OsdId) -> &mut MissingSet {
        self.peer_missing.entry(peer).or_default()
    }

    /// Number of in-flight replication gathers
    #[must_use]
    pub fn in_flight_gathers(&self) -> usize {
        self.rep_gather.len()
    }

    /// Number of replica-side modifies awaiting durability
    #[must_use]
    pub fn pending_rep_modifies(&self) -> usize {
        self.rep_modify_pending.len()
    }

    /// Objects with an outstanding pull
    #[must_use]
    pub fn num_pulling(&self) -> usize {
        self.objects_pulling.len()
    }

    // ==================== roles ====================

    fn whoami(&self) -> OsdId {
        self.shared.whoami
    }

    /// Position of `osd` in the acting set
    fn rank(&self, osd: OsdId) -> Option<usize> {
        self.acting.iter().position(|&o| o == osd)
    }

    /// True if this node is the primary (`acting[0]`)
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.acting.first() == Some(&self.whoami())
    }

    fn primary(&self) -> OsdId {
        self.acting[0]
    }

    /// The peer that assembles client replies: the primary in
    /// primary-fanout mode, otherwise the chain tail / splay acker.
    #[must_use]
    pub fn acker(&self) -> OsdId {
        match self.shared.config.rep_mode {
            ReplicationMode::Primary => self.acting[0],
            ReplicationMode::Chain | ReplicationMode::Splay => {
                if self.acting.len() > 1 {
                    self.acting[1]
                } else {
                    self.acting[0]
                }
            }
        }
    }

    /// True if this node assembles client replies for this PG
    #[must_use]
    pub fn is_acker(&self) -> bool {
        self.acker() == self.whoami()
    }

    // ==================== epoch guard ====================

    /// Reads are valid if the requester's map is no older than the last
    /// acker change.
    #[must_use]
    pub fn same_for_read_since(&self, e: Epoch) -> bool {
        e >= self.info.history.same_acker_since
    }

    /// Client writes are valid if the requester's map is no older than
    /// the last primary change.
    #[must_use]
    pub fn same_for_modify_since(&self, e: Epoch) -> bool {
        e >= self.info.history.same_primary_since
    }

    /// Replicated writes need the whole acting set stable in chain mode;
    /// primary-fanout and splay need stable primary and acker.
    #[must_use]
    pub fn same_for_rep_modify_since(&self, e: Epoch) -> bool {
        match self.shared.config.rep_mode {
            ReplicationMode::Chain => e >= self.info.history.same_since,
            ReplicationMode::Primary | ReplicationMode::Splay => {
                e >= self.info.history.same_primary_since
                    && e >= self.info.history.same_acker_since
            }
        }
    }

    // ==================== entry ====================

    /// Route one message into this PG and run any ops it woke.
    pub fn dispatch(&mut self, from: Entity, msg: Message) {
        self.handle_message(from, msg);
        self.drain_wakeups();
    }

    fn handle_message(&mut self, from: Entity, msg: Message) {
        match msg {
            Message::Op(op) => match op.kind {
                OpKind::Read => self.op_read(from, op),
                OpKind::Stat => self.op_stat(from, op),
                OpKind::Pull => self.op_pull(from, op),
                OpKind::Push => self.op_push(from, op),
                k if k.is_modify() => {
                    if from.is_osd() {
                        self.op_rep_modify(from, op);
                    } else {
                        self.op_modify(from, op);
                    }
                }
                k => warn!("unhandled op kind {k}"),
            },
            Message::Reply(reply) => self.op_reply(from, reply),
        }
    }

    pub(crate) fn drain_wakeups(&mut self) {
        while !self.wakeups.is_empty() {
            let batch = std::mem::take(&mut self.wakeups);
            for (from, msg) in batch {
                self.handle_message(from, msg);
            }
        }
    }

    // ==================== reads ====================

    fn op_read(&mut self, from: Entity, op: OsdOp) {
        if !self.same_for_read_since(op.epoch) || !self.is_acker() {
            debug!("op_read {} from stale epoch {}", op, op.epoch);
            let reply = OpReply::to_op(&op, OpResult::StaleEpoch, self.shared.epoch(), true);
            self.shared.messenger.send_reply(from, reply);
            return;
        }
        if self.missing.is_missing(op.oid) {
            self.wait_for_missing_object(from, op);
            return;
        }

        let oid = if op.oid.is_head() {
            op.oid
        } else {
            match self.resolve_object_rev(op.oid) {
                Some(o) => o,
                None => {
                    // no stored revision satisfies this request
                    let reply =
                        OpReply::to_op(&op, OpResult::NoSuchRevision, self.shared.epoch(), true);
                    self.shared.messenger.send_reply(from, reply);
                    return;
                }
            }
        };

        let mut reply = OpReply::to_op(&op, OpResult::Ok, self.shared.epoch(), true);
        match self.shared.store.read(oid, op.offset, op.length) {
            Ok(data) => {
                debug!("op_read got {} / {} bytes from {}", data.len(), op.length, oid);
                reply.length = data.len() as u64;
                reply.data = data;
            }
            Err(e) => {
                debug!("op_read {}: {}", oid, e);
                reply.result = OpResult::NoSuchObject;
            }
        }
        self.shared.messenger.send_reply(from, reply);
    }

    fn op_stat(&mut self, from: Entity, op: OsdOp) {
        if !self.same_for_read_since(op.epoch) || !self.is_acker() {
            let reply = OpReply::to_op(&op, OpResult::StaleEpoch, self.shared.epoch(), true);
            self.shared.messenger.send_reply(from, reply);
            return;
        }
        if self.missing.is_missing(op.oid) {
            self.wait_for_missing_object(from, op);
            return;
        }

        let oid = if op.oid.is_head() {
            op.oid
        } else {
            match self.resolve_object_rev(op.oid) {
                Some(o) => o,
                None => {
                    let reply =
                        OpReply::to_op(&op, OpResult::NoSuchRevision, self.shared.epoch(), true);
                    self.shared.messenger.send_reply(from, reply);
                    return;
                }
            }
        };

        let mut reply = OpReply::to_op(&op, OpResult::Ok, self.shared.epoch(), true);
        match self.shared.store.stat(oid) {
            Ok(st) => reply.object_size = Some(st.size),
            Err(_) => reply.result = OpResult::NoSuchObject,
        }
        debug!("op_stat on {} size {:?}", oid, reply.object_size);
        self.shared.messenger.send_reply(from, reply);
    }

    /// Resolve a revision-qualified read. A clone created at revision `r`
    /// snapshots the state before `r`, so the covering object is the
    /// smallest stored clone above the requested revision, else the head.
    fn resolve_object_rev(&self, oid: ObjectId) -> Option<ObjectId> {
        let listed = self.shared.store.collection_list(self.info.pgid).ok()?;
        let clone = listed
            .iter()
            .copied()
            .filter(|o| o.name == oid.name && o.rev > oid.rev)
            .min_by_key(|o| o.rev);
        if clone.is_some() {
            return clone;
        }
        let head = ObjectId::head(oid.name);
        listed.contains(&head).then_some(head)
    }

    // ==================== attrs ====================

    fn stored_crev(&self, oid: ObjectId) -> Rev {
        self.shared
            .store
            .getattr(oid, CREV_ATTR)
            .ok()
            .flatten()
            .and_then(|b| bincode::deserialize(&b).ok())
            .unwrap_or(0)
    }

    fn wrlock_holder(&self, oid: ObjectId) -> Option<Entity> {
        self.shared
            .store
            .getattr(oid, WRLOCK_ATTR)
            .ok()
            .flatten()
            .and_then(|b| bincode::deserialize(&b).ok())
    }

    // ==================== versioner ====================

    /// Stamp `op` with its position in PG history.
    ///
    /// A no-op write keeps `log.top`. Otherwise the next version is
    /// reserved, with one extra slot below it when a clone is implied, and
    /// snapped forward to the op's replay hint so replayed entries land
    /// where they originally did.
    pub(crate) fn assign_version(&self, op: &mut OsdOp, crev: Rev) -> EVersion {
        let mut nv = self.log.top;
        if op.kind != OpKind::WrNoop {
            nv.epoch = self.shared.epoch();
            nv.version += 1;
            debug_assert!(nv > self.info.last_update);
            debug_assert!(nv > self.log.top);

            // will clone?
            if crev != 0 && op.rev != 0 && op.rev > crev {
                nv.version += 1;
            }

            if op.version.version != 0 && nv.version < op.version.version {
                // replay: land where the op originally did
                nv.version = op.version.version;
            }
        }
        op.version = nv;
        nv
    }

    // ==================== modify path ====================

    fn op_modify(&mut self, from: Entity, mut op: OsdOp) {
        if !self.same_for_modify_since(op.epoch) {
            debug!("op_modify {} from stale epoch {}", op, op.epoch);
            let reply = OpReply::to_op(&op, OpResult::StaleEpoch, self.shared.epoch(), true);
            self.shared.messenger.send_reply(from, reply);
            return;
        }
        if op.kind == OpKind::Zero {
            let reply = OpReply::to_op(&op, OpResult::NotImplemented, self.shared.epoch(), true);
            self.shared.messenger.send_reply(from, reply);
            return;
        }
        let oid = op.oid;
        if self.missing.is_missing(oid) {
            self.wait_for_missing_object(from, op);
            return;
        }
        if let Some(holder) = self.wrlock_holder(oid)
            && holder != op.reqid.client
        {
            debug!("op_modify {} waiting for wrlock on {}", op, oid);
            self.waiting_for_wr_unlock
                .entry(oid)
                .or_default()
                .push((from, op));
            return;
        }

        // dup op? coerce to a no-op so the client still gets its replies.
        if self.log.is_dup(op.reqid) {
            warn!("op_modify {} dup op {}, doing wrnoop", op.kind, op.reqid);
            op.kind = OpKind::WrNoop;
        }

        let crev = self.stored_crev(oid);
        let nv = self.assign_version(&mut op, crev);

        // push to any peer that is missing this object, so it can accept
        // the update.
        let lagging: Vec<OsdId> = self
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
        for peer in lagging {
            if let Some(m) = self.peer_missing.get_mut(&peer) {
                m.remove(oid);
            }
            self.push(oid, peer);
        }

        debug!(
            "op_modify {} {} v {} crev {} rev {} {}~{}",
            op.kind, oid, nv, crev, op.rev, op.offset, op.length
        );

        let rep_tid = self.shared.next_tid();
        op.rep_tid = rep_tid;

        let alone = self.acting.len() == 1;
        let mode = self.shared.config.rep_mode;
        match mode {
            ReplicationMode::Chain if !alone => {
                // hand the op to the next hop only
                let next = if self.acting.len() > 2 {
                    self.acting[2]
                } else {
                    self.acting[1]
                };
                self.issue_repop(&op, next);
                let acker = self.acker();
                self.apply_rep_modify(op, acker, crev, false);
            }
            ReplicationMode::Splay if !alone => {
                for peer in self.acting[1..].to_vec() {
                    self.issue_repop(&op, peer);
                }
                let acker = self.acker();
                self.apply_rep_modify(op, acker, crev, false);
            }
            _ => {
                // primary fanout, or alone in any mode: the gather lives here
                if !alone {
                    for peer in self.acting[1..].to_vec() {
                        self.issue_repop(&op, peer);
                    }
                }
                let mut repop = RepGather::new(op, rep_tid, nv, self.info.last_complete);
                self.init_waitsets(&mut repop);
                if repop.op.kind != OpKind::WrNoop {
                    let mut t = Transaction::new();
                    let trim_to = self.peers_complete_thru;
                    self.prepare_log_transaction(&mut t, &repop.op, nv, crev, trim_to);
                    self.prepare_op_transaction(&mut t, &mut repop.op, nv, crev);
                    repop.t = t;
                }
                // local logical ack
                let me = self.whoami();
                repop.waitfor_ack.remove(&me);
                self.register_gather(repop);
                self.eval_repop(rep_tid);
            }
        }
    }

    /// Forward a replicated copy of `op` to `dest`.
    fn issue_repop(&self, op: &OsdOp, dest: OsdId) {
        debug!("issue_repop tid {} o {} to {}", op.rep_tid, op.oid, dest);
        let mut wr = op.clone();
        wr.epoch = self.shared.epoch();
        wr.pg_trim_to = self.peers_complete_thru;
        self.shared.messenger.send_op(dest, wr);
    }

    /// Fill the gather's wait sets for the configured replication mode.
    fn init_waitsets(&self, repop: &mut RepGather) {
        // commits all come to me
        for &osd in &self.acting {
            repop.osds.insert(osd);
            repop.waitfor_commit.insert(osd);
        }
        match self.shared.config.rep_mode {
            ReplicationMode::Chain => {
                // my own ack, plus the rank predecessor's
                let me = self.whoami();
                repop.osds.insert(me);
                repop.waitfor_ack.insert(me);
                repop.waitfor_commit.insert(me);
                if let Some(rank) = self.rank(me)
                    && rank > 0
                {
                    let prev = self.acting[rank - 1];
                    repop.osds.insert(prev);
                    repop.waitfor_ack.insert(prev);
                    repop.waitfor_commit.insert(prev);
                }
            }
            ReplicationMode::Primary | ReplicationMode::Splay => {
                // every peer acks to me
                for &osd in &self.acting {
                    repop.waitfor_ack.insert(osd);
                }
            }
        }
    }

    fn register_gather(&mut self, repop: RepGather) {
        let rep_tid = repop.rep_tid;
        debug!("new repop {}", repop);
        self.rep_gather.insert(rep_tid, repop);
        // replay replies that raced ahead of the op
        if let Some(waiters) = self.waiting_for_repop.remove(&rep_tid) {
            self.wakeups
                .extend(waiters.into_iter().map(|(f, r)| (f, Message::Reply(r))));
        }
    }

    /// Re-evaluate a gather after any state change: send the commit once
    /// every peer has committed, apply and ack once every peer has acked,
    /// and destroy the gather when nothing remains outstanding.
    fn eval_repop(&mut self, rep_tid: Tid) {
        let epoch = self.shared.epoch();
        let Some(repop) = self.rep_gather.get_mut(&rep_tid) else {
            return;
        };

        if repop.can_send_commit() && repop.op.wants_commit {
            let mut reply = OpReply::to_op(&repop.op, OpResult::Ok, epoch, true);
            reply.pg_complete_thru = self.peers_complete_thru;
            if !repop.pg_complete_thru.is_empty() {
                let mut min = self.info.last_complete;
                for peer in &self.acting {
                    let v = repop
                        .pg_complete_thru
                        .get(peer)
                        .copied()
                        .unwrap_or(EVersion::ZERO);
                    if v < min {
                        min = v;
                    }
                }
                if min > reply.pg_complete_thru {
                    reply.pg_complete_thru = min;
                }
            }
            debug!("eval_repop sending commit on {}", repop);
            self.shared.messenger.send_reply(repop.op.reqid.client, reply);
            repop.sent_commit = true;
        } else if repop.waitfor_ack.is_empty() {
            if !repop.applied {
                debug!("eval_repop applying update on {}", repop);
                let t = std::mem::take(&mut repop.t);
                let lc = repop.pg_local_last_complete;
                let weak = self.self_ref.clone();
                let on_commit: CommitFn = Box::new(move || {
                    if let Some(pg) = weak.upgrade() {
                        pg.lock().on_local_commit(rep_tid, lc);
                    }
                });
                // a transaction failure at this layer means the pg is corrupt
                self.shared
                    .store
                    .apply_transaction(t, Some(on_commit))
                    .expect("pg transaction apply failed");
                repop.applied = true;
            }
            if repop.op.wants_ack && !repop.sent_ack {
                let reply = OpReply::to_op(&repop.op, OpResult::Ok, epoch, false);
                debug!("eval_repop sending ack on {}", repop);
                self.shared.messenger.send_reply(repop.op.reqid.client, reply);
                repop.sent_ack = true;
                self.shared.stats.record_client_write(repop.start.elapsed());
            }
        }

        if repop.can_delete() {
            // adjust peers_complete_thru; unheard peers count as zero, so
            // the floor cannot advance until every peer has reported.
            if !repop.pg_complete_thru.is_empty() {
                let mut min = self.info.last_complete;
                for peer in &self.acting {
                    let v = repop
                        .pg_complete_thru
                        .get(peer)
                        .copied()
                        .unwrap_or(EVersion::ZERO);
                    if v < min {
                        min = v;
                    }
                }
                if min > self.peers_complete_thru {
                    debug!(
                        "eval_repop peers_complete_thru {} -> {}",
                        self.peers_complete_thru, min
                    );
                    self.peers_complete_thru = min;
                }
            }
            debug!("eval_repop deleting {}", repop);
            self.rep_gather.remove(&rep_tid);
        }
    }

    /// Fold one peer reply into its gather.
    fn repop_ack(
        &mut self,
        rep_tid: Tid,
        result: OpResult,
        commit: bool,
        fromosd: OsdId,
        pg_complete_thru: EVersion,
    ) {
        let Some(repop) = self.rep_gather.get_mut(&rep_tid) else {
            return;
        };
        debug!(
            "repop_ack tid {} result {:?} commit {} from {}",
            rep_tid, result, commit, fromosd
        );
        if commit {
            repop.waitfor_commit.remove(&fromosd);
            repop.waitfor_ack.remove(&fromosd);
            repop.pg_complete_thru.insert(fromosd, pg_complete_thru);
        } else {
            repop.waitfor_ack.remove(&fromosd);
        }
        self.eval_repop(rep_tid);
    }

    /// Store commit callback for a gather's local transaction. Runs on
    /// the store's callback thread, after re-acquiring the PG lock.
    pub fn on_local_commit(&mut self, rep_tid: Tid, last_complete: EVersion) {
        let me = self.whoami();
        if let Some(repop) = self.rep_gather.get_mut(&rep_tid) {
            debug!("op_modify_commit on {}", repop);
            repop.waitfor_commit.remove(&me);
            repop.pg_complete_thru.insert(me, last_complete);
        } else {
            debug!("op_modify_commit tid {} dne", rep_tid);
        }
        self.eval_repop(rep_tid);
        self.drain_wakeups();
    }

    // ==================== replica side ====================

    fn op_rep_modify(&mut self, from: Entity, op: OsdOp) {
        if !self.same_for_rep_modify_since(op.epoch) {
            debug!("op_rep_modify {} from stale epoch {}, dropping", op, op.epoch);
            return;
        }
        let oid = op.oid;
        let nv = op.version;
        // we had better not be missing this; the primary pushes first
        debug_assert!(!self.missing.is_missing(oid));
        if self.missing.is_missing(oid) {
            warn!("op_rep_modify {} but {} is missing, dropping", op, oid);
            return;
        }
        let crev = self.stored_crev(oid);
        debug!(
            "op_rep_modify {} {} v {} {}~{}",
            op.kind, oid, nv, op.offset, op.length
        );
        self.shared.stats.record_replica_write(op.length);

        let mode = self.shared.config.rep_mode;
        let mut ackerosd = self.primary();
        let mut gather_here = false;
        if mode.has_distinct_acker() {
            ackerosd = self.acker();
            gather_here = self.is_acker();

            if mode == ReplicationMode::Chain
                && !gather_here
                && let Some(rank) = self.rank(self.whoami())
            {
                // not at the tail yet; pass it on, wrapping back past the
                // primary
                let mut next = rank + 1;
                if next == self.acting.len() {
                    next = 1;
                }
                let dest = self.acting[next];
                self.issue_repop(&op, dest);
            }
        }

        if gather_here {
            let rep_tid = op.rep_tid;
            if !self.rep_gather.contains_key(&rep_tid) {
                let mut repop = RepGather::new(op, rep_tid, nv, self.info.last_complete);
                self.init_waitsets(&mut repop);
                if repop.op.kind != OpKind::WrNoop {
                    let mut t = Transaction::new();
                    let trim_to = repop.op.pg_trim_to;
                    self.prepare_log_transaction(&mut t, &repop.op, nv, crev, trim_to);
                    self.prepare_op_transaction(&mut t, &mut repop.op, nv, crev);
                    repop.t = t;
                }
                self.register_gather(repop);
            }
            let me = self.whoami();
            if let Some(repop) = self.rep_gather.get_mut(&rep_tid) {
                // ack inferred from the message source, plus my own
                if let Some(fromosd) = from.osd() {
                    repop.waitfor_ack.remove(&fromosd);
                }
                repop.waitfor_ack.remove(&me);
            }
            self.eval_repop(rep_tid);
        } else {
            // middle hop or plain replica; chain peers skip the explicit
            // ack (the next hop's source infers it)
            let send_ack = mode != ReplicationMode::Chain;
            self.apply_rep_modify(op, ackerosd, crev, send_ack);
        }
    }

    /// Apply a replicated modify locally and arrange for the commit to
    /// reach the acker once the op is both acknowledged and durable.
    fn apply_rep_modify(&mut self, mut op: OsdOp, ackerosd: OsdId, crev: Rev, send_ack: bool) {
        let nv = op.version;
        let rep_tid = op.rep_tid;
        let mut t = Transaction::new();
        if op.kind != OpKind::WrNoop {
            let trim_to = op.pg_trim_to;
            self.prepare_log_transaction(&mut t, &op, nv, crev, trim_to);
            self.prepare_op_transaction(&mut t, &mut op, nv, crev);
        }

        // post-update snapshot, reported back with the commit
        let last_complete = self.info.last_complete;
        self.rep_modify_pending.insert(
            rep_tid,
            RepModify {
                op,
                ackerosd,
                last_complete,
                acked: false,
                committed: false,
            },
        );

        let weak = self.self_ref.clone();
        let on_commit: CommitFn = Box::new(move || {
            if let Some(pg) = weak.upgrade() {
                pg.lock().on_replica_commit(rep_tid);
            }
        });
        // a transaction failure at this layer means the pg is corrupt
        self.shared
            .store
            .apply_transaction(t, Some(on_commit))
            .expect("pg transaction apply failed");

        if send_ack {
            if let Some(pending) = self.rep_modify_pending.get(&rep_tid) {
                let ack = OpReply::to_op(&pending.op, OpResult::Ok, self.shared.epoch(), false);
                self.shared
                    .messenger
                    .send_reply(Entity::Osd(ackerosd), ack);
            }
        }
        self.rep_modify_ack(rep_tid);
    }

    fn rep_modify_ack(&mut self, rep_tid: Tid) {
        if let Some(pending) = self.rep_modify_pending.get_mut(&rep_tid) {
            pending.acked = true;
        }
        self.maybe_send_rep_commit(rep_tid);
    }

    /// Store commit callback for a replica-side transaction.
    pub fn on_replica_commit(&mut self, rep_tid: Tid) {
        if let Some(pending) = self.rep_modify_pending.get_mut(&rep_tid) {
            pending.committed = true;
        } else {
            debug!("on_replica_commit tid {} dne", rep_tid);
        }
        self.maybe_send_rep_commit(rep_tid);
        self.drain_wakeups();
    }

    fn maybe_send_rep_commit(&mut self, rep_tid: Tid) {
        let ready = self
            .rep_modify_pending
            .get(&rep_tid)
            .is_some_and(|p| p.acked && p.committed);
        if !ready {
            return;
        }
        let Some(pending) = self.rep_modify_pending.remove(&rep_tid) else {
            return;
        };
        debug!(
            "rep_modify_commit on {}, sending commit to {}",
            pending.op, pending.ackerosd
        );
        let mut commit = OpReply::to_op(&pending.op, OpResult::Ok, self.shared.epoch(), true);
        commit.pg_complete_thru = pending.last_complete;
        self.shared
            .messenger
            .send_reply(Entity::Osd(pending.ackerosd), commit);
    }

    // ==================== replies ====================

    fn op_reply(&mut self, from: Entity, reply: OpReply) {
        let rep_tid = reply.rep_tid;
        if self.rep_gather.contains_key(&rep_tid) {
            let Some(fromosd) = from.osd() else {
                return;
            };
            self.repop_ack(
                rep_tid,
                reply.result,
                reply.commit,
                fromosd,
                reply.pg_complete_thru,
            );
        } else {
            // early reply; park it until the op builds its gather
            debug!("op_reply tid {} early, parking", rep_tid);
            self.waiting_for_repop
                .entry(rep_tid)
                .or_default()
                .push((from, reply));
        }
    }
}
