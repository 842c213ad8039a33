//! Shared helpers for integration tests: an in-process cluster with a
//! queueing loopback messenger and deferred store commits, so tests can
//! interleave peer traffic and durability notifications deterministically.

use bytes::Bytes;
use parking_lot::Mutex;
use replio_common::{
    ClientId, Entity, Epoch, EVersion, ObjectId, ObjectName, OsdId, PgConfig, PgId,
    ReplicationMode, ReqId,
};
use replio_pg::info::History;
use replio_pg::{Message, Messenger, OpKind, OpReply, Osd, OsdOp};
use replio_store::{CommitMode, MemStore};
use std::collections::VecDeque;
use std::sync::Arc;

pub const PGID: PgId = PgId::new(1);
pub const EPOCH: Epoch = 1;

type Envelope = (Entity, Entity, Message);

/// Messenger that parks every send on the cluster queue.
struct QueueMessenger {
    from: Entity,
    queue: Arc<Mutex<VecDeque<Envelope>>>,
}

impl Messenger for QueueMessenger {
    fn send_op(&self, to: OsdId, op: OsdOp) {
        self.queue
            .lock()
            .push_back((self.from, Entity::Osd(to), Message::Op(op)));
    }

    fn send_reply(&self, to: Entity, reply: OpReply) {
        self.queue
            .lock()
            .push_back((self.from, to, Message::Reply(reply)));
    }
}

/// An in-process cluster of OSDs sharing one message queue.
pub struct Cluster {
    queue: Arc<Mutex<VecDeque<Envelope>>>,
    osds: Vec<(OsdId, Osd, Arc<MemStore>)>,
    client_replies: Mutex<Vec<(Entity, OpReply)>>,
}

impl Cluster {
    /// `n` OSDs (ids 0..n), all using `mode`, with deferred store commits
    pub fn new(n: u32, mode: ReplicationMode) -> Self {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let mut osds = Vec::new();
        for id in 0..n {
            let whoami = OsdId::new(id);
            let store = Arc::new(MemStore::new(CommitMode::Deferred));
            let messenger = Arc::new(QueueMessenger {
                from: Entity::Osd(whoami),
                queue: queue.clone(),
            });
            let osd = Osd::new(whoami, PgConfig::with_mode(mode), store.clone(), messenger);
            osd.set_epoch(EPOCH);
            osds.push((whoami, osd, store));
        }
        Self {
            queue,
            osds,
            client_replies: Mutex::new(Vec::new()),
        }
    }

    /// Create the test PG on every member of `acting`
    pub fn create_pg(&self, acting: &[OsdId]) {
        for &id in acting {
            self.osd(id)
                .create_pg(PGID, acting.to_vec(), History::default())
                .unwrap();
        }
    }

    pub fn osd(&self, id: OsdId) -> &Osd {
        &self.osds.iter().find(|(i, _, _)| *i == id).unwrap().1
    }

    pub fn store(&self, id: OsdId) -> &Arc<MemStore> {
        &self.osds.iter().find(|(i, _, _)| *i == id).unwrap().2
    }

    /// Inject a message addressed to `to`
    pub fn send(&self, from: Entity, to: OsdId, msg: Message) {
        self.queue
            .lock()
            .push_back((from, Entity::Osd(to), msg));
    }

    /// Deliver queued messages until the queue is empty. Client replies
    /// are collected rather than delivered.
    pub fn pump(&self) {
        loop {
            let Some((from, to, msg)) = self.queue.lock().pop_front() else {
                break;
            };
            match to {
                Entity::Osd(id) => {
                    self.osd(id).handle_message(from, msg).unwrap();
                }
                Entity::Client(_) => {
                    if let Message::Reply(reply) = msg {
                        self.client_replies.lock().push((to, reply));
                    }
                }
            }
        }
    }

    /// Run one OSD's parked commit callbacks, then deliver the traffic
    /// they generated
    pub fn commit_on(&self, id: OsdId) {
        self.store(id).drain_commits();
        self.pump();
    }

    /// Pump and drain commits everywhere until the cluster goes quiet
    pub fn settle(&self) {
        loop {
            self.pump();
            let drained: usize = self.osds.iter().map(|(_, _, s)| s.drain_commits()).sum();
            if drained == 0 && self.queue.lock().is_empty() {
                break;
            }
        }
    }

    /// Replies delivered to `client` so far, in order; leaves them in place
    pub fn replies_for(&self, client: Entity) -> Vec<OpReply> {
        self.client_replies
            .lock()
            .iter()
            .filter(|(to, _)| *to == client)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

/// A test client identity
pub fn client() -> Entity {
    Entity::Client(ClientId::new())
}

pub fn oid(name: u64) -> ObjectId {
    ObjectId::head(ObjectName::new(name))
}

/// A write of `data` to `target` at offset 0
pub fn write_op(from: Entity, tid: u64, target: ObjectId, data: &[u8]) -> OsdOp {
    let mut op = OsdOp::new(ReqId::new(from, 0, tid), OpKind::Write, target, PGID, EPOCH);
    op.length = data.len() as u64;
    op.data = Bytes::copy_from_slice(data);
    op
}

/// A read of `len` bytes at offset 0
pub fn read_op(from: Entity, tid: u64, target: ObjectId, len: u64) -> OsdOp {
    let mut op = OsdOp::new(ReqId::new(from, 0, tid), OpKind::Read, target, PGID, EPOCH);
    op.length = len;
    op
}

/// Decode the version attribute a store holds for an object
pub fn stored_version(store: &MemStore, target: ObjectId) -> Option<EVersion> {
    use replio_store::ObjectStore;
    store
        .getattr(target, "version")
        .unwrap()
        .map(|b| bincode::deserialize(&b).unwrap())
}

/// Assert the completeness-floor invariant on one PG
pub fn assert_completeness_floor(osd: &Osd) {
    let pg = osd.pg(PGID).unwrap();
    let pg = pg.lock();
    let info = pg.info();
    assert!(
        info.last_complete <= info.last_update,
        "last_complete {} > last_update {}",
        info.last_complete,
        info.last_update
    );
    assert!(
        info.last_update <= pg.log().top,
        "last_update {} > log top {}",
        info.last_update,
        pg.log().top
    );
}
