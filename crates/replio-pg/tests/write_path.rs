//! Write-path integration tests: single-node and fanout writes, duplicate
//! request coercion, revision clones, write locks, epoch fencing, and log
//! trimming.

mod common;

use common::*;
use replio_common::{EVersion, ObjectId, ObjectName, OsdId, ReplicationMode, ReqId};
use replio_pg::{OpKind, OpResult, OsdOp};
use replio_store::ObjectStore;

#[test]
fn test_single_peer_write() {
    let cluster = Cluster::new(1, ReplicationMode::Primary);
    let a = OsdId::new(0);
    cluster.create_pg(&[a]);

    let c = client();
    let data = vec![7u8; 1024];
    cluster.send(c, a, replio_pg::Message::Op(write_op(c, 1, oid(1), &data)));
    cluster.pump();

    // applied and acked, not yet durable
    let replies = cluster.replies_for(c);
    assert_eq!(replies.len(), 1);
    assert!(!replies[0].commit);
    assert!(replies[0].result.is_ok());

    cluster.commit_on(a);
    let replies = cluster.replies_for(c);
    assert_eq!(replies.len(), 2);
    assert!(replies[1].commit);
    assert!(replies[1].result.is_ok());

    let pg = cluster.osd(a).pg(PGID).unwrap();
    {
        let pg = pg.lock();
        assert_eq!(pg.log().top, EVersion::new(EPOCH, 1));
        assert_eq!(pg.info().last_update, EVersion::new(EPOCH, 1));
        assert_eq!(pg.info().last_complete, EVersion::new(EPOCH, 1));
        assert_eq!(pg.in_flight_gathers(), 0);
    }
    assert_completeness_floor(cluster.osd(a));

    let store = cluster.store(a);
    assert_eq!(store.stat(oid(1)).unwrap().size, 1024);
    assert_eq!(stored_version(store, oid(1)), Some(EVersion::new(EPOCH, 1)));
}

#[test]
fn test_fanout_three_way_write() {
    let cluster = Cluster::new(3, ReplicationMode::Primary);
    let (a, b, c_osd) = (OsdId::new(0), OsdId::new(1), OsdId::new(2));
    cluster.create_pg(&[a, b, c_osd]);

    let c = client();
    cluster.send(c, a, replio_pg::Message::Op(write_op(c, 1, oid(1), b"abc")));
    cluster.pump();

    // replicas acked; the client has its ack but no commit yet
    let replies = cluster.replies_for(c);
    assert_eq!(replies.len(), 1);
    assert!(!replies[0].commit);

    // replica commits alone don't complete the gather
    cluster.commit_on(b);
    cluster.commit_on(c_osd);
    assert_eq!(cluster.replies_for(c).len(), 1);

    // the primary's own durability completes it
    cluster.commit_on(a);
    let replies = cluster.replies_for(c);
    assert_eq!(replies.len(), 2);
    assert!(replies[1].commit);

    // every replica applied the bytes
    for id in [a, b, c_osd] {
        assert_eq!(
            cluster.store(id).read(oid(1), 0, 0).unwrap(),
            &b"abc"[..],
            "object mismatch on {id}"
        );
        assert_completeness_floor(cluster.osd(id));
    }
    let pg = cluster.osd(a).pg(PGID).unwrap();
    assert_eq!(pg.lock().in_flight_gathers(), 0);
}

#[test]
fn test_ack_never_follows_commit() {
    let cluster = Cluster::new(3, ReplicationMode::Primary);
    let acting: Vec<OsdId> = (0..3).map(OsdId::new).collect();
    cluster.create_pg(&acting);

    let c = client();
    for tid in 1..=3 {
        cluster.send(
            c,
            acting[0],
            replio_pg::Message::Op(write_op(c, tid, oid(tid), b"x")),
        );
    }
    cluster.settle();

    let replies = cluster.replies_for(c);
    // exactly one ack and one commit per op, ack first
    for tid in 1..=3u64 {
        let for_op: Vec<_> = replies.iter().filter(|r| r.reqid.tid == tid).collect();
        assert_eq!(for_op.len(), 2, "op {tid}");
        assert!(!for_op[0].commit, "op {tid} ack first");
        assert!(for_op[1].commit, "op {tid} commit second");
    }
}

#[test]
fn test_log_versions_strictly_increase() {
    let cluster = Cluster::new(2, ReplicationMode::Primary);
    let acting: Vec<OsdId> = (0..2).map(OsdId::new).collect();
    cluster.create_pg(&acting);

    let c = client();
    for tid in 1..=5 {
        cluster.send(
            c,
            acting[0],
            replio_pg::Message::Op(write_op(c, tid, oid(tid % 2), b"v")),
        );
        cluster.settle();
    }

    for id in &acting {
        let pg = cluster.osd(*id).pg(PGID).unwrap();
        let pg = pg.lock();
        let versions: Vec<EVersion> = pg.log().entries().map(|e| e.version).collect();
        assert!(
            versions.windows(2).all(|w| w[0] < w[1]),
            "log not strictly increasing on {id}: {versions:?}"
        );
    }
}

#[test]
fn test_duplicate_reqid_coerced_to_noop() {
    let cluster = Cluster::new(1, ReplicationMode::Primary);
    let a = OsdId::new(0);
    cluster.create_pg(&[a]);

    let c = client();
    cluster.send(c, a, replio_pg::Message::Op(write_op(c, 1, oid(1), b"first")));
    cluster.settle();
    assert_eq!(cluster.replies_for(c).len(), 2);

    let log_len = cluster.osd(a).pg(PGID).unwrap().lock().log().len();
    let top = cluster.osd(a).pg(PGID).unwrap().lock().log().top;

    // the same reqid again, as a client replay would send it
    let mut replay = write_op(c, 1, oid(1), b"second");
    replay.version = EVersion::new(EPOCH, 1);
    cluster.send(c, a, replio_pg::Message::Op(replay));
    cluster.settle();

    // the client still gets ack and commit
    let replies = cluster.replies_for(c);
    assert_eq!(replies.len(), 4);
    assert!(replies[2..].iter().all(|r| r.result.is_ok()));

    // but nothing changed: no new log entry, no new version, same bytes
    let pg = cluster.osd(a).pg(PGID).unwrap();
    assert_eq!(pg.lock().log().len(), log_len);
    assert_eq!(pg.lock().log().top, top);
    assert_eq!(cluster.store(a).read(oid(1), 0, 0).unwrap(), &b"first"[..]);
}

#[test]
fn test_revision_clone_on_bump() {
    let cluster = Cluster::new(1, ReplicationMode::Primary);
    let a = OsdId::new(0);
    cluster.create_pg(&[a]);
    let z = oid(1);

    let c = client();
    // create the object at rev 3
    let mut first = write_op(c, 1, z, b"old contents");
    first.rev = 3;
    cluster.send(c, a, replio_pg::Message::Op(first));
    cluster.settle();

    // writing at rev 5 implies a clone of the pre-5 state
    let mut second = write_op(c, 2, z, b"new contents");
    second.rev = 5;
    cluster.send(c, a, replio_pg::Message::Op(second));
    cluster.settle();

    let pg = cluster.osd(a).pg(PGID).unwrap();
    {
        let pg = pg.lock();
        let entries: Vec<_> = pg.log().entries().copied().collect();
        assert_eq!(entries.len(), 3);
        // clone entry immediately precedes the mutation, one version below
        assert_eq!(entries[1].kind, replio_pg::EntryKind::Clone);
        assert_eq!(entries[2].kind, replio_pg::EntryKind::Modify);
        assert_eq!(entries[1].version.version + 1, entries[2].version.version);
    }

    let store = cluster.store(a);
    let clone_oid = ObjectId::with_rev(ObjectName::new(1), 5);
    assert_eq!(store.read(clone_oid, 0, 0).unwrap(), &b"old contents"[..]);
    assert_eq!(store.read(z, 0, 0).unwrap(), &b"new contents"[..]);
    let crev: u32 = bincode::deserialize(&store.getattr(z, "crev").unwrap().unwrap()).unwrap();
    assert_eq!(crev, 5);
}

#[test]
fn test_read_resolves_revision() {
    let cluster = Cluster::new(1, ReplicationMode::Primary);
    let a = OsdId::new(0);
    cluster.create_pg(&[a]);
    let z = oid(1);

    let c = client();
    let mut first = write_op(c, 1, z, b"old");
    first.rev = 3;
    cluster.send(c, a, replio_pg::Message::Op(first));
    let mut second = write_op(c, 2, z, b"new");
    second.rev = 5;
    cluster.send(c, a, replio_pg::Message::Op(second));
    cluster.settle();

    // rev 4 predates the bump to 5, so it reads the clone
    let rev4 = ObjectId::with_rev(ObjectName::new(1), 4);
    cluster.send(c, a, replio_pg::Message::Op(read_op(c, 3, rev4, 0)));
    cluster.pump();
    let replies = cluster.replies_for(c);
    let last = replies.last().unwrap();
    assert!(last.result.is_ok());
    assert_eq!(last.data, &b"old"[..]);

    // a revision of a name that holds nothing fails
    let ghost = ObjectId::with_rev(ObjectName::new(9), 2);
    cluster.send(c, a, replio_pg::Message::Op(read_op(c, 4, ghost, 0)));
    cluster.pump();
    let replies = cluster.replies_for(c);
    assert_eq!(replies.last().unwrap().result, OpResult::NoSuchRevision);
}

#[test]
fn test_wrlock_parks_other_writers() {
    let cluster = Cluster::new(1, ReplicationMode::Primary);
    let a = OsdId::new(0);
    cluster.create_pg(&[a]);
    let x = oid(1);

    let holder = client();
    let other = client();

    cluster.send(holder, a, replio_pg::Message::Op(write_op(holder, 1, x, b"base")));
    cluster.settle();

    let lock = OsdOp::new(ReqId::new(holder, 0, 2), OpKind::WrLock, x, PGID, EPOCH);
    cluster.send(holder, a, replio_pg::Message::Op(lock));
    cluster.settle();

    // another client's write parks on the lock
    cluster.send(other, a, replio_pg::Message::Op(write_op(other, 1, x, b"blocked")));
    cluster.settle();
    assert!(cluster.replies_for(other).is_empty());
    assert_eq!(cluster.store(a).read(x, 0, 0).unwrap(), &b"base"[..]);

    // the unlock wakes it
    let unlock = OsdOp::new(ReqId::new(holder, 0, 3), OpKind::WrUnlock, x, PGID, EPOCH);
    cluster.send(holder, a, replio_pg::Message::Op(unlock));
    cluster.settle();

    let replies = cluster.replies_for(other);
    assert_eq!(replies.len(), 2);
    assert_eq!(cluster.store(a).read(x, 0, 0).unwrap(), &b"blocked"[..]);
}

#[test]
fn test_stale_epoch_rejected() {
    let cluster = Cluster::new(1, ReplicationMode::Primary);
    let a = OsdId::new(0);
    cluster.create_pg(&[a]);
    {
        let pg = cluster.osd(a).pg(PGID).unwrap();
        let mut pg = pg.lock();
        pg.info_mut().history.same_primary_since = 5;
        pg.info_mut().history.same_acker_since = 5;
    }

    let c = client();
    // epoch 1 predates the membership change at 5
    cluster.send(c, a, replio_pg::Message::Op(write_op(c, 1, oid(1), b"x")));
    cluster.send(c, a, replio_pg::Message::Op(read_op(c, 2, oid(1), 0)));
    cluster.settle();

    let replies = cluster.replies_for(c);
    assert_eq!(replies.len(), 2);
    assert!(replies.iter().all(|r| r.result == OpResult::StaleEpoch));
    assert!(cluster.osd(a).pg(PGID).unwrap().lock().log().is_empty());
}

#[test]
fn test_zero_is_unimplemented() {
    let cluster = Cluster::new(1, ReplicationMode::Primary);
    let a = OsdId::new(0);
    cluster.create_pg(&[a]);

    let c = client();
    let zero = OsdOp::new(ReqId::new(c, 0, 1), OpKind::Zero, oid(1), PGID, EPOCH);
    cluster.send(c, a, replio_pg::Message::Op(zero));
    cluster.settle();

    let replies = cluster.replies_for(c);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].result, OpResult::NotImplemented);
}

#[test]
fn test_log_trims_to_peer_floor() {
    let cluster = Cluster::new(2, ReplicationMode::Primary);
    let acting: Vec<OsdId> = (0..2).map(OsdId::new).collect();
    cluster.create_pg(&acting);

    let c = client();
    for tid in 1..=4 {
        cluster.send(
            c,
            acting[0],
            replio_pg::Message::Op(write_op(c, tid, oid(tid), b"d")),
        );
        cluster.settle();
    }

    let pg = cluster.osd(acting[0]).pg(PGID).unwrap();
    let pg = pg.lock();
    // the floor trails the local snapshot by one op, and the log has been
    // trimmed up to it
    assert!(pg.peers_complete_thru() >= EVersion::new(EPOCH, 1));
    assert!(pg.log().bottom >= EVersion::new(EPOCH, 1));
    assert!(pg.log().len() < 4);
}
