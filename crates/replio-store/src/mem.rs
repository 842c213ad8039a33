//! In-memory object store
//!
//! A complete `ObjectStore` implementation backed by plain maps. Commit
//! callbacks are either handed to a background worker thread (the
//! production-shaped default) or parked until `drain_commits` so tests can
//! interleave durability notifications with peer traffic in any order.

use crate::transaction::{Transaction, TxOp};
use crate::{CommitFn, ObjectStat, ObjectStore};
use bytes::Bytes;
use parking_lot::Mutex;
use replio_common::{EVersion, Error, ObjectId, PgId, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, trace};

/// How commit callbacks are delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitMode {
    /// A worker thread runs callbacks as transactions land.
    Background,
    /// Callbacks queue until `drain_commits` is called.
    Deferred,
}

#[derive(Clone, Debug, Default)]
struct Object {
    data: Vec<u8>,
    attrs: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct Collection {
    objects: BTreeSet<ObjectId>,
    attrs: BTreeMap<String, Vec<u8>>,
    log: Vec<Vec<u8>>,
    log_trim_to: EVersion,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectId, Object>,
    collections: HashMap<PgId, Collection>,
    dup_collection_adds: u64,
}

/// In-memory object store with asynchronous commit callbacks.
pub struct MemStore {
    inner: Mutex<Inner>,
    mode: CommitMode,
    deferred: Mutex<Vec<CommitFn>>,
    sender: Mutex<Option<mpsc::Sender<CommitFn>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MemStore {
    /// Create a store with the given commit delivery mode
    #[must_use]
    pub fn new(mode: CommitMode) -> Self {
        let (sender, worker) = match mode {
            CommitMode::Background => {
                let (tx, rx) = mpsc::channel::<CommitFn>();
                let handle = thread::Builder::new()
                    .name("memstore-commit".into())
                    .spawn(move || {
                        while let Ok(cb) = rx.recv() {
                            cb();
                        }
                    })
                    .expect("spawn commit worker");
                (Some(tx), Some(handle))
            }
            CommitMode::Deferred => (None, None),
        };
        Self {
            inner: Mutex::new(Inner::default()),
            mode,
            deferred: Mutex::new(Vec::new()),
            sender: Mutex::new(sender),
            worker: Mutex::new(worker),
        }
    }

    /// Run all parked commit callbacks (`Deferred` mode). Returns how many
    /// ran. Callbacks queued while draining run on the next call.
    pub fn drain_commits(&self) -> usize {
        let pending = std::mem::take(&mut *self.deferred.lock());
        let n = pending.len();
        for cb in pending {
            cb();
        }
        n
    }

    /// Number of commit callbacks currently parked (`Deferred` mode)
    #[must_use]
    pub fn pending_commits(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Wait until every commit callback queued so far has run
    /// (`Background` mode).
    pub fn flush(&self) {
        let Some(tx) = self.sender.lock().clone() else {
            return;
        };
        let (done_tx, done_rx) = mpsc::channel();
        let sent = tx.send(Box::new(move || {
            let _ = done_tx.send(());
        }));
        if sent.is_ok() {
            let _ = done_rx.recv();
        }
    }

    /// Serialized log entries appended for a collection, oldest first
    #[must_use]
    pub fn log_entries(&self, cid: PgId) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .collections
            .get(&cid)
            .map(|c| c.log.clone())
            .unwrap_or_default()
    }

    /// The highest trim point recorded for a collection's log
    #[must_use]
    pub fn log_trim_to(&self, cid: PgId) -> EVersion {
        self.inner
            .lock()
            .collections
            .get(&cid)
            .map(|c| c.log_trim_to)
            .unwrap_or(EVersion::ZERO)
    }

    /// How many benign duplicate `collection_add` ops were absorbed
    #[must_use]
    pub fn dup_collection_adds(&self) -> u64 {
        self.inner.lock().dup_collection_adds
    }

    fn deliver(&self, cb: CommitFn) {
        match self.mode {
            CommitMode::Deferred => self.deferred.lock().push(cb),
            CommitMode::Background => {
                let sender = self.sender.lock();
                if let Some(tx) = sender.as_ref() {
                    let _ = tx.send(cb);
                }
            }
        }
    }

    /// A clone source must exist by the time the clone op runs; everything
    /// else in a transaction is infallible, so this one check up front
    /// keeps application atomic.
    fn validate(inner: &Inner, t: &Transaction) -> Result<()> {
        let mut created: HashSet<ObjectId> = HashSet::new();
        for op in t.ops() {
            match op {
                TxOp::Write { oid, .. } | TxOp::Truncate { oid, .. } => {
                    created.insert(*oid);
                }
                TxOp::Remove { oid } => {
                    created.remove(oid);
                }
                TxOp::Clone { oid, noid } => {
                    if !created.contains(oid) && !inner.objects.contains_key(oid) {
                        return Err(Error::store(format!("clone source {oid} does not exist")));
                    }
                    created.insert(*noid);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply_op(inner: &mut Inner, op: TxOp) {
        match op {
            TxOp::Write { oid, offset, data } => {
                let obj = inner.objects.entry(oid).or_default();
                let end = offset as usize + data.len();
                if obj.data.len() < end {
                    obj.data.resize(end, 0);
                }
                obj.data[offset as usize..end].copy_from_slice(&data);
            }
            TxOp::Truncate { oid, length } => {
                let obj = inner.objects.entry(oid).or_default();
                obj.data.resize(length as usize, 0);
            }
            TxOp::Remove { oid } => {
                inner.objects.remove(&oid);
            }
            TxOp::Clone { oid, noid } => {
                let src = inner.objects.get(&oid).cloned().unwrap_or_default();
                inner.objects.insert(noid, src);
            }
            TxOp::SetAttr { oid, name, value } => {
                inner.objects.entry(oid).or_default().attrs.insert(name, value);
            }
            TxOp::RmAttr { oid, name } => {
                if let Some(obj) = inner.objects.get_mut(&oid) {
                    obj.attrs.remove(&name);
                }
            }
            TxOp::SetAttrs { oid, attrs } => {
                inner.objects.entry(oid).or_default().attrs = attrs;
            }
            TxOp::CollectionAdd { cid, oid } => {
                let coll = inner.collections.entry(cid).or_default();
                if !coll.objects.insert(oid) {
                    inner.dup_collection_adds += 1;
                    debug!("duplicate collection_add of {oid} to {cid}, ignoring");
                }
            }
            TxOp::CollectionRemove { cid, oid } => {
                if let Some(coll) = inner.collections.get_mut(&cid) {
                    coll.objects.remove(&oid);
                }
            }
            TxOp::CollectionSetAttr { cid, name, value } => {
                inner
                    .collections
                    .entry(cid)
                    .or_default()
                    .attrs
                    .insert(name, value);
            }
            TxOp::LogAppend {
                cid,
                entry,
                trim_to,
            } => {
                let coll = inner.collections.entry(cid).or_default();
                coll.log.push(entry);
                if trim_to > coll.log_trim_to {
                    coll.log_trim_to = trim_to;
                }
            }
        }
    }
}

impl ObjectStore for MemStore {
    fn read(&self, oid: ObjectId, off: u64, len: u64) -> Result<Bytes> {
        let inner = self.inner.lock();
        let obj = inner.objects.get(&oid).ok_or(Error::NoSuchObject(oid))?;
        let start = (off as usize).min(obj.data.len());
        let end = if len == 0 {
            obj.data.len()
        } else {
            (start + len as usize).min(obj.data.len())
        };
        Ok(Bytes::copy_from_slice(&obj.data[start..end]))
    }

    fn stat(&self, oid: ObjectId) -> Result<ObjectStat> {
        let inner = self.inner.lock();
        let obj = inner.objects.get(&oid).ok_or(Error::NoSuchObject(oid))?;
        Ok(ObjectStat {
            size: obj.data.len() as u64,
        })
    }

    fn getattr(&self, oid: ObjectId, name: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.lock();
        Ok(inner
            .objects
            .get(&oid)
            .and_then(|o| o.attrs.get(name).cloned()))
    }

    fn getattrs(&self, oid: ObjectId) -> Result<BTreeMap<String, Vec<u8>>> {
        let inner = self.inner.lock();
        let obj = inner.objects.get(&oid).ok_or(Error::NoSuchObject(oid))?;
        Ok(obj.attrs.clone())
    }

    fn collection_list(&self, cid: PgId) -> Result<Vec<ObjectId>> {
        let inner = self.inner.lock();
        Ok(inner
            .collections
            .get(&cid)
            .map(|c| c.objects.iter().copied().collect())
            .unwrap_or_default())
    }

    fn apply_transaction(&self, t: Transaction, on_commit: Option<CommitFn>) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            Self::validate(&inner, &t)?;
            trace!("applying transaction with {} ops", t.len());
            for op in t.into_ops() {
                Self::apply_op(&mut inner, op);
            }
        }
        if let Some(cb) = on_commit {
            self.deliver(cb);
        }
        Ok(())
    }
}

impl Drop for MemStore {
    fn drop(&mut self) {
        // Dropping the sender ends the worker loop.
        self.sender.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}
