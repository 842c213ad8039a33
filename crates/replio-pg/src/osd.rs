//! Node-level PG owner
//!
//! `Osd` owns every PG hosted by one node and routes incoming messages to
//! them by PG id. It also holds the state PGs share: the store and
//! messenger handles, the current map epoch, the node-wide tid counter,
//! and the operation counters. Commit callbacks never carry raw pointers
//! across threads; they hold a weak handle to the PG and re-acquire its
//! mutex on the store's callback thread.

use crate::info::{History, INFO_ATTR};
use crate::messages::{Message, Messenger};
use crate::pg::ReplicatedPg;
use crate::stats::OsdStats;
use parking_lot::{Mutex, RwLock};
use replio_common::{Entity, Epoch, Error, OsdId, PgConfig, PgId, Result, Tid};
use replio_store::{ObjectStore, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::info;

/// State shared between a node's PGs.
pub struct OsdShared {
    /// This node's id
    pub whoami: OsdId,
    /// PG behavior knobs
    pub config: PgConfig,
    /// The durable object store
    pub store: Arc<dyn ObjectStore>,
    /// Outbound message delivery
    pub messenger: Arc<dyn Messenger>,
    /// Operation counters
    pub stats: OsdStats,
    epoch: AtomicU32,
    last_tid: AtomicU64,
}

impl OsdShared {
    /// The current cluster-map epoch as this node knows it
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch.load(Ordering::Acquire)
    }

    /// Advance the known map epoch (never backwards)
    pub fn set_epoch(&self, e: Epoch) {
        self.epoch.fetch_max(e, Ordering::AcqRel);
    }

    /// Allocate a node-unique transaction id
    #[must_use]
    pub fn next_tid(&self) -> Tid {
        self.last_tid.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// One storage node's view of its hosted PGs.
pub struct Osd {
    shared: Arc<OsdShared>,
    pgs: RwLock<HashMap<PgId, Arc<Mutex<ReplicatedPg>>>>,
}

impl Osd {
    /// Create a node with no PGs
    #[must_use]
    pub fn new(
        whoami: OsdId,
        config: PgConfig,
        store: Arc<dyn ObjectStore>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            shared: Arc::new(OsdShared {
                whoami,
                config,
                store,
                messenger,
                stats: OsdStats::default(),
                epoch: AtomicU32::new(0),
                last_tid: AtomicU64::new(0),
            }),
            pgs: RwLock::new(HashMap::new()),
        }
    }

    /// State shared with this node's PGs
    #[must_use]
    pub fn shared(&self) -> &Arc<OsdShared> {
        &self.shared
    }

    /// This node's id
    #[must_use]
    pub fn whoami(&self) -> OsdId {
        self.shared.whoami
    }

    /// The current map epoch
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.shared.epoch()
    }

    /// Advance the known map epoch
    pub fn set_epoch(&self, e: Epoch) {
        self.shared.set_epoch(e);
    }

    /// Host a PG with the given acting set and membership history, as
    /// delivered by peering. Persists the PG collection and its info.
    pub fn create_pg(
        &self,
        pgid: PgId,
        acting: Vec<OsdId>,
        history: History,
    ) -> Result<Arc<Mutex<ReplicatedPg>>> {
        let shared = self.shared.clone();
        let pg = Arc::new_cyclic(|weak| {
            Mutex::new(ReplicatedPg::new(
                shared,
                pgid,
                acting,
                history,
                weak.clone(),
            ))
        });

        let mut t = Transaction::new();
        t.collection_setattr(pgid, INFO_ATTR, pg.lock().info().encode());
        self.shared.store.apply_transaction(t, None)?;

        info!("{} created {}", self.shared.whoami, pgid);
        self.pgs.write().insert(pgid, pg.clone());
        Ok(pg)
    }

    /// Look up a hosted PG
    #[must_use]
    pub fn pg(&self, pgid: PgId) -> Option<Arc<Mutex<ReplicatedPg>>> {
        self.pgs.read().get(&pgid).cloned()
    }

    /// Route one message to its PG. All handling for the PG runs under
    /// its mutex; ops woken along the way are re-dispatched before this
    /// returns.
    pub fn handle_message(&self, from: Entity, msg: Message) -> Result<()> {
        let pgid = msg.pgid();
        let pg = self.pg(pgid).ok_or(Error::UnknownPg(pgid))?;
        pg.lock().dispatch(from, msg);
        Ok(())
    }
}
