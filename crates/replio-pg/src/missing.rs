//! Missing-object bookkeeping
//!
//! A `MissingSet` indexes the objects a peer's log references but whose
//! data that peer does not yet hold, together with a known holder for each
//! when one is known. The primary keeps one for itself and one per peer
//! (`peer_missing`), both produced by peering and maintained here as
//! recovery progresses.

use replio_common::{EVersion, ObjectId, OsdId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Objects a peer is behind on: `oid -> version needed`, plus an optional
/// source peer to fetch each from.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MissingSet {
    missing: BTreeMap<ObjectId, EVersion>,
    loc: HashMap<ObjectId, OsdId>,
}

impl MissingSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if nothing is missing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
    }

    /// Number of missing objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.missing.len()
    }

    /// True if `oid` is missing
    #[must_use]
    pub fn is_missing(&self, oid: ObjectId) -> bool {
        self.missing.contains_key(&oid)
    }

    /// The version needed for `oid`, if missing
    #[must_use]
    pub fn needs(&self, oid: ObjectId) -> Option<EVersion> {
        self.missing.get(&oid).copied()
    }

    /// A known holder of `oid`, if any
    #[must_use]
    pub fn loc(&self, oid: ObjectId) -> Option<OsdId> {
        self.loc.get(&oid).copied()
    }

    /// Record that `oid` is missing at `version`, optionally with a known
    /// holder
    pub fn add(&mut self, oid: ObjectId, version: EVersion, loc: Option<OsdId>) {
        self.missing.insert(oid, version);
        if let Some(peer) = loc {
            self.loc.insert(oid, peer);
        }
    }

    /// Record that `oid` has arrived at `version`. Clears the entry if the
    /// arrival satisfies what was needed.
    pub fn got(&mut self, oid: ObjectId, version: EVersion) {
        if let Some(needed) = self.missing.get(&oid).copied() {
            debug_assert!(needed <= version, "got {oid} at {version}, needed {needed}");
            if needed <= version {
                self.missing.remove(&oid);
                self.loc.remove(&oid);
            }
        }
    }

    /// Drop `oid` unconditionally (used when a fresh copy is about to be
    /// pushed regardless of the recorded need)
    pub fn remove(&mut self, oid: ObjectId) {
        self.missing.remove(&oid);
        self.loc.remove(&oid);
    }

    /// Iterate missing objects in id order
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, EVersion)> + '_ {
        self.missing.iter().map(|(oid, v)| (*oid, *v))
    }
}
