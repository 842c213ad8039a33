//! Core type definitions for replio
//!
//! This module defines the fundamental identifiers used throughout the
//! system: object names and revisions, placement groups, peers, clients,
//! and the epoch-qualified version stamp that orders PG history.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Cluster-map epoch. Bumped on every membership change.
pub type Epoch = u32;

/// Object revision. `0` means "head, no historical clone".
pub type Rev = u32;

/// Node-local transaction identifier, used to tie replica replies to their
/// in-flight replication record.
pub type Tid = u64;

/// Position of a mutation in a PG's history.
///
/// Ordered lexicographically: epoch first, then version. Versions are
/// monotone within an epoch; epoch bumps come from the cluster map.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EVersion {
    pub epoch: Epoch,
    pub version: u64,
}

impl EVersion {
    /// The zero version, below every real one.
    pub const ZERO: Self = Self {
        epoch: 0,
        version: 0,
    };

    /// Create a version stamp
    #[must_use]
    pub const fn new(epoch: Epoch, version: u64) -> Self {
        Self { epoch, version }
    }

    /// True for the zero stamp
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.epoch == 0 && self.version == 0
    }
}

impl fmt::Debug for EVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}'{}", self.epoch, self.version)
    }
}

impl fmt::Display for EVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}'{}", self.epoch, self.version)
    }
}

/// Name half of an object identifier, shared by the head object and all of
/// its revision clones.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
)]
pub struct ObjectName(u64);

impl ObjectName {
    /// Create an object name
    #[must_use]
    pub const fn new(name: u64) -> Self {
        Self(name)
    }
}

impl fmt::Debug for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// An object identifier: `(name, revision)`.
///
/// Revision `0` is the live head; nonzero revisions are historical clones.
/// Ordered by name, then revision, so a name's clones form a contiguous
/// chain in any sorted listing.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ObjectId {
    pub name: ObjectName,
    pub rev: Rev,
}

impl ObjectId {
    /// The head (live) object for a name
    #[must_use]
    pub const fn head(name: ObjectName) -> Self {
        Self { name, rev: 0 }
    }

    /// A specific revision clone of a name
    #[must_use]
    pub const fn with_rev(name: ObjectName, rev: Rev) -> Self {
        Self { name, rev }
    }

    /// True if this names the live head rather than a clone
    #[must_use]
    pub const fn is_head(&self) -> bool {
        self.rev == 0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rev == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}@{}", self.name, self.rev)
        }
    }
}

/// A placement group: one replicated shard of the object namespace.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
)]
pub struct PgId(u64);

impl PgId {
    /// Create a placement group id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Debug for PgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pg{:x}", self.0)
    }
}

impl fmt::Display for PgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pg{:x}", self.0)
    }
}

/// A storage node, addressed by its stable rank in the cluster map.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into, Display,
)]
#[display("osd{_0}")]
pub struct OsdId(u32);

impl OsdId {
    /// Create a node id
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Debug for OsdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "osd{}", self.0)
    }
}

/// A client instance identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generate a new random client id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client.{}", self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client.{}", self.0)
    }
}

/// Any addressable participant: a client instance or a storage node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Entity {
    Client(ClientId),
    Osd(OsdId),
}

impl Entity {
    /// The node id, if this entity is a storage node
    #[must_use]
    pub const fn osd(&self) -> Option<OsdId> {
        match self {
            Self::Osd(id) => Some(*id),
            Self::Client(_) => None,
        }
    }

    /// True if this entity is a storage node
    #[must_use]
    pub const fn is_osd(&self) -> bool {
        matches!(self, Self::Osd(_))
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(c) => write!(f, "{c}"),
            Self::Osd(o) => write!(f, "{o}"),
        }
    }
}

/// A request identifier, unique per client operation across retries.
///
/// Replays of the same logical request carry the same `ReqId`, which is how
/// the write path detects duplicates.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReqId {
    /// Originating entity (a client instance, or a node for internally
    /// generated ops such as pulls and pushes)
    pub client: Entity,
    /// Client incarnation number
    pub inc: u32,
    /// Client-local operation counter
    pub tid: Tid,
}

impl ReqId {
    /// Create a request id
    #[must_use]
    pub const fn new(client: Entity, inc: u32, tid: Tid) -> Self {
        Self { client, inc, tid }
    }
}

impl fmt::Debug for ReqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.client, self.inc, self.tid)
    }
}

impl fmt::Display for ReqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.client, self.inc, self.tid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eversion_order() {
        assert!(EVersion::new(1, 5) < EVersion::new(2, 1));
        assert!(EVersion::new(2, 1) < EVersion::new(2, 2));
        assert!(EVersion::ZERO < EVersion::new(1, 1));
        assert!(EVersion::ZERO.is_zero());
    }

    #[test]
    fn test_object_id_order() {
        let a = ObjectId::head(ObjectName::new(1));
        let a5 = ObjectId::with_rev(ObjectName::new(1), 5);
        let b = ObjectId::head(ObjectName::new(2));
        assert!(a < a5);
        assert!(a5 < b);
        assert!(a.is_head());
        assert!(!a5.is_head());
    }

    #[test]
    fn test_display() {
        let oid = ObjectId::with_rev(ObjectName::new(0xab), 3);
        assert_eq!(oid.to_string(), "ab@3");
        assert_eq!(EVersion::new(4, 17).to_string(), "4'17");
        assert_eq!(OsdId::new(2).to_string(), "osd2");
    }
}
