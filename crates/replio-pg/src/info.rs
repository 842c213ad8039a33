//! PG identity and history
//!
//! `PgInfo` is the persisted heart of a PG: where its history stands
//! (`last_update`, `last_complete`) and since when its membership roles
//! have been stable. It is written into the PG collection's `"info"`
//! attribute as part of every mutating transaction.

use replio_common::{Epoch, EVersion, PgId, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Collection attribute holding the serialized [`PgInfo`]
pub const INFO_ATTR: &str = "info";
/// Object attribute holding the object's latest [`EVersion`]
pub const VERSION_ATTR: &str = "version";
/// Object attribute holding the object's current revision
pub const CREV_ATTR: &str = "crev";
/// Object attribute holding the write-lock holder
pub const WRLOCK_ATTR: &str = "wrlock";

/// Membership stability markers, produced by peering and delivered with
/// the cluster map. Each records the first epoch since which the named
/// aspect of the acting set has been unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    /// Entire acting set unchanged since this epoch
    pub same_since: Epoch,
    /// Primary unchanged since this epoch
    pub same_primary_since: Epoch,
    /// Acker unchanged since this epoch
    pub same_acker_since: Epoch,
}

/// Persistent summary of one PG's state on this node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgInfo {
    pub pgid: PgId,
    pub history: History,
    /// Highest version this node has logged and applied
    pub last_update: EVersion,
    /// Highest version below which this node holds every object at its
    /// latest version
    pub last_complete: EVersion,
}

impl PgInfo {
    /// Fresh info for an empty PG
    #[must_use]
    pub fn new(pgid: PgId) -> Self {
        Self {
            pgid,
            history: History::default(),
            last_update: EVersion::ZERO,
            last_complete: EVersion::ZERO,
        }
    }

    /// Serialize for the collection `"info"` attribute
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// Deserialize from the collection `"info"` attribute
    pub fn decode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| replio_common::Error::corrupt(format!("pg info: {e}")))
    }
}

impl fmt::Display for PgInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(lu {} lc {})",
            self.pgid, self.last_update, self.last_complete
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_roundtrip() {
        let mut info = PgInfo::new(PgId::new(5));
        info.last_update = EVersion::new(3, 10);
        info.last_complete = EVersion::new(3, 8);
        info.history.same_primary_since = 2;
        let decoded = PgInfo::decode(&info.encode()).unwrap();
        assert_eq!(decoded, info);
    }
}
