//! The PG log
//!
//! An ordered record of every mutation applied to the PG, used for
//! duplicate detection, recovery bookkeeping, and peer catch-up. Entries
//! carry strictly increasing versions; the log is trimmable from the
//! bottom once every peer's `last_complete` has passed an entry.

use replio_common::{EVersion, ObjectId, ReqId, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::missing::MissingSet;

/// What a log entry records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Modify,
    Delete,
    Clone,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Modify => write!(f, "modify"),
            Self::Delete => write!(f, "delete"),
            Self::Clone => write!(f, "clone"),
        }
    }
}

/// One PG log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: EntryKind,
    pub oid: ObjectId,
    pub version: EVersion,
    pub reqid: ReqId,
}

impl LogEntry {
    /// Create a log entry
    #[must_use]
    pub fn new(kind: EntryKind, oid: ObjectId, version: EVersion, reqid: ReqId) -> Self {
        Self {
            kind,
            oid,
            version,
            reqid,
        }
    }

    /// Serialize for the persistent PG log
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// Deserialize a persisted entry
    pub fn decode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| replio_common::Error::corrupt(format!("log entry: {e}")))
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} ({})", self.version, self.kind, self.oid, self.reqid)
    }
}

/// The in-memory PG log.
///
/// `complete_to` is the recovery cursor: the index of the first entry
/// whose object this node is still missing. Everything below it is
/// reflected in `last_complete`.
#[derive(Debug, Default)]
pub struct PgLog {
    entries: VecDeque<LogEntry>,
    /// Version of the newest entry ever logged
    pub top: EVersion,
    /// Version at or below which entries have been trimmed away
    pub bottom: EVersion,
    complete_to: usize,
}

impl PgLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Retained entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Number of retained entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries are retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry. Versions must be strictly increasing.
    pub fn add(&mut self, entry: LogEntry) {
        debug_assert!(
            entry.version > self.top,
            "log entry {} not above top {}",
            entry.version,
            self.top
        );
        self.top = entry.version;
        self.entries.push_back(entry);
    }

    /// True if `reqid` already appears in a retained entry. Once the log
    /// is trimmed past an entry, a very late duplicate is
    /// indistinguishable from a fresh op.
    #[must_use]
    pub fn is_dup(&self, reqid: ReqId) -> bool {
        self.entries.iter().any(|e| e.reqid == reqid)
    }

    /// Drop entries at or below `trim_to`. Callers must bound `trim_to`
    /// by the minimum `last_complete` across the acting set.
    pub fn trim(&mut self, trim_to: EVersion) {
        while let Some(front) = self.entries.front() {
            if front.version > trim_to {
                break;
            }
            self.bottom = front.version;
            self.entries.pop_front();
            self.complete_to = self.complete_to.saturating_sub(1);
        }
    }

    /// Position the recovery cursor at the first retained entry whose
    /// object is missing.
    pub fn reset_complete_to(&mut self, missing: &MissingSet) {
        self.complete_to = self
            .entries
            .iter()
            .position(|e| missing.is_missing(e.oid))
            .unwrap_or(self.entries.len());
    }

    /// Advance the recovery cursor past entries whose objects are no
    /// longer missing, raising `last_complete` along the way. Stops at the
    /// first still-missing entry.
    pub fn advance_complete_to(&mut self, missing: &MissingSet, last_complete: &mut EVersion) {
        while self.complete_to < self.entries.len() {
            let entry = &self.entries[self.complete_to];
            if missing.is_missing(entry.oid) {
                break;
            }
            if *last_complete < entry.version {
                *last_complete = entry.version;
            }
            self.complete_to += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replio_common::{Entity, ObjectName, OsdId};

    fn reqid(tid: u64) -> ReqId {
        ReqId::new(Entity::Osd(OsdId::new(99)), 0, tid)
    }

    fn oid(n: u64) -> ObjectId {
        ObjectId::head(ObjectName::new(n))
    }

    fn entry(tid: u64, name: u64, e: u32, v: u64) -> LogEntry {
        LogEntry::new(EntryKind::Modify, oid(name), EVersion::new(e, v), reqid(tid))
    }

    #[test]
    fn test_add_and_top() {
        let mut log = PgLog::new();
        log.add(entry(1, 1, 1, 1));
        log.add(entry(2, 2, 1, 2));
        assert_eq!(log.top, EVersion::new(1, 2));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_is_dup() {
        let mut log = PgLog::new();
        log.add(entry(7, 1, 1, 1));
        assert!(log.is_dup(reqid(7)));
        assert!(!log.is_dup(reqid(8)));
    }

    #[test]
    fn test_trim() {
        let mut log = PgLog::new();
        for v in 1..=5 {
            log.add(entry(v, v, 1, v));
        }
        log.trim(EVersion::new(1, 3));
        assert_eq!(log.len(), 2);
        assert_eq!(log.bottom, EVersion::new(1, 3));
        assert_eq!(log.top, EVersion::new(1, 5));
        // a dup below the trim point is no longer detectable
        assert!(!log.is_dup(reqid(2)));
        assert!(log.is_dup(reqid(5)));
    }

    #[test]
    fn test_complete_to_walk() {
        let mut log = PgLog::new();
        for v in 1..=4 {
            log.add(entry(v, v, 1, v));
        }
        let mut missing = MissingSet::new();
        missing.add(oid(2), EVersion::new(1, 2), None);
        missing.add(oid(4), EVersion::new(1, 4), None);

        log.reset_complete_to(&missing);
        let mut lc = EVersion::new(1, 1);
        log.advance_complete_to(&missing, &mut lc);
        // stuck at entry for object 2
        assert_eq!(lc, EVersion::new(1, 1));

        missing.got(oid(2), EVersion::new(1, 2));
        log.advance_complete_to(&missing, &mut lc);
        // advanced through 2 and 3, stuck at 4
        assert_eq!(lc, EVersion::new(1, 3));

        missing.got(oid(4), EVersion::new(1, 4));
        log.advance_complete_to(&missing, &mut lc);
        assert_eq!(lc, EVersion::new(1, 4));
    }

    #[test]
    fn test_entry_roundtrip() {
        let e = entry(3, 9, 2, 7);
        assert_eq!(LogEntry::decode(&e.encode()).unwrap(), e);
    }
}
