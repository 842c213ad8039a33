//! Configuration types for replio
//!
//! Per-PG replication behavior is fixed at configuration time; the mode
//! decides who forwards to whom and who assembles client replies.

use serde::{Deserialize, Serialize};

/// Replication topology for a placement group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// The primary fans the op out to every replica and assembles replies.
    #[default]
    Primary,
    /// Ops travel hop by hop along the acting set; the tail assembles
    /// replies.
    Chain,
    /// The primary fans out, but a distinct acker assembles replies.
    Splay,
}

impl ReplicationMode {
    /// True if a peer other than the primary assembles client replies
    #[must_use]
    pub const fn has_distinct_acker(&self) -> bool {
        matches!(self, Self::Chain | Self::Splay)
    }
}

/// Placement-group behavior knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PgConfig {
    /// Replication topology
    pub rep_mode: ReplicationMode,
    /// Maximum concurrent object pulls per PG during recovery
    pub max_pulls: usize,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            rep_mode: ReplicationMode::Primary,
            max_pulls: 4,
        }
    }
}

impl PgConfig {
    /// Config with a specific replication mode and default knobs
    #[must_use]
    pub fn with_mode(rep_mode: ReplicationMode) -> Self {
        Self {
            rep_mode,
            ..Default::default()
        }
    }
}
