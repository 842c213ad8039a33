//! Node-wide operation counters
//!
//! Plain atomic counters, readable at any time without locks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for the write, replication and recovery paths of one node.
#[derive(Debug, Default)]
pub struct OsdStats {
    /// Replicated writes applied on this node
    pub replica_writes: AtomicU64,
    /// Payload bytes of replicated writes
    pub replica_write_bytes: AtomicU64,
    /// Objects pushed to peers
    pub pushes: AtomicU64,
    /// Bytes pushed to peers
    pub push_bytes: AtomicU64,
    /// Pulls requested from peers
    pub pulls: AtomicU64,
    /// Client writes acked
    pub client_writes_acked: AtomicU64,
    /// Summed client write latency, request entry to ack, in microseconds
    pub client_write_lat_us: AtomicU64,
}

impl OsdStats {
    /// Record one replicated write of `bytes` payload bytes
    pub fn record_replica_write(&self, bytes: u64) {
        self.replica_writes.fetch_add(1, Ordering::Relaxed);
        self.replica_write_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one push of `bytes`
    pub fn record_push(&self, bytes: u64) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
        self.push_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one pull request
    pub fn record_pull(&self) {
        self.pulls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one acked client write and its latency
    pub fn record_client_write(&self, latency: Duration) {
        self.client_writes_acked.fetch_add(1, Ordering::Relaxed);
        self.client_write_lat_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }
}
