//! Write-origin tracking for the replica.
//!
//! Every write to the replica has an origin: either the local user (the
//! application write path) or replication (rows applied from the server
//! feed). Local writes are dirty-marked and re-trigger the outbox observer;
//! replication writes must do neither, or the engine would push back rows it
//! just received.
//!
//! The origin is carried by a scoped guard rather than a pair of
//! enable/disable calls: [`WriteTracking::replication_scope`] returns a
//! [`ReplicationScope`] that attributes all writes on the same replica to
//! replication until it is dropped, on every exit path. The same guard type
//! serves both the snapshot bulk-load path and the push acknowledgment
//! transaction.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Tracks the origin of writes against one replica.
///
/// Scopes nest: the tracking state reports replication origin while at
/// least one [`ReplicationScope`] is alive.
#[derive(Debug, Default)]
pub struct WriteTracking {
    /// Number of live replication scopes.
    replication_depth: AtomicUsize,
}

impl WriteTracking {
    /// Creates a new tracking state with no active scope.
    pub fn new() -> Self {
        Self {
            replication_depth: AtomicUsize::new(0),
        }
    }

    /// Returns true if writes are currently attributed to replication.
    pub fn is_replication(&self) -> bool {
        self.replication_depth.load(Ordering::SeqCst) > 0
    }

    /// Enters a replication scope.
    ///
    /// While the returned guard is alive, writes on this replica are
    /// attributed to replication: they are not dirty-marked and do not
    /// notify the outbox observer.
    pub fn replication_scope(&self) -> ReplicationScope<'_> {
        self.replication_depth.fetch_add(1, Ordering::SeqCst);
        ReplicationScope { tracking: self }
    }
}

/// RAII guard attributing writes to replication.
///
/// Dropping the guard restores normal tracking, on success and error paths
/// alike.
#[derive(Debug)]
pub struct ReplicationScope<'a> {
    tracking: &'a WriteTracking,
}

impl Drop for ReplicationScope<'_> {
    fn drop(&mut self) {
        self.tracking.replication_depth.fetch_sub(1, Ordering::SeqCst);
    }
}
