//! Embedded replica database handle.
//!
//! [`Replica`] wraps one SQLite connection behind a mutex and bundles the
//! two pieces of per-replica state the sync engine relies on: the write
//! tracking toggle and the outbox observer. The replica is a disposable
//! cache of server state, not a system of record; it can be dropped and
//! re-synced at any time.

use crate::error::ReplicaResult;
use crate::observer::OutboxObserver;
use crate::tracking::{ReplicationScope, WriteTracking};
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::time::Duration;

/// The embedded replica: one shared SQLite session plus tracking state.
///
/// All cross-row-visible mutations go through [`Replica::transaction`];
/// reads that need no transactional snapshot use [`Replica::with_conn`].
pub struct Replica {
    conn: Mutex<Connection>,
    tracking: WriteTracking,
    outbox: OutboxObserver,
}

impl Replica {
    /// Opens an in-memory replica.
    pub fn open_in_memory() -> ReplicaResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    /// Opens (or creates) a file-backed replica at `path`.
    pub fn open(path: impl AsRef<Path>) -> ReplicaResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> ReplicaResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
            tracking: WriteTracking::new(),
            outbox: OutboxObserver::new(),
        })
    }

    /// Returns the write tracking state for this replica.
    pub fn tracking(&self) -> &WriteTracking {
        &self.tracking
    }

    /// Enters a replication scope on this replica.
    ///
    /// Shorthand for `replica.tracking().replication_scope()`.
    pub fn replication_scope(&self) -> ReplicationScope<'_> {
        self.tracking.replication_scope()
    }

    /// Returns the outbox observer for this replica.
    pub fn outbox(&self) -> &OutboxObserver {
        &self.outbox
    }

    /// Runs `f` with the locked connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> ReplicaResult<T>) -> ReplicaResult<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Runs `f` inside a transaction, committing on success.
    ///
    /// If `f` returns an error the transaction rolls back and the error
    /// propagates; no partial state is left behind.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> ReplicaResult<T>,
    ) -> ReplicaResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("tracking", &self.tracking)
            .field("subscribers", &self.outbox.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReplicaError;

    #[test]
    fn transaction_commits() {
        let replica = Replica::open_in_memory().unwrap();

        replica
            .transaction(|tx| {
                tx.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)")?;
                tx.execute("INSERT INTO t (v) VALUES ('a')", [])?;
                Ok(())
            })
            .unwrap();

        let count: i64 = replica
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let replica = Replica::open_in_memory().unwrap();
        replica
            .transaction(|tx| {
                tx.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)")?;
                Ok(())
            })
            .unwrap();

        let result: ReplicaResult<()> = replica.transaction(|tx| {
            tx.execute("INSERT INTO t (v) VALUES ('a')", [])?;
            Err(ReplicaError::invalid_operation("abort"))
        });
        assert!(result.is_err());

        let count: i64 = replica
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn file_backed_replica() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.db");

        let replica = Replica::open(&path).unwrap();
        replica
            .transaction(|tx| {
                tx.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")?;
                Ok(())
            })
            .unwrap();
        drop(replica);

        // Reopen and verify the table survived.
        let replica = Replica::open(&path).unwrap();
        let count: i64 = replica
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 't'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
