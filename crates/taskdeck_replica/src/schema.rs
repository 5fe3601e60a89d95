//! Schema bootstrap for the replica.
//!
//! The replica is a disposable cache: when an obsolete schema generation is
//! detected the affected objects are dropped and recreated from scratch
//! rather than migrated in place. Any DDL failure is fatal and aborts
//! startup; there is no local recovery from a broken schema.

use crate::db::Replica;
use crate::error::{ReplicaError, ReplicaResult};
use tracing::{error, info};

/// Name of the replicated task table.
pub const TASKS_TABLE: &str = "tasks";

/// Column that identifies the obsolete schema generation.
///
/// Early builds scoped rows by `user_id` locally; current builds scope by
/// the shape subscription instead. Finding the column means the whole table
/// predates the current layout.
const LEGACY_COLUMN: &str = "user_id";

const CREATE_TASKS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    completed BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    due_date TEXT,
    synced BOOLEAN NOT NULL DEFAULT FALSE,
    sent_to_server BOOLEAN NOT NULL DEFAULT FALSE,
    modified_columns TEXT,
    deleted BOOLEAN NOT NULL DEFAULT FALSE,
    "new" BOOLEAN NOT NULL DEFAULT TRUE,
    username TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_outbox ON tasks (synced) WHERE synced = FALSE;
"#;

const CREATE_QUERY_INDEXES_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_tasks_completed ON tasks (completed);
CREATE INDEX IF NOT EXISTS idx_tasks_due_date ON tasks (due_date);
"#;

const DROP_TASKS_SQL: &str = r#"
DROP INDEX IF EXISTS idx_tasks_outbox;
DROP INDEX IF EXISTS idx_tasks_completed;
DROP INDEX IF EXISTS idx_tasks_due_date;
DROP TABLE IF EXISTS tasks;
"#;

/// Idempotently brings the replica schema to the current shape.
///
/// Creates the task table and the outbox index if absent. If the obsolete
/// schema generation is detected, drops everything first and recreates. The
/// query indexes are intentionally not created here; they are built by the
/// post-snapshot hook after the initial bulk load
/// ([`create_query_indexes`]).
pub fn run_migrations(replica: &Replica) -> ReplicaResult<()> {
    if legacy_schema_present(replica)? {
        info!(table = TASKS_TABLE, "legacy schema detected, recreating");
        drop_tables(replica)?;
    }

    replica
        .transaction(|tx| {
            tx.execute_batch(CREATE_TASKS_SQL)?;
            Ok(())
        })
        .map_err(|e| {
            error!(table = TASKS_TABLE, error = %e, "schema bootstrap failed");
            ReplicaError::migration_failed(e.to_string())
        })
}

/// Drops the task table and its indexes.
pub fn drop_tables(replica: &Replica) -> ReplicaResult<()> {
    replica
        .transaction(|tx| {
            tx.execute_batch(DROP_TASKS_SQL)?;
            Ok(())
        })
        .map_err(|e| {
            error!(table = TASKS_TABLE, error = %e, "dropping tables failed");
            ReplicaError::migration_failed(e.to_string())
        })
}

/// Drops and recreates the schema.
pub fn reset_database(replica: &Replica) -> ReplicaResult<()> {
    drop_tables(replica)?;
    run_migrations(replica)
}

/// Builds the auxiliary query indexes.
///
/// Deferred until after the initial snapshot so the bulk load does not pay
/// per-row index maintenance; safe to call more than once.
pub fn create_query_indexes(replica: &Replica) -> ReplicaResult<()> {
    replica.transaction(|tx| {
        tx.execute_batch(CREATE_QUERY_INDEXES_SQL)?;
        Ok(())
    })
}

/// Returns the column names of the task table, in declaration order.
pub fn table_columns(replica: &Replica) -> ReplicaResult<Vec<String>> {
    replica.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('tasks')")?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    })
}

fn legacy_schema_present(replica: &Replica) -> ReplicaResult<bool> {
    replica.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('tasks') WHERE name = ?1",
            [LEGACY_COLUMN],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_creates_documented_columns() {
        let replica = Replica::open_in_memory().unwrap();
        run_migrations(&replica).unwrap();

        let columns = table_columns(&replica).unwrap();
        for expected in [
            "id",
            "title",
            "description",
            "completed",
            "created_at",
            "updated_at",
            "due_date",
            "synced",
            "sent_to_server",
            "modified_columns",
            "deleted",
            "new",
            "username",
        ] {
            assert!(columns.iter().any(|c| c == expected), "missing column {expected}");
        }
    }

    #[test]
    fn migration_is_idempotent() {
        let replica = Replica::open_in_memory().unwrap();
        run_migrations(&replica).unwrap();
        let first = table_columns(&replica).unwrap();

        run_migrations(&replica).unwrap();
        let second = table_columns(&replica).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn legacy_schema_is_recreated() {
        let replica = Replica::open_in_memory().unwrap();
        replica
            .transaction(|tx| {
                tx.execute_batch(
                    "CREATE TABLE tasks (id TEXT PRIMARY KEY, title TEXT, user_id TEXT)",
                )?;
                tx.execute(
                    "INSERT INTO tasks (id, title, user_id) VALUES ('a', 'stale', 'u1')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        run_migrations(&replica).unwrap();

        let columns = table_columns(&replica).unwrap();
        assert!(!columns.iter().any(|c| c == "user_id"));
        assert!(columns.iter().any(|c| c == "synced"));

        // Destructive: the stale cache content is gone.
        let count: i64 = replica
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn reset_database_round_trips() {
        let replica = Replica::open_in_memory().unwrap();
        run_migrations(&replica).unwrap();
        replica
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO tasks (id, title, created_at, updated_at) \
                     VALUES ('x', 't', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        reset_database(&replica).unwrap();

        let count: i64 = replica
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn query_indexes_are_idempotent() {
        let replica = Replica::open_in_memory().unwrap();
        run_migrations(&replica).unwrap();

        create_query_indexes(&replica).unwrap();
        create_query_indexes(&replica).unwrap();

        let count: i64 = replica
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_tasks_%'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        // outbox + completed + due_date
        assert_eq!(count, 3);
    }
}
