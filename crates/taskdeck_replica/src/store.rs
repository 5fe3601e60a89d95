//! Task store: the one write funnel over the replicated table.
//!
//! Writes come in two families with different bookkeeping:
//!
//! - **Local writes** (`create_local`, `update_local`, `delete_local`) honor
//!   the outbox convention: they flag the row dirty (`synced = false`,
//!   `sent_to_server = false`), record modified columns, bump `updated_at`,
//!   and notify the outbox observer.
//! - **Replication writes** (`bulk_load`, `apply_batch`) run inside a
//!   [`ReplicationScope`](crate::tracking::ReplicationScope) and write row
//!   state verbatim as delivered by the feed. They never notify the
//!   observer, so replicated rows cannot re-enter the outbox.
//!
//! The acknowledgment path ([`TaskStore::acknowledge_batch`]) also runs
//! under a replication scope: flipping `sent_to_server` is sync bookkeeping,
//! not a user edit.

use crate::db::Replica;
use crate::error::{ReplicaError, ReplicaResult};
use crate::observer::OutboxNotification;
use crate::task::{merge_modified_columns, modified_columns, NewTask, Task};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const SELECT_COLUMNS: &str = "id, title, description, completed, created_at, updated_at, \
     due_date, synced, sent_to_server, modified_columns, deleted, \"new\", username";

const UPSERT_SQL: &str = "INSERT OR REPLACE INTO tasks \
     (id, title, description, completed, created_at, updated_at, due_date, \
      synced, sent_to_server, modified_columns, deleted, \"new\", username) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

/// One replicated row change, in feed delivery order.
#[derive(Debug, Clone)]
pub enum ReplicatedChange {
    /// Insert-or-update of a full row (last writer wins by primary key).
    Upsert(Task),
    /// Physical removal of a row.
    Delete(Uuid),
}

/// Result of a batched acknowledgment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckSummary {
    /// Rows marked `sent_to_server = true`.
    pub acknowledged: usize,
    /// Rows left dirty because `updated_at` moved since the read.
    pub skipped: usize,
}

/// Store over the replicated `tasks` table.
#[derive(Debug, Clone)]
pub struct TaskStore {
    replica: Arc<Replica>,
}

impl TaskStore {
    /// Creates a store over the given replica.
    pub fn new(replica: Arc<Replica>) -> Self {
        Self { replica }
    }

    /// Returns the underlying replica.
    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    /// Subscribes to outbox notifications for this replica.
    pub fn subscribe_outbox(&self) -> Receiver<OutboxNotification> {
        self.replica.outbox().subscribe()
    }

    // ---- local write path (the outbox convention) ----

    /// Creates a task locally: dirty, unsent, marked new.
    pub fn create_local(&self, input: NewTask) -> ReplicaResult<Task> {
        let task = Task::new_local(input);
        self.replica.transaction(|tx| {
            tx.execute(UPSERT_SQL, task_params(&task))?;
            Ok(())
        })?;
        self.after_tracked_write();
        Ok(task)
    }

    /// Applies a local edit to an existing task.
    ///
    /// Diffs the tracked columns against the stored row, merges the result
    /// into `modified_columns`, bumps `updated_at` and re-flags the row
    /// dirty. `created_at` and the soft-delete marker are preserved from the
    /// stored row. Returns the row as written.
    pub fn update_local(&self, edited: &Task) -> ReplicaResult<Task> {
        let written = self.replica.transaction(|tx| {
            let current = get_in_tx(tx, &edited.id)?
                .ok_or(ReplicaError::TaskNotFound { id: edited.id })?;

            let changed = modified_columns(&current, edited);
            let mut next = edited.clone();
            next.created_at = current.created_at;
            next.deleted = current.deleted;
            next.is_new = current.is_new;
            next.updated_at = Utc::now();
            next.synced = false;
            next.sent_to_server = false;
            next.modified_columns =
                merge_modified_columns(current.modified_columns.as_deref(), &changed);

            tx.execute(
                "UPDATE tasks SET title = ?2, description = ?3, completed = ?4, \
                 updated_at = ?5, due_date = ?6, synced = ?7, sent_to_server = ?8, \
                 modified_columns = ?9, username = ?10 WHERE id = ?1",
                params![
                    next.id.to_string(),
                    next.title,
                    next.description,
                    next.completed,
                    next.updated_at,
                    next.due_date,
                    next.synced,
                    next.sent_to_server,
                    next.modified_columns,
                    next.username,
                ],
            )?;
            Ok(next)
        })?;
        self.after_tracked_write();
        Ok(written)
    }

    /// Soft-deletes a task locally.
    ///
    /// The row stays in place with `deleted = true` and replicates like any
    /// other dirty row; physical removal happens only when the server's
    /// delete echoes back through the feed.
    pub fn delete_local(&self, id: &Uuid) -> ReplicaResult<()> {
        self.replica.transaction(|tx| {
            let affected = tx.execute(
                "UPDATE tasks SET deleted = TRUE, synced = FALSE, sent_to_server = FALSE, \
                 updated_at = ?2 WHERE id = ?1",
                params![id.to_string(), Utc::now()],
            )?;
            if affected == 0 {
                return Err(ReplicaError::TaskNotFound { id: *id });
            }
            Ok(())
        })?;
        self.after_tracked_write();
        Ok(())
    }

    // ---- queries ----

    /// Fetches a task by ID.
    pub fn get(&self, id: &Uuid) -> ReplicaResult<Option<Task>> {
        self.replica.with_conn(|conn| {
            let task = conn
                .query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM tasks WHERE id = ?1"),
                    [id.to_string()],
                    Task::from_row,
                )
                .optional()?;
            Ok(task)
        })
    }

    /// Lists tasks that are not soft-deleted, oldest first.
    pub fn list_active(&self) -> ReplicaResult<Vec<Task>> {
        self.replica.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM tasks WHERE deleted = FALSE ORDER BY created_at, id"
            ))?;
            let tasks = stmt
                .query_map([], Task::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Returns the total number of rows, soft-deleted included.
    pub fn count(&self) -> ReplicaResult<u64> {
        self.scalar_count("SELECT COUNT(*) FROM tasks")
    }

    /// Returns the number of rows with `synced = false`.
    pub fn dirty_count(&self) -> ReplicaResult<u64> {
        self.scalar_count("SELECT COUNT(*) FROM tasks WHERE synced = FALSE")
    }

    /// Returns the number of rows awaiting a push.
    pub fn pending_push_count(&self) -> ReplicaResult<u64> {
        self.scalar_count(
            "SELECT COUNT(*) FROM tasks WHERE synced = FALSE AND sent_to_server = FALSE",
        )
    }

    /// Selects the rows awaiting a push, inside a read transaction.
    ///
    /// These are the rows with `synced = false AND sent_to_server = false`:
    /// dirty, and not already in flight.
    pub fn pending_push(&self) -> ReplicaResult<Vec<Task>> {
        self.replica.transaction(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM tasks \
                 WHERE synced = FALSE AND sent_to_server = FALSE ORDER BY updated_at, id"
            ))?;
            let tasks = stmt
                .query_map([], Task::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    // ---- replication write path ----

    /// Bulk-loads snapshot rows, verbatim, in one transaction.
    ///
    /// Fast path for the initial shape snapshot: one prepared statement,
    /// row state exactly as delivered. Runs under a replication scope.
    pub fn bulk_load(&self, tasks: &[Task]) -> ReplicaResult<usize> {
        let _scope = self.replica.replication_scope();
        self.replica.transaction(|tx| {
            let mut stmt = tx.prepare(UPSERT_SQL)?;
            for task in tasks {
                stmt.execute(task_params(task))?;
            }
            Ok(tasks.len())
        })
    }

    /// Applies replicated changes in delivery order, in one transaction.
    ///
    /// Upserts are last-writer-wins by primary key, so re-delivered events
    /// are harmless. Runs under a replication scope.
    pub fn apply_batch(&self, changes: &[ReplicatedChange]) -> ReplicaResult<()> {
        let _scope = self.replica.replication_scope();
        self.replica.transaction(|tx| {
            for change in changes {
                match change {
                    ReplicatedChange::Upsert(task) => {
                        tx.execute(UPSERT_SQL, task_params(task))?;
                    }
                    ReplicatedChange::Delete(id) => {
                        tx.execute("DELETE FROM tasks WHERE id = ?1", [id.to_string()])?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Applies one replicated upsert.
    pub fn apply_upsert(&self, task: &Task) -> ReplicaResult<()> {
        self.apply_batch(std::slice::from_ref(&ReplicatedChange::Upsert(task.clone())))
    }

    /// Applies one replicated delete.
    pub fn apply_delete(&self, id: &Uuid) -> ReplicaResult<()> {
        self.apply_batch(&[ReplicatedChange::Delete(*id)])
    }

    // ---- acknowledgment ----

    /// Marks one row as sent if its version is unchanged.
    ///
    /// The compare-and-swap-by-version primitive: sets
    /// `sent_to_server = true` only when the stored `updated_at` still
    /// equals `read_updated_at`, the value observed when the row was read
    /// for the push. Returns whether the row was acknowledged. A `false`
    /// return is not an error; the row was edited mid-flight and stays
    /// queued for the next pass.
    pub fn acknowledge_sent(
        &self,
        id: &Uuid,
        read_updated_at: DateTime<Utc>,
    ) -> ReplicaResult<bool> {
        let summary = self.acknowledge_batch(&[(*id, read_updated_at)])?;
        Ok(summary.acknowledged == 1)
    }

    /// Acknowledges a batch of pushed rows, one transaction, version-guarded.
    ///
    /// Runs under a replication scope so the bookkeeping updates are not
    /// mistaken for local edits.
    pub fn acknowledge_batch(
        &self,
        reads: &[(Uuid, DateTime<Utc>)],
    ) -> ReplicaResult<AckSummary> {
        let _scope = self.replica.replication_scope();
        let summary = self.replica.transaction(|tx| {
            let mut summary = AckSummary::default();
            let mut stmt = tx.prepare(
                "UPDATE tasks SET sent_to_server = TRUE WHERE id = ?1 AND updated_at = ?2",
            )?;
            for (id, read_updated_at) in reads {
                let affected = stmt.execute(params![id.to_string(), read_updated_at])?;
                if affected == 1 {
                    summary.acknowledged += 1;
                } else {
                    summary.skipped += 1;
                }
            }
            Ok(summary)
        })?;
        if summary.skipped > 0 {
            debug!(
                table = "tasks",
                skipped = summary.skipped,
                "acknowledgment skipped rows edited mid-flight"
            );
        }
        Ok(summary)
    }

    // ---- internal ----

    fn scalar_count(&self, sql: &str) -> ReplicaResult<u64> {
        self.replica.with_conn(|conn| {
            let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Notifies the outbox observer after a tracked local commit.
    fn after_tracked_write(&self) {
        if self.replica.tracking().is_replication() {
            return;
        }
        if let Ok(dirty) = self.dirty_count() {
            if dirty > 0 {
                self.replica.outbox().notify(dirty);
            }
        }
    }
}

fn get_in_tx(tx: &Transaction<'_>, id: &Uuid) -> ReplicaResult<Option<Task>> {
    let task = tx
        .query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM tasks WHERE id = ?1"),
            [id.to_string()],
            Task::from_row,
        )
        .optional()?;
    Ok(task)
}

/// Owned parameter tuple for the full-row insert/upsert statements.
type TaskParams = (
    String,
    String,
    Option<String>,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    bool,
    bool,
    Option<String>,
    bool,
    bool,
    Option<String>,
);

fn task_params(task: &Task) -> TaskParams {
    (
        task.id.to_string(),
        task.title.clone(),
        task.description.clone(),
        task.completed,
        task.created_at,
        task.updated_at,
        task.due_date,
        task.synced,
        task.sent_to_server,
        task.modified_columns.clone(),
        task.deleted,
        task.is_new,
        task.username.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use std::time::Duration;

    fn store() -> TaskStore {
        let replica = Arc::new(Replica::open_in_memory().unwrap());
        schema::run_migrations(&replica).unwrap();
        TaskStore::new(replica)
    }

    fn server_row(title: &str) -> Task {
        let mut task = Task::new_local(NewTask::new(title));
        task.synced = true;
        task.is_new = false;
        task
    }

    #[test]
    fn create_and_get_round_trip() {
        let store = store();
        let created = store
            .create_local(NewTask::new("buy milk").with_username("ada"))
            .unwrap();

        let fetched = store.get(&created.id).unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(fetched.is_pending_push());
    }

    #[test]
    fn local_create_notifies_outbox() {
        let store = store();
        let rx = store.subscribe_outbox();

        store.create_local(NewTask::new("a")).unwrap();

        let n = rx.recv_timeout(Duration::from_millis(200)).unwrap();
        assert_eq!(n.dirty_rows, 1);
    }

    #[test]
    fn update_tracks_modified_columns_and_bumps_version() {
        let store = store();
        let created = store.create_local(NewTask::new("a")).unwrap();

        let mut edit = created.clone();
        edit.title = "b".into();
        let updated = store.update_local(&edit).unwrap();

        assert!(updated.updated_at > created.updated_at);
        assert_eq!(updated.modified_columns.as_deref(), Some("title"));
        assert_eq!(updated.created_at, created.created_at);

        let mut edit = updated.clone();
        edit.completed = true;
        let updated = store.update_local(&edit).unwrap();
        assert_eq!(updated.modified_columns.as_deref(), Some("title,completed"));
    }

    #[test]
    fn update_missing_task_fails() {
        let store = store();
        let ghost = Task::new_local(NewTask::new("ghost"));
        let err = store.update_local(&ghost).unwrap_err();
        assert!(matches!(err, ReplicaError::TaskNotFound { .. }));
    }

    #[test]
    fn soft_delete_keeps_row_and_flags_dirty() {
        let store = store();
        let created = server_row("done with this");
        store.apply_upsert(&created).unwrap();

        store.delete_local(&created.id).unwrap();

        let row = store.get(&created.id).unwrap().unwrap();
        assert!(row.deleted);
        assert!(row.is_pending_push());
        assert!(row.updated_at > created.updated_at);
        assert!(store.list_active().unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn replication_writes_do_not_notify_outbox() {
        let store = store();
        let rx = store.subscribe_outbox();

        store.bulk_load(&[server_row("from server")]).unwrap();
        store.apply_upsert(&server_row("another")).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(store.dirty_count().unwrap(), 0);
    }

    #[test]
    fn upsert_is_last_writer_wins() {
        let store = store();
        let mut row = server_row("first payload");
        store.apply_upsert(&row).unwrap();

        row.title = "second payload".into();
        store.apply_upsert(&row).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let stored = store.get(&row.id).unwrap().unwrap();
        assert_eq!(stored.title, "second payload");
    }

    #[test]
    fn apply_batch_preserves_delivery_order() {
        let store = store();
        let row = server_row("t");
        store
            .apply_batch(&[
                ReplicatedChange::Upsert(row.clone()),
                ReplicatedChange::Delete(row.id),
            ])
            .unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn acknowledge_requires_unchanged_version() {
        let store = store();
        let created = store.create_local(NewTask::new("a")).unwrap();

        // Version unchanged: acknowledged.
        assert!(store.acknowledge_sent(&created.id, created.updated_at).unwrap());
        let row = store.get(&created.id).unwrap().unwrap();
        assert!(row.sent_to_server);
        assert_eq!(row.updated_at, created.updated_at);
    }

    #[test]
    fn acknowledge_skips_rows_edited_after_read() {
        let store = store();
        let created = store.create_local(NewTask::new("a")).unwrap();
        let read_version = created.updated_at;

        // Edit lands between the push read and the acknowledgment.
        let mut edit = created.clone();
        edit.title = "edited mid-flight".into();
        store.update_local(&edit).unwrap();

        let summary = store
            .acknowledge_batch(&[(created.id, read_version)])
            .unwrap();
        assert_eq!(summary, AckSummary { acknowledged: 0, skipped: 1 });

        let row = store.get(&created.id).unwrap().unwrap();
        assert!(!row.sent_to_server);
        assert!(row.is_pending_push());
    }

    #[test]
    fn pending_push_excludes_sent_rows() {
        let store = store();
        let a = store.create_local(NewTask::new("a")).unwrap();
        let b = store.create_local(NewTask::new("b")).unwrap();

        store.acknowledge_sent(&a.id, a.updated_at).unwrap();

        let pending = store.pending_push().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);
    }

    #[test]
    fn server_echo_clears_dirty_state() {
        let store = store();
        let created = store.create_local(NewTask::new("a")).unwrap();
        store.acknowledge_sent(&created.id, created.updated_at).unwrap();

        // The server's confirmation flows back through the feed.
        let mut echo = created.clone();
        echo.synced = true;
        echo.sent_to_server = false;
        echo.is_new = false;
        echo.modified_columns = None;
        store.apply_upsert(&echo).unwrap();

        assert_eq!(store.dirty_count().unwrap(), 0);
        let row = store.get(&created.id).unwrap().unwrap();
        assert!(row.synced);
        assert!(!row.is_new);
    }
}
