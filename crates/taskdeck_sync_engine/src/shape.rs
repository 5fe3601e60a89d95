//! Shape subscription: streams server state into the replica.
//!
//! One subscription drives one long-lived feed for one table. Batches are
//! applied transactionally under a replication scope so replicated rows are
//! never mistaken for local edits. The initial snapshot takes a bulk-load
//! path; once the feed reports caught-up, a post-snapshot hook builds the
//! auxiliary query indexes exactly once and the status broadcaster moves to
//! `done`.
//!
//! Feed errors are logged and retried with backoff; they never crash the
//! process. A feed that stays broken simply keeps the status short of
//! `done`.

use crate::config::RetryConfig;
use crate::error::SyncResult;
use crate::status::StatusBroadcaster;
use crate::transport::ShapeFeed;
use crate::util::sleep_with_stop;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use taskdeck_replica::{schema, ReplicatedChange, Task, TaskStore};
use taskdeck_sync_protocol::{
    FeedBatch, RowOperation, ShapeDescriptor, ShapeOffset, SyncStatus,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Handle to a running shape subscription.
///
/// Dropping the handle signals the feed loop to stop at the next
/// opportunity; [`ShapeHandle::unsubscribe`] additionally joins the loop
/// thread for a clean teardown (logout path).
pub struct ShapeHandle {
    stop: Arc<AtomicBool>,
    snapshot_done: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ShapeHandle {
    /// Returns true once the initial snapshot has fully landed.
    pub fn is_snapshot_complete(&self) -> bool {
        self.snapshot_done.load(Ordering::SeqCst)
    }

    /// Stops the feed loop and waits for it to finish.
    pub fn unsubscribe(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ShapeHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Subscribes the replica to a shape and starts streaming.
///
/// Publishes initial-sync progress to `status` and `done` once the first
/// snapshot has settled. If the replica already holds rows, the snapshot
/// landed in an earlier session: the subscription starts in caught-up mode
/// and `done` is published immediately.
pub fn subscribe_shape(
    store: TaskStore,
    feed: Arc<dyn ShapeFeed>,
    shape: ShapeDescriptor,
    status: Arc<StatusBroadcaster>,
    retry: RetryConfig,
) -> SyncResult<ShapeHandle> {
    let had_rows = store.count()? > 0;
    let stop = Arc::new(AtomicBool::new(false));
    let snapshot_done = Arc::new(AtomicBool::new(had_rows));

    if had_rows {
        status.publish(SyncStatus::done());
    } else {
        status.publish(SyncStatus::initial_sync("Downloading shape data..."));
    }

    let thread = {
        let stop = Arc::clone(&stop);
        let snapshot_done = Arc::clone(&snapshot_done);
        std::thread::spawn(move || {
            feed_loop(&store, feed.as_ref(), &shape, &status, &retry, &stop, &snapshot_done);
            debug!(table = %shape.table, "shape subscription stopped");
        })
    };

    Ok(ShapeHandle {
        stop,
        snapshot_done,
        thread: Some(thread),
    })
}

fn feed_loop(
    store: &TaskStore,
    feed: &dyn ShapeFeed,
    shape: &ShapeDescriptor,
    status: &StatusBroadcaster,
    retry: &RetryConfig,
    stop: &AtomicBool,
    snapshot_done: &AtomicBool,
) {
    let mut offset = ShapeOffset::initial();
    let mut handle: Option<String> = None;
    let mut announced_insert = false;
    let mut attempt: u32 = 0;

    while !stop.load(Ordering::SeqCst) {
        let batch = match feed.fetch(shape, &offset, handle.as_deref()) {
            Ok(batch) => batch,
            Err(e) => {
                attempt = attempt.saturating_add(1);
                warn!(
                    table = %shape.table,
                    operation = "feed_fetch",
                    error = %e,
                    attempt,
                    "shape feed fetch failed"
                );
                sleep_with_stop(retry.delay_for_attempt(attempt.min(10)), stop);
                continue;
            }
        };
        attempt = 0;

        if let Some(h) = &batch.handle {
            handle = Some(h.clone());
        }

        if !batch.changes.is_empty() {
            if !snapshot_done.load(Ordering::SeqCst) && !announced_insert {
                status.publish(SyncStatus::initial_sync("Inserting tasks..."));
                announced_insert = true;
            }
            if let Err(e) = apply_feed_batch(store, shape, &batch, snapshot_done.load(Ordering::SeqCst))
            {
                // Offset not advanced: the same batch is refetched and
                // reapplied, which upsert-by-key makes harmless.
                attempt = 1;
                error!(
                    table = %shape.table,
                    operation = "feed_apply",
                    error = %e,
                    "failed to apply feed batch"
                );
                sleep_with_stop(retry.delay_for_attempt(attempt), stop);
                continue;
            }
        }

        offset = batch.offset.clone();

        if batch.up_to_date && !snapshot_done.swap(true, Ordering::SeqCst) {
            // First caught-up batch: the snapshot is complete. The hook and
            // the signal run exactly once, guarded by the swap above.
            status.publish(SyncStatus::initial_sync("Creating indexes..."));
            if let Err(e) = post_snapshot(store) {
                error!(table = %shape.table, operation = "post_snapshot", error = %e, "post-snapshot hook failed");
            }
            info!(table = %shape.table, rows = store.count().unwrap_or(0), "initial snapshot complete");
            status.publish(SyncStatus::done());
        }
    }
}

/// Converts and applies one feed batch.
///
/// Malformed payloads are logged and skipped; they do not fail the batch.
/// Snapshot batches consisting purely of upserts take the bulk-load path.
fn apply_feed_batch(
    store: &TaskStore,
    shape: &ShapeDescriptor,
    batch: &FeedBatch,
    snapshot_complete: bool,
) -> SyncResult<()> {
    let mut changes = Vec::with_capacity(batch.changes.len());

    for change in &batch.changes {
        match change.operation {
            RowOperation::Insert | RowOperation::Update => {
                let Some(value) = &change.value else {
                    warn!(table = %shape.table, key = %change.key, "change without row payload");
                    continue;
                };
                match serde_json::from_value::<Task>(value.clone()) {
                    Ok(task) => changes.push(ReplicatedChange::Upsert(task)),
                    Err(e) => {
                        warn!(
                            table = %shape.table,
                            key = %change.key,
                            error = %e,
                            "skipping malformed row payload"
                        );
                    }
                }
            }
            RowOperation::Delete => match Uuid::parse_str(&change.key) {
                Ok(id) => changes.push(ReplicatedChange::Delete(id)),
                Err(e) => {
                    warn!(table = %shape.table, key = %change.key, error = %e, "skipping malformed delete key");
                }
            },
        }
    }

    if changes.is_empty() {
        return Ok(());
    }

    let all_upserts = changes
        .iter()
        .all(|c| matches!(c, ReplicatedChange::Upsert(_)));

    if !snapshot_complete && all_upserts {
        let tasks: Vec<Task> = changes
            .iter()
            .filter_map(|c| match c {
                ReplicatedChange::Upsert(task) => Some(task.clone()),
                ReplicatedChange::Delete(_) => None,
            })
            .collect();
        store.bulk_load(&tasks)?;
    } else {
        store.apply_batch(&changes)?;
    }

    Ok(())
}

/// Post-snapshot hook: builds the auxiliary query indexes.
///
/// Deferred from bootstrap so the snapshot bulk load does not pay per-row
/// index maintenance.
fn post_snapshot(store: &TaskStore) -> SyncResult<()> {
    schema::create_query_indexes(store.replica())?;
    Ok(())
}
