//! Push path: delivers dirty rows to the apply-changes endpoint.
//!
//! The procedure is read-then-send-then-guarded-ack:
//!
//! 1. A read transaction selects every row with
//!    `synced = false AND sent_to_server = false` into a change set.
//! 2. The change set goes to the server; any 2xx response means the batch
//!    was durably accepted.
//! 3. A second transaction, under a replication scope, marks each pushed
//!    row `sent_to_server = true` — but only if its `updated_at` still
//!    equals the value read in step 1. Rows edited mid-flight are skipped
//!    and stay queued.
//!
//! A failed send changes nothing (step 1 was read-only), so delivery is
//! at-least-once and rows stay dirty until acknowledged. One mutex
//! serializes pushes; an attempt arriving while a push runs is dropped
//! rather than queued, and the dirty rows re-arm the next attempt.

use crate::config::RetryConfig;
use crate::error::SyncResult;
use crate::status::StatusBroadcaster;
use crate::transport::ChangeSink;
use crate::util::sleep_with_stop;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use taskdeck_replica::{OutboxNotification, Task, TaskStore};
use taskdeck_sync_protocol::{ChangeSet, TaskChange};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of one push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The outbox was empty; nothing was sent.
    Idle,
    /// Another push was already in flight; this attempt was dropped.
    AlreadyRunning,
    /// A change set was accepted by the server.
    Pushed {
        /// Rows acknowledged (`sent_to_server = true`).
        acknowledged: usize,
        /// Rows left queued because they were edited mid-flight.
        skipped: usize,
    },
}

/// Counters for push activity.
#[derive(Debug, Clone, Default)]
pub struct PushStats {
    /// Push attempts that found rows to send.
    pub attempts: u64,
    /// Rows acknowledged across all pushes.
    pub pushed_rows: u64,
    /// Acknowledgments skipped by the version guard.
    pub skipped_acks: u64,
    /// Failed attempts (transport or server rejection).
    pub failures: u64,
    /// Last error message, if any.
    pub last_error: Option<String>,
}

/// Serializes and executes push attempts against one replica.
pub struct PushOrchestrator {
    store: TaskStore,
    sink: Arc<dyn ChangeSink>,
    lock: Mutex<()>,
    stats: RwLock<PushStats>,
}

impl PushOrchestrator {
    /// Creates an orchestrator pushing through `sink`.
    pub fn new(store: TaskStore, sink: Arc<dyn ChangeSink>) -> Self {
        Self {
            store,
            sink,
            lock: Mutex::new(()),
            stats: RwLock::new(PushStats::default()),
        }
    }

    /// Returns the store this orchestrator pushes from.
    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Returns a snapshot of the push counters.
    pub fn stats(&self) -> PushStats {
        self.stats.read().clone()
    }

    /// Attempts one push now.
    ///
    /// Returns [`PushOutcome::AlreadyRunning`] without waiting when another
    /// push holds the lock; the caller relies on the outbox observer
    /// re-firing while dirty rows remain.
    pub fn try_push(&self) -> SyncResult<PushOutcome> {
        let Some(_guard) = self.lock.try_lock() else {
            debug!(table = "tasks", "push already in flight, dropping attempt");
            return Ok(PushOutcome::AlreadyRunning);
        };
        self.push_locked()
    }

    fn push_locked(&self) -> SyncResult<PushOutcome> {
        let pending = self.store.pending_push()?;
        if pending.is_empty() {
            return Ok(PushOutcome::Idle);
        }
        self.stats.write().attempts += 1;

        let change_set = ChangeSet {
            tasks: pending.iter().map(change_from_task).collect(),
        };

        if let Err(e) = self.sink.apply_changes(&change_set) {
            let mut stats = self.stats.write();
            stats.failures += 1;
            stats.last_error = Some(e.to_string());
            warn!(
                table = "tasks",
                operation = "push",
                rows = pending.len(),
                error = %e,
                "push failed, rows stay queued"
            );
            return Err(e);
        }

        let reads: Vec<(Uuid, DateTime<Utc>)> =
            pending.iter().map(|t| (t.id, t.updated_at)).collect();
        let summary = self.store.acknowledge_batch(&reads)?;

        {
            let mut stats = self.stats.write();
            stats.pushed_rows += summary.acknowledged as u64;
            stats.skipped_acks += summary.skipped as u64;
            stats.last_error = None;
        }
        info!(
            table = "tasks",
            acknowledged = summary.acknowledged,
            skipped = summary.skipped,
            "change set accepted"
        );

        Ok(PushOutcome::Pushed {
            acknowledged: summary.acknowledged,
            skipped: summary.skipped,
        })
    }
}

fn change_from_task(task: &Task) -> TaskChange {
    TaskChange {
        id: task.id,
        title: task.title.clone(),
        description: task.description.clone(),
        completed: task.completed,
        created_at: task.created_at,
        updated_at: task.updated_at,
        due_date: task.due_date,
        modified_columns: task.modified_columns.clone(),
        deleted: task.deleted,
        is_new: task.is_new,
        username: task.username.clone(),
    }
}

/// Handle to the running push loop.
pub struct PushHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PushHandle {
    /// Stops the loop and waits for it to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PushHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Starts the push loop.
///
/// The loop waits for the initial snapshot to complete, then reacts to
/// outbox notifications. Bursts coalesce into one attempt; failed attempts
/// rearm with the retry schedule's backoff so an unreachable server does
/// not produce a tight loop. Notifications received during backoff fold
/// into the next armed attempt.
pub fn spawn_push_loop(
    orchestrator: Arc<PushOrchestrator>,
    notifications: Receiver<OutboxNotification>,
    status: Arc<StatusBroadcaster>,
    retry: RetryConfig,
) -> PushHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let thread = {
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            // The trigger activates only once the replica holds a snapshot.
            while !stop.load(Ordering::SeqCst) {
                if status.wait_for_done_timeout(Some(Duration::from_millis(100))) {
                    break;
                }
            }

            let mut failures: u32 = 0;
            // Catch up on rows left dirty by a previous session.
            let mut pending = matches!(
                orchestrator.store().pending_push_count(),
                Ok(n) if n > 0
            );

            while !stop.load(Ordering::SeqCst) {
                if !pending {
                    match notifications.recv_timeout(Duration::from_millis(100)) {
                        Ok(notification) => pending = notification.dirty_rows > 0,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                // Coalesce a burst of notifications into one attempt.
                while notifications.try_recv().is_ok() {}

                match orchestrator.try_push() {
                    Ok(PushOutcome::Idle) => {
                        failures = 0;
                        pending = false;
                    }
                    Ok(PushOutcome::Pushed { .. }) => {
                        failures = 0;
                        pending = matches!(
                            orchestrator.store().pending_push_count(),
                            Ok(n) if n > 0
                        );
                    }
                    Ok(PushOutcome::AlreadyRunning) => {
                        // An external push holds the lock; the observer
                        // re-fires while dirty rows remain.
                        pending = false;
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        let delay = retry.delay_for_attempt(failures.min(10));
                        warn!(
                            table = "tasks",
                            operation = "push_retry",
                            error = %e,
                            failures,
                            delay_ms = delay.as_millis() as u64,
                            "push attempt failed, backing off"
                        );
                        sleep_with_stop(delay, &stop);
                        pending = true;
                    }
                }
            }
            debug!(table = "tasks", "push loop stopped");
        })
    };

    PushHandle {
        stop,
        thread: Some(thread),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::transport::MockSink;
    use std::thread;
    use taskdeck_replica::{schema, NewTask, Replica};

    fn store() -> TaskStore {
        let replica = Arc::new(Replica::open_in_memory().unwrap());
        schema::run_migrations(&replica).unwrap();
        TaskStore::new(replica)
    }

    #[test]
    fn push_marks_rows_sent_without_touching_version() {
        let store = store();
        let task = store.create_local(NewTask::new("pay rent")).unwrap();

        let sink = Arc::new(MockSink::new());
        let orchestrator = PushOrchestrator::new(store.clone(), Arc::clone(&sink) as Arc<dyn ChangeSink>);

        let outcome = orchestrator.try_push().unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Pushed {
                acknowledged: 1,
                skipped: 0
            }
        );

        let row = store.get(&task.id).unwrap().unwrap();
        assert!(row.sent_to_server);
        assert_eq!(row.updated_at, task.updated_at);

        let calls = sink.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tasks.len(), 1);
        assert_eq!(calls[0].tasks[0].id, task.id);
        assert!(calls[0].tasks[0].is_new);
    }

    #[test]
    fn empty_outbox_is_idle() {
        let store = store();
        let sink = Arc::new(MockSink::new());
        let orchestrator = PushOrchestrator::new(store, Arc::clone(&sink) as Arc<dyn ChangeSink>);

        assert_eq!(orchestrator.try_push().unwrap(), PushOutcome::Idle);
        assert_eq!(sink.call_count(), 0);
    }

    #[test]
    fn failed_push_leaves_rows_dirty() {
        let store = store();
        store.create_local(NewTask::new("a")).unwrap();

        let sink = Arc::new(MockSink::new());
        sink.push_failure(SyncError::ServerRejected {
            status: 500,
            message: "boom".into(),
        });
        let orchestrator = PushOrchestrator::new(store.clone(), Arc::clone(&sink) as Arc<dyn ChangeSink>);

        assert!(orchestrator.try_push().is_err());
        assert_eq!(store.pending_push_count().unwrap(), 1);
        assert_eq!(orchestrator.stats().failures, 1);

        // The next attempt succeeds and drains the outbox.
        let outcome = orchestrator.try_push().unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Pushed {
                acknowledged: 1,
                skipped: 0
            }
        );
        assert_eq!(store.pending_push_count().unwrap(), 0);
    }

    #[test]
    fn edit_during_flight_is_not_acknowledged() {
        let store = store();
        let task = store.create_local(NewTask::new("original")).unwrap();

        let sink = Arc::new(MockSink::new());
        sink.set_delay(Duration::from_millis(150));
        let orchestrator = Arc::new(PushOrchestrator::new(
            store.clone(),
            Arc::clone(&sink) as Arc<dyn ChangeSink>,
        ));

        let pusher = Arc::clone(&orchestrator);
        let push_thread = thread::spawn(move || pusher.try_push().unwrap());

        // Edit while the change set is in flight.
        thread::sleep(Duration::from_millis(40));
        let mut edit = task.clone();
        edit.title = "edited mid-flight".into();
        store.update_local(&edit).unwrap();

        let outcome = push_thread.join().unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Pushed {
                acknowledged: 0,
                skipped: 1
            }
        );

        let row = store.get(&task.id).unwrap().unwrap();
        assert!(!row.sent_to_server);
        assert!(row.is_pending_push());
        assert_eq!(row.title, "edited mid-flight");

        // The next pass sends the edited state.
        let outcome = orchestrator.try_push().unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Pushed {
                acknowledged: 1,
                skipped: 0
            }
        );
        assert_eq!(sink.calls()[1].tasks[0].title, "edited mid-flight");
    }

    #[test]
    fn concurrent_triggers_produce_one_request() {
        let store = store();
        store.create_local(NewTask::new("a")).unwrap();

        let sink = Arc::new(MockSink::new());
        sink.set_delay(Duration::from_millis(80));
        let orchestrator = Arc::new(PushOrchestrator::new(
            store,
            Arc::clone(&sink) as Arc<dyn ChangeSink>,
        ));

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            thread::spawn(move || orchestrator.try_push().unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        let second = {
            let orchestrator = Arc::clone(&orchestrator);
            thread::spawn(move || orchestrator.try_push().unwrap())
        };

        let outcomes = [first.join().unwrap(), second.join().unwrap()];
        assert!(outcomes.contains(&PushOutcome::AlreadyRunning));
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, PushOutcome::Pushed { .. })));
        assert_eq!(sink.call_count(), 1);
        assert_eq!(sink.max_in_flight(), 1);
    }

    #[test]
    fn soft_deletes_travel_in_the_change_set() {
        let store = store();
        let task = store.create_local(NewTask::new("to delete")).unwrap();
        store.delete_local(&task.id).unwrap();

        let sink = Arc::new(MockSink::new());
        let orchestrator = PushOrchestrator::new(store, Arc::clone(&sink) as Arc<dyn ChangeSink>);
        orchestrator.try_push().unwrap();

        let calls = sink.calls();
        assert_eq!(calls[0].tasks.len(), 1);
        assert!(calls[0].tasks[0].deleted);
    }
}
