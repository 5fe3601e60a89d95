//! Engine wiring: bootstrap, subscribe, push.
//!
//! Startup order matters: the schema bootstrap runs first and is fatal on
//! failure; the shape subscription then starts streaming server state while
//! publishing status; the push loop arms itself once the initial snapshot
//! has landed. Server-confirmed state re-enters the replica through the
//! same shape subscription, closing the loop.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::push::{spawn_push_loop, PushHandle, PushOrchestrator};
use crate::shape::{subscribe_shape, ShapeHandle};
use crate::status::StatusBroadcaster;
use crate::transport::{ChangeSink, ShapeFeed};
use std::sync::Arc;
use taskdeck_replica::{schema, Replica, TaskStore};
use tracing::info;

/// The sync engine: owns the transports and wires the loops together.
pub struct SyncEngine {
    config: SyncConfig,
    replica: Arc<Replica>,
    feed: Arc<dyn ShapeFeed>,
    sink: Arc<dyn ChangeSink>,
    status: Arc<StatusBroadcaster>,
}

impl SyncEngine {
    /// Creates an engine over the given replica and transports.
    pub fn new(
        config: SyncConfig,
        replica: Arc<Replica>,
        feed: Arc<dyn ShapeFeed>,
        sink: Arc<dyn ChangeSink>,
    ) -> Self {
        Self {
            config,
            replica,
            feed,
            sink,
            status: Arc::new(StatusBroadcaster::new()),
        }
    }

    /// Uses an externally created status broadcaster (e.g. one attached to
    /// a cross-context bridge).
    pub fn with_status(mut self, status: Arc<StatusBroadcaster>) -> Self {
        self.status = status;
        self
    }

    /// Returns the status broadcaster.
    pub fn status(&self) -> Arc<StatusBroadcaster> {
        Arc::clone(&self.status)
    }

    /// Bootstraps the schema and starts the subscription and push loops.
    ///
    /// A schema failure aborts startup and propagates; everything after
    /// bootstrap runs on background threads and reports through logs and
    /// the status broadcaster.
    pub fn start(self) -> SyncResult<SyncHandle> {
        schema::run_migrations(&self.replica)?;

        let store = TaskStore::new(Arc::clone(&self.replica));
        let notifications = store.subscribe_outbox();

        let shape = subscribe_shape(
            store.clone(),
            Arc::clone(&self.feed),
            self.config.shape.clone(),
            Arc::clone(&self.status),
            self.config.retry.clone(),
        )?;

        let orchestrator = Arc::new(PushOrchestrator::new(store.clone(), Arc::clone(&self.sink)));
        let push = spawn_push_loop(
            Arc::clone(&orchestrator),
            notifications,
            Arc::clone(&self.status),
            self.config.retry.clone(),
        );

        info!(table = %self.config.shape.table, "sync engine started");

        Ok(SyncHandle {
            store,
            status: self.status,
            orchestrator,
            shape: Some(shape),
            push: Some(push),
        })
    }
}

/// Handle to a running sync engine.
///
/// Dropping the handle signals both loops to stop; [`SyncHandle::shutdown`]
/// additionally joins them for a clean teardown.
pub struct SyncHandle {
    store: TaskStore,
    status: Arc<StatusBroadcaster>,
    orchestrator: Arc<PushOrchestrator>,
    shape: Option<ShapeHandle>,
    push: Option<PushHandle>,
}

impl SyncHandle {
    /// Returns the task store over the synced replica.
    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Returns the status broadcaster.
    pub fn status(&self) -> &Arc<StatusBroadcaster> {
        &self.status
    }

    /// Returns the push orchestrator (for diagnostics and manual pushes).
    pub fn orchestrator(&self) -> &Arc<PushOrchestrator> {
        &self.orchestrator
    }

    /// Blocks until the initial snapshot has landed.
    pub fn wait_for_initial_sync(&self) {
        self.status.wait_for_done();
    }

    /// Stops the subscription and the push loop, joining both threads.
    pub fn shutdown(mut self) {
        if let Some(shape) = self.shape.take() {
            shape.unsubscribe();
        }
        if let Some(push) = self.push.take() {
            push.stop();
        }
    }
}
