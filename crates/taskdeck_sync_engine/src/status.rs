//! Sync status broadcasting.
//!
//! The status is a `(phase, message)` pair held in a shared slot. The
//! writer notifies its own local subscribers directly and forwards the
//! update to an injected [`CrossContextBroadcast`] so other contexts (tabs,
//! windows, processes of the same client) see it too; the cross-context
//! channel never echoes back to the publishing context.
//!
//! The phase is monotonic within a session: once `done` has been published,
//! later `initial-sync` publications are ignored.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::time::Duration;
use taskdeck_sync_protocol::SyncStatus;
use tracing::debug;

/// Identifies one publishing context to the cross-context channel.
pub type ContextId = u64;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Forwards status updates to other client contexts.
///
/// Implementations deliver to every context except `from`; same-context
/// writes are notified locally by the broadcaster itself. A cross-process
/// implementation would serialize [`SyncStatus`] into its shared slot.
pub trait CrossContextBroadcast: Send + Sync {
    /// Broadcasts a status published by context `from`.
    fn broadcast(&self, from: ContextId, status: &SyncStatus);
}

/// Publishes the sync status to local subscribers and other contexts.
pub struct StatusBroadcaster {
    context_id: ContextId,
    slot: RwLock<SyncStatus>,
    subscribers: RwLock<Vec<Sender<SyncStatus>>>,
    done_waiters: RwLock<Vec<Sender<()>>>,
    bridge: RwLock<Option<Arc<dyn CrossContextBroadcast>>>,
}

impl StatusBroadcaster {
    /// Creates a broadcaster with no bridge attached.
    pub fn new() -> Self {
        Self {
            context_id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::SeqCst),
            slot: RwLock::new(SyncStatus::starting()),
            subscribers: RwLock::new(Vec::new()),
            done_waiters: RwLock::new(Vec::new()),
            bridge: RwLock::new(None),
        }
    }

    /// Returns this broadcaster's context ID.
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Attaches the cross-context bridge.
    pub fn set_bridge(&self, bridge: Arc<dyn CrossContextBroadcast>) {
        *self.bridge.write() = Some(bridge);
    }

    /// Returns the current status.
    pub fn current(&self) -> SyncStatus {
        self.slot.read().clone()
    }

    /// Publishes a status update.
    ///
    /// Notifies local subscribers and forwards to the bridge. Updates that
    /// would move the phase backwards are dropped.
    pub fn publish(&self, status: SyncStatus) {
        if !self.apply(&status) {
            return;
        }
        let bridge = self.bridge.read().clone();
        if let Some(bridge) = bridge {
            bridge.broadcast(self.context_id, &status);
        }
    }

    /// Applies a status received from another context.
    ///
    /// Local subscribers are notified; the update is not re-broadcast.
    pub fn receive_external(&self, status: SyncStatus) {
        self.apply(&status);
    }

    /// Subscribes to every future status update applied in this context.
    pub fn subscribe(&self) -> Receiver<SyncStatus> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Blocks until the first `done` status, returning immediately if the
    /// phase is already `done`.
    pub fn wait_for_done(&self) {
        let _ = self.wait_for_done_timeout(None);
    }

    /// Like [`StatusBroadcaster::wait_for_done`] with an optional timeout.
    ///
    /// Returns true if `done` was observed.
    pub fn wait_for_done_timeout(&self, timeout: Option<Duration>) -> bool {
        // Register before checking the slot so a concurrent publication
        // cannot slip between the check and the registration.
        let (tx, rx) = mpsc::channel();
        self.done_waiters.write().push(tx);

        if self.current().is_done() {
            // Any sender still registered is a leftover from an
            // immediate-return wait; pending waiters were drained when
            // `done` fired.
            self.done_waiters.write().clear();
            return true;
        }

        match timeout {
            Some(timeout) => rx.recv_timeout(timeout).is_ok(),
            None => rx.recv().is_ok(),
        }
    }

    /// Applies a status to the slot and notifies local observers.
    ///
    /// Returns false when the update was dropped by the monotonicity gate.
    fn apply(&self, status: &SyncStatus) -> bool {
        {
            let mut slot = self.slot.write();
            if slot.is_done() && !status.is_done() {
                debug!(message = %status.message, "dropping status regression after done");
                return false;
            }
            *slot = status.clone();
        }

        self.subscribers
            .write()
            .retain(|tx| tx.send(status.clone()).is_ok());

        if status.is_done() {
            // One-shot: waiters are notified once and unregistered.
            let waiters = std::mem::take(&mut *self.done_waiters.write());
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
        true
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StatusBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBroadcaster")
            .field("context_id", &self.context_id)
            .field("current", &self.current())
            .finish()
    }
}

/// Connects broadcasters of the same process into one notification domain.
///
/// Stands in for a platform shared-slot mechanism when all contexts live in
/// one process; useful on its own for tests and single-process apps.
#[derive(Default)]
pub struct InMemoryBridge {
    contexts: RwLock<Vec<(ContextId, Weak<StatusBroadcaster>)>>,
}

impl InMemoryBridge {
    /// Creates an empty bridge.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attaches a broadcaster to this bridge.
    pub fn attach(self: &Arc<Self>, broadcaster: &Arc<StatusBroadcaster>) {
        self.contexts
            .write()
            .push((broadcaster.context_id(), Arc::downgrade(broadcaster)));
        broadcaster.set_bridge(Arc::clone(self) as Arc<dyn CrossContextBroadcast>);
    }
}

impl CrossContextBroadcast for InMemoryBridge {
    fn broadcast(&self, from: ContextId, status: &SyncStatus) {
        let contexts = self.contexts.read().clone();
        for (id, weak) in &contexts {
            if *id == from {
                continue;
            }
            if let Some(peer) = weak.upgrade() {
                peer.receive_external(status.clone());
            }
        }
        self.contexts.write().retain(|(_, weak)| weak.strong_count() > 0);
    }
}
