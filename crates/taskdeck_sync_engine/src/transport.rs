//! Transport abstractions for the sync engine.
//!
//! Two seams face the network: [`ShapeFeed`] pulls keyed row changes from
//! the feed endpoint, [`ChangeSink`] delivers change sets to the
//! apply-changes endpoint. Both are traits so tests can script responses
//! and the HTTP layer stays swappable.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use taskdeck_sync_protocol::{ChangeSet, FeedBatch, ShapeDescriptor, ShapeOffset};

/// Pulls a continuous replication feed for one shape.
pub trait ShapeFeed: Send + Sync {
    /// Fetches the next batch of changes at `offset`.
    ///
    /// Blocks until data is available or the server's long-poll window
    /// closes; an empty caught-up batch is a normal return, not an error.
    /// `handle` echoes the server-issued shape handle once one is known.
    fn fetch(
        &self,
        shape: &ShapeDescriptor,
        offset: &ShapeOffset,
        handle: Option<&str>,
    ) -> SyncResult<FeedBatch>;
}

/// Delivers change sets to the server's apply-changes endpoint.
pub trait ChangeSink: Send + Sync {
    /// Submits a change set. Returns `Ok(())` only when the batch was
    /// durably accepted (any 2xx response).
    fn apply_changes(&self, changes: &ChangeSet) -> SyncResult<()>;

    /// Cheap health probe; used for diagnostics only.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// A scripted feed for tests.
///
/// Returns queued responses in order; once the script is exhausted it
/// behaves like a caught-up long-poll, returning idle batches after a
/// short pause.
pub struct MockFeed {
    responses: Mutex<VecDeque<SyncResult<FeedBatch>>>,
    endless_failure: Mutex<Option<String>>,
    idle_delay: Duration,
    fetch_count: AtomicUsize,
}

impl MockFeed {
    /// Creates an empty scripted feed.
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            endless_failure: Mutex::new(None),
            idle_delay: Duration::from_millis(5),
            fetch_count: AtomicUsize::new(0),
        }
    }

    /// Queues a batch response.
    pub fn push_batch(&self, batch: FeedBatch) {
        self.responses.lock().push_back(Ok(batch));
    }

    /// Queues an error response.
    pub fn push_error(&self, error: SyncError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Makes every fetch after the script fail, simulating a feed that
    /// never comes back.
    pub fn fail_when_exhausted(&self, message: impl Into<String>) {
        *self.endless_failure.lock() = Some(message.into());
    }

    /// Number of fetches observed.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

impl Default for MockFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ShapeFeed for MockFeed {
    fn fetch(
        &self,
        _shape: &ShapeDescriptor,
        offset: &ShapeOffset,
        _handle: Option<&str>,
    ) -> SyncResult<FeedBatch> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if let Some(response) = self.responses.lock().pop_front() {
            return response;
        }
        std::thread::sleep(self.idle_delay);
        if let Some(message) = self.endless_failure.lock().clone() {
            return Err(SyncError::transport_retryable(message));
        }
        Ok(FeedBatch::idle(offset.clone()))
    }
}

/// A scripted sink for tests.
///
/// Records every submitted change set, serves queued failures first, and
/// tracks in-flight concurrency so mutual-exclusion tests can assert at
/// most one outbound request at a time.
pub struct MockSink {
    calls: Mutex<Vec<ChangeSet>>,
    failures: Mutex<VecDeque<SyncError>>,
    delay: Mutex<Option<Duration>>,
    healthy: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockSink {
    /// Creates a sink that accepts everything.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            delay: Mutex::new(None),
            healthy: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Queues a failure for the next submission.
    pub fn push_failure(&self, error: SyncError) {
        self.failures.lock().push_back(error);
    }

    /// Makes every submission sleep for `delay`, to hold pushes in flight.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Sets the health probe result.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Change sets received, failed submissions included.
    pub fn calls(&self) -> Vec<ChangeSet> {
        self.calls.lock().clone()
    }

    /// Number of submissions received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of concurrently in-flight submissions observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeSink for MockSink {
    fn apply_changes(&self, changes: &ChangeSet) -> SyncResult<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = *self.delay.lock() {
            std::thread::sleep(delay);
        }

        self.calls.lock().push(changes.clone());
        let result = match self.failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
