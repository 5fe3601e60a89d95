//! # taskdeck sync engine
//!
//! Local-first synchronization for the taskdeck client: keeps the embedded
//! replica consistent with the authoritative server store so the
//! application keeps working offline and converges when connectivity
//! returns.
//!
//! This crate provides:
//! - Shape subscription with bulk snapshot load and incremental upserts
//! - Outbox-driven push with version-guarded acknowledgment
//! - Monotonic sync status broadcast across client contexts
//! - Transport seams with HTTP and in-memory implementations
//!
//! ## Architecture
//!
//! The engine closes one loop: local edits flag rows dirty → the push
//! orchestrator delivers them to the apply-changes endpoint → the server's
//! confirmed state streams back through the shape subscription and clears
//! the dirty flags. The server is authoritative throughout.
//!
//! ## Key invariants
//!
//! - A row is acknowledged only if its version is unchanged since the read
//! - Replicated writes never re-trigger the outbox
//! - At most one push is in flight at any time
//! - Snapshot completion is signaled exactly once per session

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod push;
mod shape;
mod status;
mod transport;
mod util;

pub use config::{RetryConfig, SyncConfig};
pub use engine::{SyncEngine, SyncHandle};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpResponse, HttpTransport, LoopbackClient, LoopbackHandler};
pub use push::{spawn_push_loop, PushHandle, PushOrchestrator, PushOutcome, PushStats};
pub use shape::{subscribe_shape, ShapeHandle};
pub use status::{ContextId, CrossContextBroadcast, InMemoryBridge, StatusBroadcaster};
pub use transport::{ChangeSink, MockFeed, MockSink, ShapeFeed};
