//! # taskdeck replica
//!
//! Embedded SQLite replica for the taskdeck client.
//!
//! This crate provides:
//! - Schema bootstrap with destructive legacy-generation migration
//! - The task store and the outbox convention for local writes
//! - Write-origin tracking with a scoped replication guard
//! - The outbox observer feeding the push path
//! - Version-guarded acknowledgment primitives
//!
//! ## Key invariants
//!
//! - The replica is a disposable cache; the server store is authoritative
//! - Every multi-row mutation is transactional
//! - Replication-origin writes never re-enter the outbox
//! - A row is acknowledged only if its version is unchanged since the read

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod db;
mod error;
mod observer;
pub mod schema;
mod store;
mod task;
mod tracking;

pub use db::Replica;
pub use error::{ReplicaError, ReplicaResult};
pub use observer::{OutboxNotification, OutboxObserver};
pub use store::{AckSummary, ReplicatedChange, TaskStore};
pub use task::{merge_modified_columns, modified_columns, NewTask, Task, TRACKED_COLUMNS};
pub use tracking::{ReplicationScope, WriteTracking};
