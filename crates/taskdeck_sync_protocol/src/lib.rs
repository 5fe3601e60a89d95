//! # taskdeck sync protocol
//!
//! Wire types for taskdeck synchronization.
//!
//! This crate provides:
//! - The apply-changes request body ([`ChangeSet`] / [`TaskChange`])
//! - Shape descriptors and feed messages ([`ShapeDescriptor`],
//!   [`FeedBatch`], [`RowChange`], [`ShapeOffset`])
//! - The sync status pair shared across client contexts ([`SyncStatus`])
//!
//! All bodies are JSON. The apply-changes endpoint accepts
//! `{ "tasks": [...] }` with camelCase row fields; the feed delivers
//! append-only batches of keyed row changes plus a continuation offset.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod shape;
mod status;

pub use change::{ChangeSet, TaskChange};
pub use shape::{FeedBatch, RowChange, RowOperation, ShapeDescriptor, ShapeOffset};
pub use status::{SyncPhase, SyncStatus};
