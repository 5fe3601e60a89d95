//! Shape descriptors and feed messages.
//!
//! A *shape* is a named, filtered replication feed exposing one upstream
//! table as a continuous stream of keyed row changes plus a continuation
//! offset. The feed client handles long-polling and catch-up; these types
//! only describe what travels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Describes one shape subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeDescriptor {
    /// Upstream table name.
    pub table: String,
    /// Source identifier the feed endpoint multiplexes on.
    pub source_id: String,
    /// Feed endpoint URL.
    pub url: String,
    /// Optional access secret, passed as a query parameter.
    pub secret: Option<String>,
    /// Primary-key column list; upserts are keyed on these.
    pub primary_key: Vec<String>,
}

impl ShapeDescriptor {
    /// Creates a descriptor with `id` as the primary key.
    pub fn new(
        table: impl Into<String>,
        source_id: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            source_id: source_id.into(),
            url: url.into(),
            secret: None,
            primary_key: vec!["id".into()],
        }
    }

    /// Sets the access secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Sets the primary-key column list.
    pub fn with_primary_key(mut self, columns: Vec<String>) -> Self {
        self.primary_key = columns;
        self
    }
}

/// Opaque continuation cursor into a shape feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeOffset(String);

impl ShapeOffset {
    /// The offset requesting the full snapshot from the beginning.
    pub fn initial() -> Self {
        Self("-1".into())
    }

    /// Wraps a server-issued offset.
    pub fn new(offset: impl Into<String>) -> Self {
        Self(offset.into())
    }

    /// Returns true for the initial (pre-snapshot) offset.
    pub fn is_initial(&self) -> bool {
        self.0 == "-1"
    }

    /// The offset as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ShapeOffset {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for ShapeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a keyed row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowOperation {
    /// Row did not exist upstream before.
    Insert,
    /// Row existed and changed.
    Update,
    /// Row was removed upstream.
    Delete,
}

/// One keyed row change delivered by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    /// The change kind.
    pub operation: RowOperation,
    /// Primary-key value of the affected row.
    pub key: String,
    /// Full row payload for insert/update; absent for delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl RowChange {
    /// Creates an insert change.
    pub fn insert(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            operation: RowOperation::Insert,
            key: key.into(),
            value: Some(value),
        }
    }

    /// Creates an update change.
    pub fn update(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            operation: RowOperation::Update,
            key: key.into(),
            value: Some(value),
        }
    }

    /// Creates a delete change.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            operation: RowOperation::Delete,
            key: key.into(),
            value: None,
        }
    }
}

/// One feed response: an append-only batch of changes plus continuation
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedBatch {
    /// Row changes, in delivery order.
    pub changes: Vec<RowChange>,
    /// Cursor to resume from after applying this batch.
    pub offset: ShapeOffset,
    /// True when the feed has caught up with the upstream table; the first
    /// such batch marks snapshot completion.
    #[serde(default)]
    pub up_to_date: bool,
    /// Server-issued shape handle, echoed on subsequent requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

impl FeedBatch {
    /// Creates a batch of changes continuing at `offset`.
    pub fn new(changes: Vec<RowChange>, offset: ShapeOffset, up_to_date: bool) -> Self {
        Self {
            changes,
            offset,
            up_to_date,
            handle: None,
        }
    }

    /// Creates an empty caught-up batch at `offset`.
    pub fn idle(offset: ShapeOffset) -> Self {
        Self::new(Vec::new(), offset, true)
    }

    /// Sets the shape handle.
    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }
}
