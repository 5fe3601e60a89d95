//! Task records and modified-column bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Columns whose edits are recorded in `modified_columns`.
///
/// The server uses this list to apply partial updates; `created_at` and the
/// sync bookkeeping columns are never user-modified and are not tracked.
pub const TRACKED_COLUMNS: [&str; 5] = ["title", "description", "completed", "due_date", "username"];

/// One row of the `tasks` table, including sync bookkeeping.
///
/// The serde form mirrors the replicated row payload delivered by the shape
/// feed (snake_case column names, the locally-originated flag serialized as
/// `new`). Bookkeeping fields missing from a feed payload default to the
/// fully-synced state, since only server-confirmed rows travel on the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier.
    pub id: Uuid,
    /// Title, non-empty.
    pub title: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Completion flag.
    pub completed: bool,
    /// Creation time (UTC).
    pub created_at: DateTime<Utc>,
    /// Last modification time (UTC). Bumped on every local edit.
    pub updated_at: DateTime<Utc>,
    /// Optional due date.
    pub due_date: Option<DateTime<Utc>>,
    /// True once the row has fully round-tripped through the server.
    #[serde(default = "default_true")]
    pub synced: bool,
    /// True while a push has been sent and the server echo is awaited.
    #[serde(default)]
    pub sent_to_server: bool,
    /// Comma-joined list of locally modified columns, if any.
    #[serde(default)]
    pub modified_columns: Option<String>,
    /// Soft-delete marker. The row replicates before physical removal.
    #[serde(default)]
    pub deleted: bool,
    /// True for locally originated rows the server has never seen.
    #[serde(default, rename = "new")]
    pub is_new: bool,
    /// Originating actor, if known.
    #[serde(default)]
    pub username: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Input for creating a task locally.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Title, non-empty.
    pub title: String,
    /// Optional description.
    pub description: Option<String>,
    /// Optional due date.
    pub due_date: Option<DateTime<Utc>>,
    /// Originating actor, if known.
    pub username: Option<String>,
}

impl NewTask {
    /// Creates a new-task input with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the due date.
    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Sets the originating actor.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

impl Task {
    /// Builds a locally originated task: dirty, unsent, marked new.
    pub fn new_local(input: NewTask) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: input.title,
            description: input.description,
            completed: false,
            created_at: now,
            updated_at: now,
            due_date: input.due_date,
            synced: false,
            sent_to_server: false,
            modified_columns: None,
            deleted: false,
            is_new: true,
            username: input.username,
        }
    }

    /// True if the row awaits a push (`synced = false`, not yet sent).
    pub fn is_pending_push(&self) -> bool {
        !self.synced && !self.sent_to_server
    }

    /// Maps a query row to a task.
    ///
    /// Expects the column names used by the store's SELECT lists.
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let id: String = row.get("id")?;
        let id = Uuid::parse_str(&id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Self {
            id,
            title: row.get("title")?,
            description: row.get("description")?,
            completed: row.get("completed")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            due_date: row.get("due_date")?,
            synced: row.get("synced")?,
            sent_to_server: row.get("sent_to_server")?,
            modified_columns: row.get("modified_columns")?,
            deleted: row.get("deleted")?,
            is_new: row.get("new")?,
            username: row.get("username")?,
        })
    }
}

/// Returns the tracked columns that differ between `original` and `updated`.
pub fn modified_columns(original: &Task, updated: &Task) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if original.title != updated.title {
        changed.push("title");
    }
    if original.description != updated.description {
        changed.push("description");
    }
    if original.completed != updated.completed {
        changed.push("completed");
    }
    if original.due_date != updated.due_date {
        changed.push("due_date");
    }
    if original.username != updated.username {
        changed.push("username");
    }
    changed
}

/// Merges newly modified columns into an existing comma-joined list.
///
/// Order is preserved and duplicates dropped; returns `None` when nothing
/// has been modified.
pub fn merge_modified_columns(existing: Option<&str>, added: &[&str]) -> Option<String> {
    let mut columns: Vec<&str> = existing
        .map(|s| s.split(',').filter(|c| !c.is_empty()).collect())
        .unwrap_or_default();
    for col in added {
        if !columns.contains(col) {
            columns.push(col);
        }
    }
    if columns.is_empty() {
        None
    } else {
        Some(columns.join(","))
    }
}
