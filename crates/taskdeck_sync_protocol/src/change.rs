//! Change sets pushed to the apply-changes endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One task row's full state as submitted to the server.
///
/// Field names on the wire are camelCase; the locally-originated flag is
/// serialized as `new`. The sync bookkeeping the client keeps for itself
/// (`synced`, `sent_to_server`) does not travel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskChange {
    /// Stable identifier.
    pub id: Uuid,
    /// Title.
    pub title: String,
    /// Optional description.
    pub description: Option<String>,
    /// Completion flag.
    pub completed: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Version read for this push; the acknowledgment guard compares
    /// against it.
    pub updated_at: DateTime<Utc>,
    /// Optional due date.
    pub due_date: Option<DateTime<Utc>>,
    /// Comma-joined list of locally modified columns, if any.
    pub modified_columns: Option<String>,
    /// Soft-delete marker.
    pub deleted: bool,
    /// True for rows the server has never seen.
    #[serde(rename = "new")]
    pub is_new: bool,
    /// Originating actor, if known.
    pub username: Option<String>,
}

/// An ordered batch of changes pushed in one request, grouped by table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Task rows, in outbox order.
    pub tasks: Vec<TaskChange>,
}

impl ChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the change set carries no rows.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Returns the number of rows across all tables.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change() -> TaskChange {
        TaskChange {
            id: Uuid::nil(),
            title: "pay rent".into(),
            description: None,
            completed: false,
            created_at: "2026-02-01T08:00:00Z".parse().unwrap(),
            updated_at: "2026-02-01T08:30:00Z".parse().unwrap(),
            due_date: None,
            modified_columns: Some("title".into()),
            deleted: false,
            is_new: true,
            username: Some("ada".into()),
        }
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let value = serde_json::to_value(change()).unwrap();
        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_some());
        assert!(value.get("dueDate").is_some());
        assert!(value.get("modifiedColumns").is_some());
        assert_eq!(value["new"], serde_json::json!(true));
        assert!(value.get("is_new").is_none());
    }

    #[test]
    fn change_set_round_trip() {
        let set = ChangeSet {
            tasks: vec![change()],
        };
        let body = serde_json::to_string(&set).unwrap();
        let decoded: ChangeSet = serde_json::from_str(&body).unwrap();
        assert_eq!(decoded, set);
        assert_eq!(decoded.len(), 1);
        assert!(!decoded.is_empty());
    }
}
