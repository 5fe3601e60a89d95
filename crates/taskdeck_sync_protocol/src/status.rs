//! Sync status shared across client contexts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the initial synchronization.
///
/// The phase is monotonic within a session: once [`SyncPhase::Done`] is
/// reached there is no transition back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPhase {
    /// The first snapshot has not finished landing in the replica.
    InitialSync,
    /// The replica holds a complete snapshot.
    Done,
}

impl SyncPhase {
    /// Returns true for [`SyncPhase::Done`].
    pub fn is_done(&self) -> bool {
        matches!(self, SyncPhase::Done)
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::InitialSync => f.write_str("initial-sync"),
            SyncPhase::Done => f.write_str("done"),
        }
    }
}

/// The `(phase, message)` pair published to every interested observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Current phase.
    pub status: SyncPhase,
    /// Human-readable progress message.
    pub message: String,
}

impl SyncStatus {
    /// Creates an initial-sync status with a progress message.
    pub fn initial_sync(message: impl Into<String>) -> Self {
        Self {
            status: SyncPhase::InitialSync,
            message: message.into(),
        }
    }

    /// Creates the done status.
    pub fn done() -> Self {
        Self {
            status: SyncPhase::Done,
            message: "Up to date".into(),
        }
    }

    /// The status published before any sync activity.
    pub fn starting() -> Self {
        Self::initial_sync("Starting sync...")
    }

    /// Returns true once the initial snapshot has completed.
    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&SyncPhase::InitialSync).unwrap(),
            "\"initial-sync\""
        );
        assert_eq!(serde_json::to_string(&SyncPhase::Done).unwrap(), "\"done\"");
    }

    #[test]
    fn status_wire_shape() {
        let status = SyncStatus::initial_sync("Downloading shape data...");
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["status"], serde_json::json!("initial-sync"));
        assert_eq!(value["message"], serde_json::json!("Downloading shape data..."));
        assert!(!status.is_done());
        assert!(SyncStatus::done().is_done());
    }
}
