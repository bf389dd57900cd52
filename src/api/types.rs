//! Wire types shared across the control-plane API surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Acknowledgement body returned by mutation endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    /// Human-readable confirmation from the server.
    pub message: String,
}

/// Coarse state of a remote long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    /// The server did not report a recognizable state.
    Unknown,
    /// Accepted but not started.
    Pending,
    /// In progress.
    Running,
    /// Finished successfully (terminal).
    Succeeded,
    /// Finished with an error (terminal).
    Failed,
    /// Serving/active (terminal, used by routes).
    Ready,
}

impl OperationState {
    /// Maps a raw server state string onto the coarse state set.
    ///
    /// Anything outside the recognized vocabulary is `Unknown`; the raw
    /// string stays available on [`OperationStatus`].
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "Pending" | "Scheduling" => Self::Pending,
            "Running" | "Processing" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Ready" => Self::Ready,
            _ => Self::Unknown,
        }
    }

    /// Returns true for states in the terminal set.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Ready)
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Ready => "ready",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of a remote operation's status.
#[derive(Debug, Clone)]
pub struct OperationStatus {
    /// Coarse state.
    pub state: OperationState,
    /// The exact state string the server reported.
    pub raw_state: String,
    /// Optional status/log line accompanying the state.
    pub message: Option<String>,
}

impl OperationStatus {
    /// Builds a status from a raw state string.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        let raw_state = raw.into();
        Self {
            state: OperationState::from_raw(&raw_state),
            raw_state,
            message: None,
        }
    }

    /// Attaches a status message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Extracts the status from a resource document (`status.state` plus an
    /// optional `status.message`).
    #[must_use]
    pub fn from_document(document: &Value) -> Self {
        let raw = document
            .pointer("/status/state")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut status = Self::from_raw(raw);
        if let Some(message) = document.pointer("/status/message").and_then(Value::as_str) {
            status = status.with_message(message);
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(OperationState::from_raw("Running"), OperationState::Running);
        assert_eq!(OperationState::from_raw("Ready"), OperationState::Ready);
        assert_eq!(OperationState::from_raw(""), OperationState::Unknown);
        assert_eq!(
            OperationState::from_raw("SomethingNew"),
            OperationState::Unknown
        );
    }

    #[test]
    fn test_terminal_set() {
        assert!(OperationState::Succeeded.is_terminal());
        assert!(OperationState::Failed.is_terminal());
        assert!(OperationState::Ready.is_terminal());
        assert!(!OperationState::Running.is_terminal());
        assert!(!OperationState::Unknown.is_terminal());
    }

    #[test]
    fn test_from_document_preserves_raw_state() {
        let doc = serde_json::json!({
            "name": "mt-1",
            "status": {"state": "Scheduling", "message": "queued on gpu pool"}
        });

        let status = OperationStatus::from_document(&doc);
        assert_eq!(status.state, OperationState::Pending);
        assert_eq!(status.raw_state, "Scheduling");
        assert_eq!(status.message.as_deref(), Some("queued on gpu pool"));
    }
}
