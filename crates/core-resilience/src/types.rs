//! Request, response and status records shared by the queue and its callers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// One unit of work submitted for inference.
///
/// The identifier is assigned by the caller; the queue rejects an identifier
/// that already has a live record but does not generate identifiers itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Caller-assigned identifier (correlation key)
    pub id: String,

    /// Operation kind, e.g. "preview" or "critical"
    pub mode: String,

    /// Content handed to the backend
    pub content: String,

    /// Submitting user
    #[serde(default)]
    pub user_id: i64,

    /// Caller-suggested attempt budget (0 = use the executor's configuration)
    #[serde(default)]
    pub max_retry: u32,
}

impl Request {
    pub fn new(id: impl Into<String>, mode: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mode: mode.into(),
            content: content.into(),
            user_id: 0,
            max_retry: 0,
        }
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }
}

/// Result of a finished request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Identifier of the request this answers
    pub request_id: String,

    /// Opaque result produced by whoever called the backend
    pub result: serde_json::Value,

    /// Wall time the operation took, retries included
    pub duration: Duration,
}

impl Response {
    pub fn new(
        request_id: impl Into<String>,
        result: serde_json::Value,
        duration: Duration,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            result,
            duration,
        }
    }
}

/// Lifecycle state of an admitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// Admitted, waiting to be taken
    Queued,
    /// Taken by a consumer
    Processing,
    /// Finished successfully
    Complete,
    /// Finished unsuccessfully
    Failed,
}

impl RequestState {
    /// Complete and Failed are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Complete | RequestState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Queued => "queued",
            RequestState::Processing => "processing",
            RequestState::Complete => "complete",
            RequestState::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a request's status record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestStatus {
    pub request_id: String,
    pub state: RequestState,
    /// When the state last changed
    pub updated_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = Request::new("req-1", "preview", "fn main() {}")
            .with_user(123)
            .with_max_retry(5);

        assert_eq!(req.id, "req-1");
        assert_eq!(req.mode, "preview");
        assert_eq!(req.user_id, 123);
        assert_eq!(req.max_retry, 5);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RequestState::Queued.is_terminal());
        assert!(!RequestState::Processing.is_terminal());
        assert!(RequestState::Complete.is_terminal());
        assert!(RequestState::Failed.is_terminal());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&RequestState::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert_eq!(RequestState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_request_defaults_when_deserializing() {
        let req: Request =
            serde_json::from_str(r#"{"id":"r","mode":"skim","content":"x"}"#).unwrap();
        assert_eq!(req.user_id, 0);
        assert_eq!(req.max_retry, 0);
    }
}
