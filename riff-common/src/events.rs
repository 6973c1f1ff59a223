//! Progress channel wire events
//!
//! Messages pushed to a subscriber over its WebSocket, and the messages a
//! subscriber may send back. Every server message serializes as
//! `{"type": <kind>, "data": {...}}` (`pong` carries no data).
//!
//! # Examples
//!
//! ```
//! use riff_common::events::ServerMessage;
//!
//! let msg = ServerMessage::progress(20.0, "Running stem separation...");
//! let json = serde_json::to_value(&msg).unwrap();
//! assert_eq!(json["type"], "progress");
//! assert_eq!(json["data"]["progress"], 20.0);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server → client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Intermediate progress of a job
    Progress(ProgressData),
    /// Job finished; stems are available
    Complete(CompletionData),
    /// Job failed
    Error(ErrorData),
    /// Job was cancelled at the client's request
    Cancelled(CancelledData),
    /// Reply to a client `ping`
    Pong,
    /// Free-form message delivered to every subscriber
    Notice(serde_json::Value),
}

/// Payload of a `progress` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressData {
    /// Percentage complete (0.0 - 100.0)
    pub progress: f64,
    /// Human-readable status label
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Payload of a `complete` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionData {
    /// Stem name → artifact path
    pub stems: BTreeMap<String, String>,
    /// Content fingerprint the stems are cached under
    pub fingerprint: String,
    /// True when the stems came from the cache without recomputation
    pub cached: bool,
}

/// Payload of an `error` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Payload of a `cancelled` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelledData {
    pub reason: String,
}

impl ServerMessage {
    pub fn progress(progress: f64, status: impl Into<String>) -> Self {
        Self::Progress(ProgressData {
            progress,
            status: status.into(),
            metadata: None,
        })
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error(ErrorData {
            error: error.into(),
            details: None,
        })
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(CancelledData {
            reason: reason.into(),
        })
    }

    /// Message kind as it appears in the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress(_) => "progress",
            Self::Complete(_) => "complete",
            Self::Error(_) => "error",
            Self::Cancelled(_) => "cancelled",
            Self::Pong => "pong",
            Self::Notice(_) => "notice",
        }
    }

    /// True for the messages that end a job's event sequence
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete(_) | Self::Error(_) | Self::Cancelled(_)
        )
    }
}

/// Client → server message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Liveness probe, answered with `pong`
    Ping,
}
