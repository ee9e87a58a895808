//! Socket lifecycle events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events published on the realtime session manager's stream.
///
/// Consumers can layer UI or a custom reconnect/backoff policy on top of
/// these; the engine itself only reconnects through the dispatch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketEvent {
    /// Socket opened and bound to a subject.
    Connected { user_id: String },
    /// Transport-level close.
    Disconnected { reason: Option<String> },
    /// Message received from the server.
    Message { payload: Value },
    /// Transport error; published, never thrown.
    Error { message: String },
    /// A reconnect probe was fed into the dispatch pipeline after a close.
    ReconnectRequested,
}
