//! Capability traits the host environment provides.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store error: {0}")]
    Internal(String),
}

/// Key-value persistence for the running host environment.
///
/// The engine keeps exactly one key in it (the serialized credential). The
/// host application picks the backend: process memory, a file, or a bridge
/// to platform storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Socket error: {0}")]
    Socket(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// HTTP request/response the engine issues dispatches and token calls
/// through. Authentication parameters are already encoded into the URL by
/// the caller.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<Value, TransportError>;
    async fn post(&self, url: &str, body: &Value) -> Result<Value, TransportError>;
}

/// One open realtime socket connection.
#[async_trait]
pub trait SocketConnection: Send {
    /// Next message, or `None` once the peer closed the connection.
    async fn next_message(&mut self) -> Option<Result<Value, TransportError>>;

    /// Send a message to the server.
    async fn send(&mut self, message: &Value) -> Result<(), TransportError>;

    /// Close the connection. Best effort; errors are ignored.
    async fn close(&mut self);
}

/// Opens realtime socket connections.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn SocketConnection>, TransportError>;
}

/// Stream of document snapshots for one subscribed path.
pub type DocumentStream = BoxStream<'static, Value>;

/// Per-path realtime document subscriptions backing cloud object state.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Subscribe to a document path; the stream yields a snapshot per
    /// remote change.
    async fn subscribe(&self, path: &str) -> Result<DocumentStream, TransportError>;

    /// Drop every subscription, e.g. when the authenticated subject
    /// changes. Existing streams observe end-of-stream.
    async fn reset(&self);
}
