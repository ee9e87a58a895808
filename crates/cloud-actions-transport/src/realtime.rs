//! Per-path realtime document subscriptions over one socket connection.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use cloud_actions_core::traits::{
    DocumentStream, RealtimeStore, SocketConnection, SocketTransport, TransportError,
};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;

/// Capacity per subscribed path; slow consumers drop old snapshots.
const CHANNEL_CAPACITY: usize = 64;

type SubscriberMap = Arc<Mutex<HashMap<String, broadcast::Sender<Value>>>>;

/// Multiplexes document subscriptions over a single socket connection.
///
/// Wire frames are `{"type": "subscribe", "path": ...}` outbound and
/// `{"path": ..., "data": ...}` inbound. The connection is opened lazily on
/// the first subscription and torn down by `reset`.
pub struct SocketRealtimeStore {
    socket: Arc<dyn SocketTransport>,
    url: String,
    active: Arc<tokio::sync::Mutex<Option<Active>>>,
    generation: std::sync::atomic::AtomicU64,
}

struct Active {
    generation: u64,
    outbox: mpsc::UnboundedSender<Value>,
    subscribers: SubscriberMap,
}

impl SocketRealtimeStore {
    /// `url` is the fully composed socket endpoint, credential included.
    #[must_use]
    pub fn new(socket: Arc<dyn SocketTransport>, url: impl Into<String>) -> Self {
        Self {
            socket,
            url: url.into(),
            active: Arc::new(tokio::sync::Mutex::new(None)),
            generation: std::sync::atomic::AtomicU64::new(0),
        }
    }

    async fn start(&self) -> Result<Active, TransportError> {
        let conn = self.socket.connect(&self.url).await?;
        let (outbox, rx) = mpsc::unbounded_channel();
        let subscribers: SubscriberMap = Arc::new(Mutex::new(HashMap::new()));
        let generation = self
            .generation
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;

        tokio::spawn(pump(
            conn,
            rx,
            Arc::clone(&subscribers),
            Arc::clone(&self.active),
            generation,
        ));

        Ok(Active {
            generation,
            outbox,
            subscribers,
        })
    }
}

enum PumpEvent {
    Outbound(Option<Value>),
    Inbound(Option<Result<Value, TransportError>>),
}

async fn pump(
    mut conn: Box<dyn SocketConnection>,
    mut rx: mpsc::UnboundedReceiver<Value>,
    subscribers: SubscriberMap,
    active: Arc<tokio::sync::Mutex<Option<Active>>>,
    generation: u64,
) {
    loop {
        let event = tokio::select! {
            out = rx.recv() => PumpEvent::Outbound(out),
            msg = conn.next_message() => PumpEvent::Inbound(msg),
        };

        match event {
            PumpEvent::Outbound(Some(frame)) => {
                if let Err(e) = conn.send(&frame).await {
                    tracing::warn!("Failed to send realtime frame: {e}");
                }
            }
            // Store was reset; close and end every subscription stream.
            PumpEvent::Outbound(None) => {
                conn.close().await;
                break;
            }
            PumpEvent::Inbound(Some(Ok(message))) => route(&subscribers, &message),
            PumpEvent::Inbound(Some(Err(e))) => {
                tracing::warn!("Realtime socket error: {e}");
            }
            PumpEvent::Inbound(None) => break,
        }
    }

    if let Ok(mut map) = subscribers.lock() {
        map.clear();
    }
    // Only clear the slot if no newer connection replaced this one.
    let mut slot = active.lock().await;
    if slot.as_ref().is_some_and(|a| a.generation == generation) {
        *slot = None;
    }
}

fn route(subscribers: &SubscriberMap, message: &Value) {
    let Some(path) = message.get("path").and_then(Value::as_str) else {
        tracing::debug!("Realtime message without path: {message}");
        return;
    };
    let data = message.get("data").cloned().unwrap_or(Value::Null);

    let Ok(map) = subscribers.lock() else {
        return;
    };
    if let Some(sender) = map.get(path) {
        let _ = sender.send(data);
    }
}

#[async_trait]
impl RealtimeStore for SocketRealtimeStore {
    async fn subscribe(&self, path: &str) -> Result<DocumentStream, TransportError> {
        let mut slot = self.active.lock().await;
        if slot.is_none() {
            *slot = Some(self.start().await?);
        }
        let active = slot
            .as_ref()
            .ok_or_else(|| TransportError::Socket("realtime store not running".into()))?;

        let receiver = {
            let mut map = active
                .subscribers
                .lock()
                .map_err(|e| TransportError::Socket(e.to_string()))?;
            map.entry(path.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        active
            .outbox
            .send(json!({ "type": "subscribe", "path": path }))
            .map_err(|e| TransportError::Socket(e.to_string()))?;

        Ok(BroadcastStream::new(receiver)
            .filter_map(|res| async move { res.ok() })
            .boxed())
    }

    async fn reset(&self) {
        // Dropping the outbox ends the pump, which closes the connection
        // and ends every subscriber stream.
        self.active.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_matches_path() {
        let subscribers: SubscriberMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = broadcast::channel(4);
        subscribers
            .lock()
            .unwrap()
            .insert("/projects/p/classes/c/instances/i".into(), tx);

        route(
            &subscribers,
            &json!({ "path": "/projects/p/classes/c/instances/i", "data": { "n": 1 } }),
        );
        assert_eq!(rx.try_recv().unwrap(), json!({ "n": 1 }));

        // Unknown paths and pathless frames are dropped.
        route(&subscribers, &json!({ "path": "/other", "data": {} }));
        route(&subscribers, &json!({ "hello": true }));
        assert!(rx.try_recv().is_err());
    }
}
