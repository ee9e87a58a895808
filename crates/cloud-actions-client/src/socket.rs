//! Realtime session manager.
//!
//! Owns at most one socket, rebound whenever the authenticated subject
//! changes. The manager never reconnects on its own: a transport-level
//! close feeds a probe into the dispatch pipeline, and the next token
//! resolution runs the reconnect check.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use cloud_actions_core::{
    Credential, SocketEvent,
    traits::{SocketConnection, SocketTransport, TransportError},
};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::{config::ClientConfig, dispatch::Dispatcher, urls};

/// Event stream capacity; slow consumers lose the oldest events.
const EVENT_CAPACITY: usize = 256;

struct BoundSocket {
    id: Uuid,
    user_id: String,
    close_tx: watch::Sender<bool>,
}

/// The singleton binding plus the highest resolution generation that has
/// reached it. Rebind requests are stamped on the worker, so the stamp
/// order is the session order even though the requests themselves run on
/// spawned tasks; a request older than `latest_generation` lost the race
/// and must not touch the binding.
#[derive(Default)]
struct SocketSlot {
    latest_generation: u64,
    bound: Option<BoundSocket>,
}

type Slot = Arc<tokio::sync::Mutex<SocketSlot>>;

pub(crate) struct RealtimeSessionManager {
    config: Arc<ClientConfig>,
    transport: Option<Arc<dyn SocketTransport>>,
    events: broadcast::Sender<SocketEvent>,
    // The dispatcher handle arrives after the pipeline channel exists.
    probe: std::sync::Mutex<Option<Dispatcher>>,
    generation: AtomicU64,
    current: Slot,
}

impl RealtimeSessionManager {
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        transport: Option<Arc<dyn SocketTransport>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            transport,
            events,
            probe: std::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            current: Arc::new(tokio::sync::Mutex::new(SocketSlot::default())),
        }
    }

    pub(crate) fn set_dispatcher(&self, dispatcher: Dispatcher) {
        if let Ok(mut slot) = self.probe.lock() {
            *slot = Some(dispatcher);
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.events.subscribe()
    }

    /// Reconnect check: non-blocking, runs on its own task so a slow
    /// socket open never stalls the pipeline.
    pub(crate) fn ensure_bound(&self, credential: &Credential) {
        let Some(transport) = self.transport.clone() else {
            // Headless host without socket support: a no-op by contract.
            return;
        };
        let subject = subject_of(credential);
        let url = match urls::socket_url(&self.config, &credential.access_token) {
            Ok(url) => url,
            Err(e) => {
                let _ = self.events.send(SocketEvent::Error {
                    message: e.to_string(),
                });
                return;
            }
        };

        // Stamped here, on the sequential worker path, so generations
        // follow the session order even though rebinds run spawned.
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let current = Arc::clone(&self.current);
        let events = self.events.clone();
        let probe = self.probe.lock().ok().and_then(|p| p.clone());
        tokio::spawn(async move {
            rebind(transport, current, events, probe, subject, url, generation).await;
        });
    }

    /// Close the socket; used by sign-out and shutdown.
    pub(crate) async fn close_current(&self) {
        if let Some(old) = self.current.lock().await.bound.take() {
            let _ = old.close_tx.send(true);
        }
    }
}

async fn rebind(
    transport: Arc<dyn SocketTransport>,
    current: Slot,
    events: broadcast::Sender<SocketEvent>,
    probe: Option<Dispatcher>,
    subject: String,
    url: String,
    generation: u64,
) {
    let mut slot = current.lock().await;
    if generation < slot.latest_generation {
        // A newer resolution already reached the slot; this request is
        // stale and must not displace its binding.
        return;
    }
    slot.latest_generation = generation;
    if slot.bound.as_ref().is_some_and(|bound| bound.user_id == subject) {
        return;
    }
    // Identity changed: replace the old connection.
    if let Some(old) = slot.bound.take() {
        let _ = old.close_tx.send(true);
    }

    match transport.connect(&url).await {
        Err(e) => {
            let _ = events.send(SocketEvent::Error {
                message: e.to_string(),
            });
        }
        Ok(conn) => {
            let (close_tx, close_rx) = watch::channel(false);
            let id = Uuid::new_v4();
            slot.bound = Some(BoundSocket {
                id,
                user_id: subject.clone(),
                close_tx,
            });
            let _ = events.send(SocketEvent::Connected { user_id: subject });
            tokio::spawn(read_loop(
                conn,
                close_rx,
                events,
                probe,
                Arc::clone(&current),
                id,
            ));
        }
    }
}

enum ReadEvent {
    CloseRequested,
    Incoming(Option<Result<Value, TransportError>>),
}

async fn read_loop(
    mut conn: Box<dyn SocketConnection>,
    mut close_rx: watch::Receiver<bool>,
    events: broadcast::Sender<SocketEvent>,
    probe: Option<Dispatcher>,
    current: Slot,
    id: Uuid,
) {
    loop {
        let event = tokio::select! {
            _ = close_rx.changed() => ReadEvent::CloseRequested,
            message = conn.next_message() => ReadEvent::Incoming(message),
        };

        match event {
            // Explicit rebind or sign-out: close quietly, no probe.
            ReadEvent::CloseRequested => {
                conn.close().await;
                let _ = events.send(SocketEvent::Disconnected { reason: None });
                return;
            }
            ReadEvent::Incoming(Some(Ok(payload))) => {
                let _ = events.send(SocketEvent::Message { payload });
            }
            ReadEvent::Incoming(Some(Err(e))) => {
                let _ = events.send(SocketEvent::Error {
                    message: e.to_string(),
                });
            }
            ReadEvent::Incoming(None) => {
                let _ = events.send(SocketEvent::Disconnected {
                    reason: Some("transport closed".into()),
                });
                // Unbind so the next token resolution reconnects, then ask
                // the pipeline for one.
                let mut slot = current.lock().await;
                if slot.bound.as_ref().is_some_and(|bound| bound.id == id) {
                    slot.bound = None;
                }
                drop(slot);
                if let Some(probe) = probe {
                    probe.probe();
                    let _ = events.send(SocketEvent::ReconnectRequested);
                }
                return;
            }
        }
    }
}

fn subject_of(credential: &Credential) -> String {
    let claims = credential.claims().unwrap_or_default();
    claims
        .user_id
        .or(claims.identity)
        .unwrap_or_default()
}
