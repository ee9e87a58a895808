//! Shared mocks and token builders for the crate's tests.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use cloud_actions_core::{
    Credential, TokenClaims,
    traits::{
        DocumentStream, HttpTransport, RealtimeStore, SocketConnection, SocketTransport,
        TransportError,
    },
};
use futures::StreamExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;

/// Sign a claims token with a throwaway secret.
pub fn make_token(user_id: &str, anonymous: bool, exp: i64) -> String {
    let claims = TokenClaims {
        user_id: Some(user_id.to_string()),
        identity: Some(if anonymous { "anonymous" } else { "enduser" }.to_string()),
        anonymous,
        exp: Some(exp),
        ..TokenClaims::default()
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

/// Credential whose tokens carry the given expiries.
pub fn make_credential(user_id: &str, access_exp: i64, refresh_exp: i64) -> Credential {
    Credential::from_tokens(
        make_token(user_id, user_id.starts_with("anon"), access_exp),
        make_token(user_id, user_id.starts_with("anon"), refresh_exp),
    )
}

struct Route {
    url_fragment: String,
    response: Value,
}

/// Records every request and answers from a table of URL-fragment routes.
/// Unrouted requests fail with HTTP 404.
#[derive(Default)]
pub struct MockHttp {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<(&'static str, String)>>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url_fragment: &str, response: Value) {
        self.routes.lock().unwrap().push(Route {
            url_fragment: url_fragment.to_string(),
            response,
        });
    }

    /// Number of recorded requests whose URL contains `fragment`.
    pub fn call_count(&self, fragment: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, url)| url.contains(fragment))
            .count()
    }

    /// Most recent request URL containing `fragment`.
    pub fn last_url(&self, fragment: &str) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, url)| url.contains(fragment))
            .map(|(_, url)| url.clone())
    }

    fn respond(&self, method: &'static str, url: &str) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push((method, url.to_string()));
        self.routes
            .lock()
            .unwrap()
            .iter()
            .find(|route| url.contains(&route.url_fragment))
            .map(|route| route.response.clone())
            .ok_or(TransportError::Status {
                status: 404,
                message: format!("no mock route for {url}"),
            })
    }
}

#[async_trait]
impl HttpTransport for MockHttp {
    async fn get(&self, url: &str) -> Result<Value, TransportError> {
        self.respond("GET", url)
    }

    async fn post(&self, url: &str, _body: &Value) -> Result<Value, TransportError> {
        self.respond("POST", url)
    }
}

/// Handle to one mock socket connection.
pub struct MockSocketHandle {
    pub url: String,
    pub closed: Arc<AtomicBool>,
    server_tx: Mutex<Option<mpsc::UnboundedSender<Value>>>,
}

impl MockSocketHandle {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Inject a server-sent message.
    pub fn send_server(&self, message: Value) {
        if let Some(tx) = self.server_tx.lock().unwrap().as_ref() {
            let _ = tx.send(message);
        }
    }

    /// Drop the server side so the reader sees the stream end.
    pub fn simulate_remote_close(&self) {
        self.server_tx.lock().unwrap().take();
    }
}

/// Records opened connections and lets tests drive them.
#[derive(Default)]
pub struct MockSocket {
    connections: Mutex<Vec<Arc<MockSocketHandle>>>,
    pub fail_connect: AtomicBool,
}

impl MockSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connections(&self) -> Vec<Arc<MockSocketHandle>> {
        self.connections.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

#[async_trait]
impl SocketTransport for MockSocket {
    async fn connect(&self, url: &str) -> Result<Box<dyn SocketConnection>, TransportError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Socket("connection refused".into()));
        }
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let handle = Arc::new(MockSocketHandle {
            url: url.to_string(),
            closed: Arc::clone(&closed),
            server_tx: Mutex::new(Some(server_tx)),
        });
        self.connections.lock().unwrap().push(handle);
        Ok(Box::new(MockConnection { server_rx, closed }))
    }
}

struct MockConnection {
    server_rx: mpsc::UnboundedReceiver<Value>,
    closed: Arc<AtomicBool>,
}

/// Records document subscriptions and lets tests push snapshots.
#[derive(Default)]
pub struct MockRealtime {
    paths: Mutex<Vec<String>>,
    resets: AtomicUsize,
    feeds: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl MockRealtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths subscribed since the last reset.
    pub fn subscribed_paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Push a document snapshot into a subscribed path.
    pub fn push(&self, path: &str, document: Value) {
        if let Some(tx) = self.feeds.lock().unwrap().get(path) {
            let _ = tx.send(document);
        }
    }
}

#[async_trait]
impl RealtimeStore for MockRealtime {
    async fn subscribe(&self, path: &str) -> Result<DocumentStream, TransportError> {
        self.paths.lock().unwrap().push(path.to_string());
        let rx = self
            .feeds
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_insert_with(|| broadcast::channel(16).0)
            .subscribe();
        Ok(BroadcastStream::new(rx)
            .filter_map(|item| async move { item.ok() })
            .boxed())
    }

    async fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().unwrap().clear();
        // Dropping the senders ends every live stream.
        self.feeds.lock().unwrap().clear();
    }
}

/// Poll until `predicate` holds; panics after two seconds.
pub async fn wait_until(predicate: impl Fn() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[async_trait]
impl SocketConnection for MockConnection {
    async fn next_message(&mut self) -> Option<Result<Value, TransportError>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.server_rx.recv().await.map(Ok)
    }

    async fn send(&mut self, _message: &Value) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
