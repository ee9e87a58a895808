//! Action dispatch pipeline.
//!
//! A single-consumer queue of submitted jobs drained by one worker task.
//! Token resolution for job N+1 never starts before job N's resolution
//! finished, so two dispatches can never race an expired access token into
//! two refresh calls. The HTTP calls themselves run concurrently once a
//! credential is attached.

use std::sync::Arc;

use cloud_actions_core::{
    Action, Credential, SessionState,
    traits::{HttpTransport, TransportError},
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{
    config::{ClientConfig, ConfigError},
    objects::CloudObjectManager,
    session::SessionPublisher,
    socket::RealtimeSessionManager,
    token::{TokenError, TokenManager},
    urls,
};

/// Dispatch error, surfaced through the per-call future.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Token error: {0}")]
    Token(#[from] TokenError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Authentication failed: {}", .0.message.as_deref().unwrap_or("rejected"))]
    Auth(SessionState),
    #[error("Cloud object error: {0}")]
    Object(String),
    #[error("Engine is no longer running")]
    EngineClosed,
}

pub(crate) enum JobKind {
    Call(Action),
    UrlOnly(Action),
    CustomAuth(String),
    SignOut,
    /// Token + reconnect check only; fed by the socket close handler.
    Probe,
    Shutdown,
}

pub(crate) enum Outcome {
    Entries(Vec<Value>),
    Url(String),
    Session(SessionState),
    Done,
}

type Reply = oneshot::Sender<Result<Outcome, DispatchError>>;

pub(crate) struct Job {
    kind: JobKind,
    reply: Option<Reply>,
}

/// Cheap handle submitting jobs into the pipeline.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) async fn call(&self, action: Action) -> Result<Vec<Value>, DispatchError> {
        match self.roundtrip(JobKind::Call(action)).await? {
            Outcome::Entries(entries) => Ok(entries),
            _ => Err(DispatchError::EngineClosed),
        }
    }

    pub(crate) async fn url_only(&self, action: Action) -> Result<String, DispatchError> {
        match self.roundtrip(JobKind::UrlOnly(action)).await? {
            Outcome::Url(url) => Ok(url),
            _ => Err(DispatchError::EngineClosed),
        }
    }

    pub(crate) async fn custom_auth(&self, token: String) -> Result<SessionState, DispatchError> {
        match self.roundtrip(JobKind::CustomAuth(token)).await? {
            Outcome::Session(state) => Ok(state),
            _ => Err(DispatchError::EngineClosed),
        }
    }

    pub(crate) async fn sign_out(&self) -> Result<(), DispatchError> {
        self.roundtrip(JobKind::SignOut).await.map(|_| ())
    }

    /// Queue a token + reconnect check without a caller waiting on it.
    pub(crate) fn probe(&self) {
        let _ = self.tx.send(Job {
            kind: JobKind::Probe,
            reply: None,
        });
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(Job {
            kind: JobKind::Shutdown,
            reply: None,
        });
    }

    async fn roundtrip(&self, kind: JobKind) -> Result<Outcome, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job {
                kind,
                reply: Some(reply),
            })
            .map_err(|_| DispatchError::EngineClosed)?;
        rx.await.map_err(|_| DispatchError::EngineClosed)?
    }
}

/// The single worker task draining the pipeline.
pub(crate) struct Worker {
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) token: TokenManager,
    pub(crate) session: SessionPublisher,
    pub(crate) socket: Arc<RealtimeSessionManager>,
    pub(crate) objects: Arc<CloudObjectManager>,
    pub(crate) http: Arc<dyn HttpTransport>,
}

impl Worker {
    pub(crate) async fn run(self, mut rx: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = rx.recv().await {
            if matches!(job.kind, JobKind::Shutdown) {
                break;
            }
            self.handle(job).await;
        }
        self.socket.close_current().await;
        self.objects.shutdown().await;
    }

    async fn handle(&self, job: Job) {
        match job.kind {
            JobKind::Probe => {
                if let Err(e) = self.resolve().await {
                    tracing::debug!("Reconnect probe failed: {e}");
                }
            }
            JobKind::Call(action) => match self.resolve().await {
                Err(e) => reply(job.reply, Err(e)),
                Ok(credential) => self.issue_call(&credential, action, job.reply),
            },
            JobKind::UrlOnly(action) => {
                // Composes the request URL for out-of-band use; never
                // performs the HTTP call itself.
                let result = match self.resolve().await {
                    Err(e) => Err(e),
                    Ok(credential) => urls::action_url(&self.config, &credential, &action, true)
                        .map(Outcome::Url)
                        .map_err(Into::into),
                };
                reply(job.reply, result);
            }
            JobKind::CustomAuth(token) => match self.token.exchange_custom_token(&token).await {
                Ok(credential) => {
                    let state = SessionState::from_credential(Some(&credential));
                    self.session.publish(state.clone());
                    self.socket.ensure_bound(&credential);
                    self.objects.notify_session(state.clone());
                    reply(job.reply, Ok(Outcome::Session(state)));
                }
                Err(e) => {
                    let state = SessionState::auth_failed(e.to_string());
                    self.session.publish(state.clone());
                    reply(job.reply, Err(DispatchError::Auth(state)));
                }
            },
            JobKind::SignOut => {
                let result = self.token.sign_out().await;
                self.socket.close_current().await;
                self.objects.notify_session(SessionState::signed_out());
                reply(
                    job.reply,
                    result.map(|()| Outcome::Done).map_err(Into::into),
                );
            }
            JobKind::Shutdown => {}
        }
    }

    /// The sequential token-resolution step every job passes through.
    async fn resolve(&self) -> Result<Credential, DispatchError> {
        let credential = self.token.resolve().await?;
        let state = SessionState::from_credential(Some(&credential));
        self.session.publish(state.clone());
        self.socket.ensure_bound(&credential);
        self.objects.notify_session(state);
        Ok(credential)
    }

    /// Issue the HTTP call on its own task; responses for independent
    /// actions may arrive in any order.
    fn issue_call(&self, credential: &Credential, action: Action, reply_tx: Option<Reply>) {
        let is_get = action.is_get();
        let url = match urls::action_url(&self.config, credential, &action, is_get) {
            Ok(url) => url,
            Err(e) => {
                reply(reply_tx, Err(e.into()));
                return;
            }
        };
        let http = Arc::clone(&self.http);
        let payload = action.payload.unwrap_or(Value::Null);

        tokio::spawn(async move {
            let result = if is_get {
                http.get(&url).await
            } else {
                http.post(&url, &payload).await
            };
            reply(
                reply_tx,
                result
                    .map(|value| Outcome::Entries(entries(value)))
                    .map_err(Into::into),
            );
        });
    }
}

fn reply(reply: Option<Reply>, result: Result<Outcome, DispatchError>) {
    if let Some(tx) = reply {
        let _ = tx.send(result);
    }
}

/// Servers answer with an array of response entries; lone objects are
/// wrapped so callers always see a list.
fn entries(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}
