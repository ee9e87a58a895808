//! Client engine for project-scoped cloud actions.
//!
//! - [`CloudClient`]: the engine facade; initialized once per process with
//!   a [`ClientConfig`] and the host's [`Capabilities`].
//! - Action dispatches flow through a single pipeline that resolves a
//!   valid credential before each call, so concurrent dispatches never
//!   race a token refresh.
//! - Session state is observable as a deduplicated stream with
//!   replay-of-one semantics; realtime socket lifecycle follows the
//!   authenticated subject.
//! - Cloud objects expose per-scope document streams backed by a host
//!   realtime store.

mod config;
mod dispatch;
mod objects;
mod session;
mod socket;
mod token;
mod urls;

#[cfg(test)]
mod testutil;

use std::sync::{Arc, OnceLock};

use cloud_actions_core::traits::{
    HttpTransport, KeyValueStore, RealtimeStore, SocketTransport,
};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};

pub use cloud_actions_core::{
    Action, CloudObjectHandle, Credential, SessionState, SessionStatus, SocketEvent, TokenClaims,
    traits,
};

pub use crate::config::{ClientConfig, ConfigError, Region};
pub use crate::dispatch::DispatchError;
pub use crate::objects::CloudObject;
pub use crate::token::TokenError;

use crate::dispatch::{Dispatcher, Worker};
use crate::objects::CloudObjectManager;
use crate::session::SessionPublisher;
use crate::socket::RealtimeSessionManager;
use crate::token::TokenManager;

/// Host-provided backends the engine runs on.
///
/// Store and HTTP transport are mandatory; socket and realtime document
/// support are optional and their features degrade to no-ops when absent.
pub struct Capabilities {
    pub store: Arc<dyn KeyValueStore>,
    pub http: Arc<dyn HttpTransport>,
    pub socket: Option<Arc<dyn SocketTransport>>,
    pub realtime: Option<Arc<dyn RealtimeStore>>,
}

struct Engine {
    dispatcher: Dispatcher,
    session: SessionPublisher,
    socket: Arc<RealtimeSessionManager>,
    objects: Arc<CloudObjectManager>,
    token: TokenManager,
}

/// The engine facade. One instance per process; every method before
/// [`CloudClient::initialize`] fails with [`ConfigError::NotInitialized`].
#[derive(Default)]
pub struct CloudClient {
    engine: OnceLock<Engine>,
}

impl CloudClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire up the engine and start its worker task. Must run inside a
    /// tokio runtime.
    ///
    /// # Errors
    /// Returns `ConfigError::AlreadyInitialized` on a second call and
    /// propagates configuration validation failures.
    pub fn initialize(&self, config: ClientConfig, caps: Capabilities) -> Result<(), ConfigError> {
        config.validate()?;
        let config = Arc::new(config);

        let session = SessionPublisher::new(SessionState::signed_out());
        let token = TokenManager::new(
            Arc::clone(&config),
            caps.store,
            Arc::clone(&caps.http),
            session.clone(),
        );
        let socket = Arc::new(RealtimeSessionManager::new(Arc::clone(&config), caps.socket));
        let objects = Arc::new(CloudObjectManager::new(
            Arc::clone(&config),
            caps.realtime,
            session.clone(),
        ));

        let (dispatcher, rx) = Dispatcher::channel();
        socket.set_dispatcher(dispatcher.clone());

        let engine = Engine {
            dispatcher,
            session: session.clone(),
            socket: Arc::clone(&socket),
            objects: Arc::clone(&objects),
            token: token.clone(),
        };
        if self.engine.set(engine).is_err() {
            return Err(ConfigError::AlreadyInitialized);
        }

        let worker = Worker {
            config,
            token: token.clone(),
            session: session.clone(),
            socket,
            objects,
            http: caps.http,
        };
        tokio::spawn(worker.run(rx));

        // Surface the persisted session without waiting for a dispatch.
        tokio::spawn(async move {
            match token.current_state().await {
                Ok(state) => session.publish(state),
                Err(e) => tracing::debug!("Initial session read failed: {e}"),
            }
        });

        Ok(())
    }

    /// Dispatch an action; answers with the server's response entries.
    ///
    /// # Errors
    /// Fails when the engine is uninitialized or disposed, when no valid
    /// credential can be obtained, or when the HTTP call fails.
    pub async fn dispatch(&self, action: Action) -> Result<Vec<serde_json::Value>, DispatchError> {
        self.engine()?.dispatcher.call(action).await
    }

    /// Compose the fully authenticated URL for an action without issuing
    /// the HTTP call. The payload travels in the `data=` query parameter.
    ///
    /// # Errors
    /// Same failure modes as [`CloudClient::dispatch`], minus the call
    /// itself.
    pub async fn dispatch_for_url(&self, action: Action) -> Result<String, DispatchError> {
        self.engine()?.dispatcher.url_only(action).await
    }

    /// Exchange a custom token for a signed-in session.
    ///
    /// # Errors
    /// A rejected token fails with [`DispatchError::Auth`] carrying the
    /// published failure state.
    pub async fn authenticate_with_custom_token(
        &self,
        custom_token: &str,
    ) -> Result<SessionState, DispatchError> {
        self.engine()?
            .dispatcher
            .custom_auth(custom_token.to_string())
            .await
    }

    /// Clear the stored credential and close the realtime socket.
    /// Idempotent.
    ///
    /// # Errors
    /// Fails when the engine is uninitialized or the store rejects the
    /// removal.
    pub async fn sign_out(&self) -> Result<bool, DispatchError> {
        self.engine()?.dispatcher.sign_out().await?;
        Ok(true)
    }

    /// Claims of the currently stored credential, if any.
    ///
    /// # Errors
    /// Fails when the engine is uninitialized or the store read fails.
    pub async fn current_user(&self) -> Result<Option<TokenClaims>, DispatchError> {
        Ok(self.engine()?.token.current_claims().await?)
    }

    /// Session state stream. Yields the latest state immediately, then
    /// every change; consecutive identical states are collapsed.
    ///
    /// # Errors
    /// Fails when the engine is uninitialized.
    pub fn session_states(&self) -> Result<WatchStream<SessionState>, ConfigError> {
        Ok(self.engine()?.session.subscribe())
    }

    /// Latest session state.
    ///
    /// # Errors
    /// Fails when the engine is uninitialized.
    pub fn session_status(&self) -> Result<SessionState, ConfigError> {
        Ok(self.engine()?.session.current())
    }

    /// Realtime socket lifecycle and message events. Slow consumers lose
    /// the oldest events.
    ///
    /// # Errors
    /// Fails when the engine is uninitialized.
    pub fn socket_events(&self) -> Result<BoxStream<'static, SocketEvent>, ConfigError> {
        let rx = self.engine()?.socket.subscribe();
        Ok(BroadcastStream::new(rx)
            .filter_map(|item| async move { item.ok() })
            .boxed())
    }

    /// Instantiate a cloud object and attach its scope subscriptions.
    ///
    /// # Errors
    /// Fails when the engine is uninitialized, the instantiate dispatch
    /// fails, or the server assigns no instance id.
    pub async fn open_cloud_object(
        &self,
        handle: CloudObjectHandle,
    ) -> Result<CloudObject, DispatchError> {
        let engine = self.engine()?;
        engine.objects.open(&engine.dispatcher, handle).await
    }

    /// Stop the worker, close the socket and drop every subscription.
    /// Dispatches after disposal fail with [`DispatchError::EngineClosed`].
    pub fn dispose(&self) {
        if let Some(engine) = self.engine.get() {
            engine.dispatcher.shutdown();
        }
    }

    fn engine(&self) -> Result<&Engine, ConfigError> {
        self.engine.get().ok_or(ConfigError::NotInitialized)
    }

    #[cfg(test)]
    pub(crate) fn socket_event_receiver(
        &self,
    ) -> Result<tokio::sync::broadcast::Receiver<SocketEvent>, ConfigError> {
        Ok(self.engine()?.socket.subscribe())
    }
}
