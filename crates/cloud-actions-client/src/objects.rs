//! Cloud object subscriptions.
//!
//! An opened object carries three document subscriptions: the shared
//! public scope, the per-user scope and the per-role scope. The latter
//! two only exist while a subject is signed in; a subject change tears
//! every subscription down and rebuilds it against the new identity.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use cloud_actions_core::{
    Action, CloudObjectHandle, SessionState,
    traits::RealtimeStore,
};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::{
    config::ClientConfig,
    dispatch::{DispatchError, Dispatcher},
    session::SessionPublisher,
    urls,
};

/// Built-in action instantiating a cloud object on the server.
const INSTANTIATE_ACTION: &str = "rbs.core.request.INSTANCE";
/// Built-in action invoking a method on an instance.
const CALL_ACTION: &str = "rbs.core.request.CALL";
/// Top-level document fields with this prefix are server-internal and
/// never reach subscribers.
const PRIVATE_PREFIX: &str = "__";

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq)]
enum ObjectScope {
    Public,
    User,
    Role,
}

struct Subscription {
    id: Uuid,
    scope: ObjectScope,
    class_id: String,
    instance_id: String,
    tx: broadcast::Sender<Value>,
    pump: Mutex<Option<tokio::task::AbortHandle>>,
}

impl Subscription {
    /// Document path for this scope under the given session, or `None`
    /// when the scope needs a subject and nobody is signed in.
    fn path(&self, config: &ClientConfig, state: &SessionState) -> Option<String> {
        let base = urls::instance_path(&config.project_id, &self.class_id, &self.instance_id);
        match self.scope {
            ObjectScope::Public => Some(base),
            ObjectScope::User => state.user_id.as_ref().map(|u| format!("{base}/userState/{u}")),
            ObjectScope::Role => state
                .identity
                .as_ref()
                .map(|i| format!("{base}/roleState/{i}")),
        }
    }

    fn stop(&self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(handle) = pump.take() {
                handle.abort();
            }
        }
    }
}

pub(crate) struct CloudObjectManager {
    config: Arc<ClientConfig>,
    realtime: Option<Arc<dyn RealtimeStore>>,
    session: SessionPublisher,
    registry: Mutex<Vec<Arc<Subscription>>>,
    last_subject: Mutex<(Option<String>, Option<String>)>,
    resubscribe_epoch: AtomicU64,
    resubscribe_gate: tokio::sync::Mutex<()>,
}

impl CloudObjectManager {
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        realtime: Option<Arc<dyn RealtimeStore>>,
        session: SessionPublisher,
    ) -> Self {
        Self {
            config,
            realtime,
            session,
            registry: Mutex::new(Vec::new()),
            last_subject: Mutex::new((None, None)),
            resubscribe_epoch: AtomicU64::new(0),
            resubscribe_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Instantiate the object on the server and attach its scope
    /// subscriptions.
    pub(crate) async fn open(
        self: &Arc<Self>,
        dispatcher: &Dispatcher,
        handle: CloudObjectHandle,
    ) -> Result<CloudObject, DispatchError> {
        let mut payload = json!({ "classId": handle.class_id });
        if let Some(id) = &handle.instance_id {
            payload["instanceId"] = json!(id);
        }
        let entries = dispatcher
            .call(Action::new(INSTANTIATE_ACTION).with_payload(payload))
            .await?;

        // The server assigns the id for new instances; callers opening an
        // existing instance already know it.
        let instance_id = entries
            .first()
            .and_then(|entry| entry.get("instanceId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| handle.instance_id.clone())
            .ok_or_else(|| {
                DispatchError::Object(format!(
                    "instantiate returned no instance id for class {}",
                    handle.class_id
                ))
            })?;

        let public = self.register(ObjectScope::Public, &handle.class_id, &instance_id);
        let user = self.register(ObjectScope::User, &handle.class_id, &instance_id);
        let role = self.register(ObjectScope::Role, &handle.class_id, &instance_id);

        Ok(CloudObject {
            class_id: handle.class_id,
            instance_id,
            dispatcher: dispatcher.clone(),
            manager: Arc::clone(self),
            public,
            user,
            role,
        })
    }

    /// React to a session change coming out of the dispatch pipeline.
    /// Non-blocking; the resubscribe runs on its own task.
    pub(crate) fn notify_session(self: &Arc<Self>, state: SessionState) {
        // The role scope follows the identity, so both parts of the
        // subject decide whether anything changed.
        let subject = (state.user_id.clone(), state.identity.clone());
        {
            let Ok(mut last) = self.last_subject.lock() else {
                return;
            };
            if *last == subject {
                return;
            }
            *last = subject;
        }
        let Some(realtime) = self.realtime.clone() else {
            return;
        };
        if self.snapshot().is_empty() {
            return;
        }

        // Epochs are stamped on the calling (worker) path, so they carry
        // the session order onto the spawned tasks; a superseded task
        // must not resubscribe under an identity already replaced.
        let epoch = self.resubscribe_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let _serialized = manager.resubscribe_gate.lock().await;
            if manager.resubscribe_epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            let subscriptions = manager.snapshot();
            for subscription in &subscriptions {
                subscription.stop();
            }
            realtime.reset().await;
            for subscription in subscriptions {
                manager.spawn_pump(&subscription, &state);
            }
        });
    }

    pub(crate) async fn shutdown(&self) {
        let subscriptions = self.snapshot();
        if let Ok(mut registry) = self.registry.lock() {
            registry.clear();
        }
        for subscription in subscriptions {
            subscription.stop();
        }
        if let Some(realtime) = &self.realtime {
            realtime.reset().await;
        }
    }

    fn snapshot(&self) -> Vec<Arc<Subscription>> {
        self.registry.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn register(
        self: &Arc<Self>,
        scope: ObjectScope,
        class_id: &str,
        instance_id: &str,
    ) -> Arc<Subscription> {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let subscription = Arc::new(Subscription {
            id: Uuid::new_v4(),
            scope,
            class_id: class_id.to_string(),
            instance_id: instance_id.to_string(),
            tx,
            pump: Mutex::new(None),
        });
        if let Ok(mut registry) = self.registry.lock() {
            registry.push(Arc::clone(&subscription));
        }
        self.spawn_pump(&subscription, &self.session.current());
        subscription
    }

    /// Start the document pump for one subscription, if its path exists
    /// under the current session.
    fn spawn_pump(&self, subscription: &Arc<Subscription>, state: &SessionState) {
        let Some(realtime) = self.realtime.clone() else {
            return;
        };
        let Some(path) = subscription.path(&self.config, state) else {
            return;
        };
        let tx = subscription.tx.clone();
        let task = tokio::spawn(async move {
            let mut stream = match realtime.subscribe(&path).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(path, "Document subscription failed: {e}");
                    return;
                }
            };
            while let Some(document) = stream.next().await {
                let _ = tx.send(strip_private(document));
            }
        });
        if let Ok(mut pump) = subscription.pump.lock() {
            *pump = Some(task.abort_handle());
        }
    }

    fn unregister(&self, ids: &[Uuid]) {
        let removed: Vec<Arc<Subscription>> = match self.registry.lock() {
            Ok(mut registry) => {
                let (gone, kept) = registry
                    .drain(..)
                    .partition(|sub| ids.contains(&sub.id));
                *registry = kept;
                gone
            }
            Err(_) => return,
        };
        for subscription in removed {
            subscription.stop();
        }
    }
}

/// Remove server-internal top-level fields before handing a document to
/// subscribers.
fn strip_private(mut document: Value) -> Value {
    if let Value::Object(map) = &mut document {
        map.retain(|key, _| !key.starts_with(PRIVATE_PREFIX));
    }
    document
}

/// An opened cloud object instance.
pub struct CloudObject {
    class_id: String,
    instance_id: String,
    dispatcher: Dispatcher,
    manager: Arc<CloudObjectManager>,
    public: Arc<Subscription>,
    user: Arc<Subscription>,
    role: Arc<Subscription>,
}

impl CloudObject {
    #[must_use]
    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Invoke a method on the instance; answers with the first response
    /// entry.
    pub async fn call(
        &self,
        method: &str,
        payload: Option<Value>,
    ) -> Result<Value, DispatchError> {
        let mut body = json!({
            "classId": self.class_id,
            "instanceId": self.instance_id,
            "method": method,
        });
        if let Some(payload) = payload {
            body["payload"] = payload;
        }
        let entries = self
            .dispatcher
            .call(Action::new(CALL_ACTION).with_payload(body))
            .await?;
        Ok(entries.into_iter().next().unwrap_or(Value::Null))
    }

    /// Shared state documents, visible to every subject.
    #[must_use]
    pub fn public_events(&self) -> BoxStream<'static, Value> {
        scope_stream(&self.public)
    }

    /// Documents scoped to the signed-in user. Silent while signed out.
    #[must_use]
    pub fn user_events(&self) -> BoxStream<'static, Value> {
        scope_stream(&self.user)
    }

    /// Documents scoped to the subject's role. Silent while signed out.
    #[must_use]
    pub fn role_events(&self) -> BoxStream<'static, Value> {
        scope_stream(&self.role)
    }

    /// Detach the object's subscriptions. The server instance lives on.
    pub fn close(&self) {
        self.manager
            .unregister(&[self.public.id, self.user.id, self.role.id]);
    }
}

fn scope_stream(subscription: &Arc<Subscription>) -> BoxStream<'static, Value> {
    BroadcastStream::new(subscription.tx.subscribe())
        .filter_map(|item| async move { item.ok() })
        .boxed()
}

#[cfg(test)]
mod tests {
    use cloud_actions_core::{SessionStatus, claims};
    use serde_json::json;

    use super::*;
    use crate::testutil::{MockHttp, MockRealtime, make_token, wait_until};
    use crate::{Capabilities, CloudClient};
    use cloud_actions_store::MemoryStore;

    fn client_with_realtime(
        http: Arc<MockHttp>,
        realtime: Arc<MockRealtime>,
    ) -> CloudClient {
        let client = CloudClient::new();
        client
            .initialize(
                ClientConfig::new("p1"),
                Capabilities {
                    store: Arc::new(MemoryStore::new()),
                    http,
                    socket: None,
                    realtime: Some(realtime),
                },
            )
            .unwrap();
        client
    }

    fn route_anonymous(http: &MockHttp, user_id: &str) {
        let now = claims::unix_now();
        http.route(
            "/public/anonymous-auth",
            json!({
                "accessToken": make_token(user_id, true, now + 3600),
                "refreshToken": make_token(user_id, true, now + 7200),
            }),
        );
    }

    fn signed_in(user_id: &str, identity: &str) -> SessionState {
        SessionState {
            status: SessionStatus::SignedIn,
            user_id: Some(user_id.to_string()),
            identity: Some(identity.to_string()),
            message: None,
        }
    }

    fn bare_manager(realtime: Arc<MockRealtime>) -> Arc<CloudObjectManager> {
        Arc::new(CloudObjectManager::new(
            Arc::new(ClientConfig::new("p1")),
            Some(realtime as Arc<dyn RealtimeStore>),
            SessionPublisher::new(SessionState::signed_out()),
        ))
    }

    #[test]
    fn test_strip_private_fields() {
        let doc = json!({"__meta": 1, "count": 2, "__v": 3});
        assert_eq!(strip_private(doc), json!({"count": 2}));
        // Non-objects pass through untouched.
        assert_eq!(strip_private(json!([1, 2])), json!([1, 2]));
    }

    #[tokio::test]
    async fn test_open_subscribes_all_three_scopes() {
        let http = Arc::new(MockHttp::new());
        route_anonymous(&http, "anon1");
        http.route(
            "/user/action/p1/rbs.core.request.INSTANCE",
            json!([{ "instanceId": "i1" }]),
        );
        let realtime = Arc::new(MockRealtime::new());
        let client = client_with_realtime(Arc::clone(&http), Arc::clone(&realtime));

        let object = client
            .open_cloud_object(CloudObjectHandle::new("Chat"))
            .await
            .unwrap();
        assert_eq!(object.instance_id(), "i1");

        wait_until(|| realtime.subscribed_paths().len() == 3).await;
        let paths = realtime.subscribed_paths();
        assert!(paths.contains(&"/projects/p1/classes/Chat/instances/i1".to_string()));
        assert!(
            paths.contains(&"/projects/p1/classes/Chat/instances/i1/userState/anon1".to_string())
        );
        assert!(
            paths.contains(
                &"/projects/p1/classes/Chat/instances/i1/roleState/anonymous".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_subject_scopes_skipped_when_signed_out() {
        let http = Arc::new(MockHttp::new());
        route_anonymous(&http, "anon1");
        http.route(
            "/user/action/p1/rbs.core.request.INSTANCE",
            json!([{ "instanceId": "i1" }]),
        );
        let realtime = Arc::new(MockRealtime::new());
        let client = client_with_realtime(Arc::clone(&http), Arc::clone(&realtime));

        let object = client
            .open_cloud_object(CloudObjectHandle::new("Chat"))
            .await
            .unwrap();
        client.sign_out().await.unwrap();

        // After sign-out the realtime layer was reset; only the public
        // scope comes back.
        wait_until(|| realtime.reset_count() >= 1).await;
        wait_until(|| {
            realtime
                .subscribed_paths()
                .iter()
                .any(|p| p.ends_with("/instances/i1"))
        })
        .await;
        assert!(
            realtime
                .subscribed_paths()
                .iter()
                .all(|p| !p.contains("/userState/") && !p.contains("/roleState/"))
        );
        drop(object);
    }

    #[tokio::test]
    async fn test_documents_reach_subscribers_with_private_fields_stripped() {
        let http = Arc::new(MockHttp::new());
        route_anonymous(&http, "anon1");
        http.route(
            "/user/action/p1/rbs.core.request.INSTANCE",
            json!([{ "instanceId": "i1" }]),
        );
        let realtime = Arc::new(MockRealtime::new());
        let client = client_with_realtime(Arc::clone(&http), Arc::clone(&realtime));

        let object = client
            .open_cloud_object(CloudObjectHandle::new("Chat"))
            .await
            .unwrap();
        let mut public = object.public_events();

        wait_until(|| realtime.subscribed_paths().len() == 3).await;
        realtime.push(
            "/projects/p1/classes/Chat/instances/i1",
            json!({"__internal": true, "count": 7}),
        );

        let document = public.next().await.unwrap();
        assert_eq!(document, json!({"count": 7}));
    }

    #[tokio::test]
    async fn test_instantiate_adopts_caller_instance_id() {
        let http = Arc::new(MockHttp::new());
        route_anonymous(&http, "anon1");
        // Server acknowledges without echoing the id back.
        http.route("/user/action/p1/rbs.core.request.INSTANCE", json!([{}]));
        let realtime = Arc::new(MockRealtime::new());
        let client = client_with_realtime(Arc::clone(&http), Arc::clone(&realtime));

        let object = client
            .open_cloud_object(CloudObjectHandle::with_instance("Chat", "mine"))
            .await
            .unwrap();
        assert_eq!(object.instance_id(), "mine");
    }

    #[tokio::test]
    async fn test_instantiate_without_any_instance_id_fails() {
        let http = Arc::new(MockHttp::new());
        route_anonymous(&http, "anon1");
        http.route("/user/action/p1/rbs.core.request.INSTANCE", json!([{}]));
        let realtime = Arc::new(MockRealtime::new());
        let client = client_with_realtime(Arc::clone(&http), Arc::clone(&realtime));

        let err = client
            .open_cloud_object(CloudObjectHandle::new("Chat"))
            .await;
        assert!(matches!(err, Err(DispatchError::Object(_))));
    }

    #[tokio::test]
    async fn test_role_identity_change_resubscribes_role_scope() {
        let realtime = Arc::new(MockRealtime::new());
        let manager = bare_manager(Arc::clone(&realtime));
        manager.register(ObjectScope::Public, "Chat", "i1");
        manager.register(ObjectScope::Role, "Chat", "i1");

        manager.notify_session(signed_in("u1", "member"));
        wait_until(|| {
            realtime
                .subscribed_paths()
                .iter()
                .any(|p| p.ends_with("/roleState/member"))
        })
        .await;

        // Same user, new role identity: the role scope follows it.
        manager.notify_session(signed_in("u1", "admin"));
        wait_until(|| {
            realtime
                .subscribed_paths()
                .iter()
                .any(|p| p.ends_with("/roleState/admin"))
        })
        .await;
        assert!(
            realtime
                .subscribed_paths()
                .iter()
                .all(|p| !p.ends_with("/roleState/member"))
        );
    }

    #[tokio::test]
    async fn test_rapid_subject_changes_settle_on_newest_subject() {
        let realtime = Arc::new(MockRealtime::new());
        let manager = bare_manager(Arc::clone(&realtime));
        manager.register(ObjectScope::Public, "Chat", "i1");
        manager.register(ObjectScope::User, "Chat", "i1");

        // Back-to-back changes: whichever resubscribe task runs last,
        // only the newer subject may own the subscriptions.
        manager.notify_session(signed_in("u1", "enduser"));
        manager.notify_session(signed_in("u2", "enduser"));

        wait_until(|| {
            realtime
                .subscribed_paths()
                .iter()
                .any(|p| p.ends_with("/userState/u2"))
        })
        .await;
        assert!(
            realtime
                .subscribed_paths()
                .iter()
                .all(|p| !p.contains("/userState/u1"))
        );
    }

    #[tokio::test]
    async fn test_call_invokes_method_action() {
        let http = Arc::new(MockHttp::new());
        route_anonymous(&http, "anon1");
        http.route(
            "/user/action/p1/rbs.core.request.INSTANCE",
            json!([{ "instanceId": "i1" }]),
        );
        http.route(
            "/user/action/p1/rbs.core.request.CALL",
            json!([{ "answer": 42 }]),
        );
        let realtime = Arc::new(MockRealtime::new());
        let client = client_with_realtime(Arc::clone(&http), Arc::clone(&realtime));

        let object = client
            .open_cloud_object(CloudObjectHandle::new("Chat"))
            .await
            .unwrap();
        let response = object.call("ask", Some(json!({"q": "?"}))).await.unwrap();
        assert_eq!(response, json!({ "answer": 42 }));
        assert_eq!(http.call_count("rbs.core.request.CALL"), 1);
    }
}
