//! Deduplicated session state stream.

use cloud_actions_core::SessionState;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Publishes session states with replay-of-one semantics.
///
/// A fresh subscription always starts from the latest state; consecutive
/// states with the same status, subject and identity are collapsed.
#[derive(Clone)]
pub struct SessionPublisher {
    tx: watch::Sender<SessionState>,
}

impl SessionPublisher {
    #[must_use]
    pub fn new(initial: SessionState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Publish a state; deduplicated against the previous one.
    pub fn publish(&self, state: SessionState) {
        self.tx.send_if_modified(|current| {
            if current.dedup_key() == state.dedup_key() {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Latest published state.
    #[must_use]
    pub fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Subscribe; the stream immediately yields the latest state, then
    /// every change.
    #[must_use]
    pub fn subscribe(&self) -> WatchStream<SessionState> {
        WatchStream::new(self.tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use cloud_actions_core::SessionStatus;
    use tokio_stream::StreamExt;

    use super::*;

    fn signed_in(user_id: &str) -> SessionState {
        SessionState {
            status: SessionStatus::SignedIn,
            user_id: Some(user_id.into()),
            identity: Some("enduser".into()),
            message: None,
        }
    }

    #[tokio::test]
    async fn test_replays_latest_on_subscribe() {
        let publisher = SessionPublisher::new(SessionState::signed_out());
        publisher.publish(signed_in("u1"));

        let mut stream = publisher.subscribe();
        let first = stream.next().await.unwrap();
        assert_eq!(first.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_dedups_identical_states() {
        let publisher = SessionPublisher::new(SessionState::signed_out());
        let mut rx = publisher.tx.subscribe();
        rx.mark_unchanged();

        publisher.publish(SessionState::signed_out());
        assert!(!rx.has_changed().unwrap());

        publisher.publish(signed_in("u1"));
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_subject_change_is_published() {
        let publisher = SessionPublisher::new(signed_in("u1"));
        let mut rx = publisher.tx.subscribe();
        rx.mark_unchanged();

        publisher.publish(signed_in("u2"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(publisher.current().user_id.as_deref(), Some("u2"));
    }
}
