use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

/// The token pair published to downstream consumers whenever an exchange
/// succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Handle for removing a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Publish point for credential updates.
///
/// Each subscriber gets its own channel, so a slow or dropped consumer
/// cannot keep the others from seeing an update. Subscriptions are keyed
/// and individually removable; senders whose receiver has gone away are
/// pruned on the next publish.
pub struct CredentialNotifier {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<Credentials>>>,
}

impl CredentialNotifier {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Credentials>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("notifier lock poisoned")
            .insert(id, tx);
        (SubscriptionId(id), rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .expect("notifier lock poisoned")
            .remove(&id.0);
    }

    pub fn publish(&self, credentials: Credentials) {
        let mut subscribers = self.subscribers.lock().expect("notifier lock poisoned");
        let before = subscribers.len();
        subscribers.retain(|_, tx| tx.send(credentials.clone()).is_ok());
        let dropped = before - subscribers.len();
        if dropped > 0 {
            debug!("Pruned {dropped} closed credential subscriber(s)");
        }
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("notifier lock poisoned").len()
    }
}

impl Default for CredentialNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(token: &str) -> Credentials {
        Credentials {
            access_token: token.into(),
            refresh_token: Some("R1".into()),
        }
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let notifier = CredentialNotifier::new();
        let (_ida, mut a) = notifier.subscribe();
        let (_idb, mut b) = notifier.subscribe();

        notifier.publish(creds("T1"));

        assert_eq!(a.recv().await.unwrap().access_token, "T1");
        assert_eq!(b.recv().await.unwrap().access_token, "T1");
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_block_others() {
        let notifier = CredentialNotifier::new();
        let (_ida, a) = notifier.subscribe();
        let (_idb, mut b) = notifier.subscribe();
        drop(a);

        notifier.publish(creds("T1"));

        assert_eq!(b.recv().await.unwrap().access_token, "T1");
        assert_eq!(notifier.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_subscription() {
        let notifier = CredentialNotifier::new();
        let (id, mut rx) = notifier.subscribe();

        notifier.unsubscribe(id);
        notifier.publish(creds("T1"));

        assert!(rx.recv().await.is_none());
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
