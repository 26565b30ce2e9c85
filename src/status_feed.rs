use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc::UnboundedSender, RwLock};
use tracing::debug;

/// Fan-out of subscription status updates to WebSocket clients, keyed by
/// Stripe checkout session id.
#[derive(Clone, Default)]
pub struct StatusFeed {
    clients: Arc<RwLock<HashMap<String, Vec<UnboundedSender<String>>>>>,
}

impl StatusFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_client(&self, session_id: String, tx: UnboundedSender<String>) {
        let mut clients = self.clients.write().await;
        clients.entry(session_id).or_default().push(tx);
    }

    /// Drops `tx` from the watchers of `session_id`, along with any watcher
    /// whose socket has already gone away.
    pub async fn unregister_client(&self, session_id: &str, tx: &UnboundedSender<String>) {
        let mut clients = self.clients.write().await;
        let Some(senders) = clients.get_mut(session_id) else {
            return;
        };
        senders.retain(|sender| !sender.same_channel(tx) && !sender.is_closed());
        if senders.is_empty() {
            clients.remove(session_id);
        }
    }

    /// Sends `message` to every client watching `session_id` and drops the
    /// ones whose socket has gone away. Returns how many clients received it.
    pub async fn broadcast_message(&self, session_id: &str, message: &str) -> usize {
        let mut clients = self.clients.write().await;
        let Some(senders) = clients.get_mut(session_id) else {
            return 0;
        };
        senders.retain(|tx| tx.send(message.to_string()).is_ok());
        let delivered = senders.len();
        if senders.is_empty() {
            clients.remove(session_id);
        }
        debug!(session_id, delivered, "Broadcast status update");
        delivered
    }

    pub async fn watcher_count(&self, session_id: &str) -> usize {
        self.clients
            .read()
            .await
            .get(session_id)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_broadcast_reaches_registered_clients() {
        let feed = StatusFeed::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        feed.register_client("cs_1".into(), tx).await;

        assert_eq!(feed.broadcast_message("cs_1", "hello").await, 1);
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert_eq!(feed.broadcast_message("cs_other", "hello").await, 0);
    }

    #[tokio::test]
    async fn test_closed_clients_are_pruned() {
        let feed = StatusFeed::new();
        let (tx, rx) = mpsc::unbounded_channel();
        feed.register_client("cs_1".into(), tx).await;
        drop(rx);

        assert_eq!(feed.broadcast_message("cs_1", "hello").await, 0);
        assert_eq!(feed.watcher_count("cs_1").await, 0);
    }

    #[tokio::test]
    async fn test_unregister_forgets_session_without_broadcast() {
        let feed = StatusFeed::new();
        let (tx, rx) = mpsc::unbounded_channel();
        feed.register_client("cs_1".into(), tx.clone()).await;
        drop(rx);

        feed.unregister_client("cs_1", &tx).await;

        assert_eq!(feed.watcher_count("cs_1").await, 0);
        assert!(feed.clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_keeps_other_watchers() {
        let feed = StatusFeed::new();
        let (leaving, _leaving_rx) = mpsc::unbounded_channel();
        let (staying, mut staying_rx) = mpsc::unbounded_channel();
        feed.register_client("cs_1".into(), leaving.clone()).await;
        feed.register_client("cs_1".into(), staying).await;

        feed.unregister_client("cs_1", &leaving).await;

        assert_eq!(feed.watcher_count("cs_1").await, 1);
        assert_eq!(feed.broadcast_message("cs_1", "hello").await, 1);
        assert_eq!(staying_rx.recv().await.as_deref(), Some("hello"));
    }
}
