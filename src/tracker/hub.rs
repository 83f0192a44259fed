use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use crate::comfy::types::PushMessage;

/// Demultiplexes push notifications to per-correlation-id channels.
///
/// Whatever feeds the hub (a websocket task, a test) calls [`dispatch`];
/// the tracker side [`subscribe`]s with the correlation id it put on the
/// prompt. Channels are unbounded so a slow consumer never blocks the feed;
/// message volume is a handful per node execution, so growth is bounded in
/// practice.
///
/// [`dispatch`]: NotificationHub::dispatch
/// [`subscribe`]: NotificationHub::subscribe
#[derive(Debug, Default)]
pub struct NotificationHub {
    channels: Mutex<HashMap<String, mpsc::UnboundedSender<PushMessage>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or replace) the channel for a correlation id.
    pub fn subscribe(&self, correlation_id: &str) -> mpsc::UnboundedReceiver<PushMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .lock()
            .expect("hub mutex poisoned")
            .insert(correlation_id.to_string(), tx);
        rx
    }

    /// Route a message to its subscriber. Returns false when nobody is
    /// listening; a channel whose receiver was dropped is pruned.
    pub fn dispatch(&self, correlation_id: &str, message: PushMessage) -> bool {
        let mut channels = self.channels.lock().expect("hub mutex poisoned");
        match channels.get(correlation_id) {
            Some(tx) => {
                if tx.send(message).is_ok() {
                    true
                } else {
                    debug!(correlation_id, "subscriber gone, pruning channel");
                    channels.remove(correlation_id);
                    false
                }
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, correlation_id: &str) {
        self.channels
            .lock()
            .expect("hub mutex poisoned")
            .remove(correlation_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.channels.lock().expect("hub mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_message(prompt_id: &str) -> PushMessage {
        PushMessage::ExecutionStart {
            prompt_id: prompt_id.to_string(),
        }
    }

    #[tokio::test]
    async fn dispatch_routes_by_correlation_id() {
        let hub = NotificationHub::new();
        let mut alpha = hub.subscribe("client-a");
        let mut beta = hub.subscribe("client-b");

        assert!(hub.dispatch("client-a", start_message("p-1")));
        assert!(hub.dispatch("client-b", start_message("p-2")));

        assert_eq!(alpha.recv().await, Some(start_message("p-1")));
        assert_eq!(beta.recv().await, Some(start_message("p-2")));
    }

    #[tokio::test]
    async fn dispatch_without_subscriber_is_a_noop() {
        let hub = NotificationHub::new();
        assert!(!hub.dispatch("nobody", start_message("p-1")));
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned() {
        let hub = NotificationHub::new();
        let rx = hub.subscribe("client-a");
        drop(rx);

        assert!(!hub.dispatch("client-a", start_message("p-1")));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_closes_the_channel() {
        let hub = NotificationHub::new();
        let mut rx = hub.subscribe("client-a");
        hub.unsubscribe("client-a");

        // Sender dropped: the receiver observes end-of-stream.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn resubscribing_replaces_the_old_channel() {
        let hub = NotificationHub::new();
        let mut old = hub.subscribe("client-a");
        let mut new = hub.subscribe("client-a");

        assert!(hub.dispatch("client-a", start_message("p-1")));
        assert_eq!(old.recv().await, None);
        assert_eq!(new.recv().await, Some(start_message("p-1")));
    }
}
