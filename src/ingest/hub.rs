//! In-process push channel hub.
//!
//! Lets an embedding application (or a test) publish proxy events by channel
//! name to any number of subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ingest::{EventSource, EventSubscription, IngestError};
use crate::models::ConnectionEvent;

type Subscribers = Vec<(Uuid, mpsc::UnboundedSender<ConnectionEvent>)>;

#[derive(Default)]
struct HubState {
    channels: HashMap<String, Subscribers>,
    closed: bool,
}

#[derive(Clone, Default)]
pub struct EventHub {
    state: Arc<Mutex<HubState>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every subscriber of `channel`. Returns how many got it.
    pub fn publish(&self, channel: &str, event: ConnectionEvent) -> usize {
        let mut state = lock(&self.state);
        let Some(subscribers) = state.channels.get_mut(channel) else {
            tracing::trace!("No subscribers on {} for {}", channel, event.id());
            return 0;
        };
        subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    /// Decode a raw JSON payload and publish it
    pub fn publish_json(&self, channel: &str, raw: &str) -> Result<usize, IngestError> {
        let event = ConnectionEvent::from_json(raw)?;
        Ok(self.publish(channel, event))
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        lock(&self.state)
            .channels
            .get(channel)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// End every subscription and refuse new ones
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.channels.clear();
        tracing::info!("Event hub closed");
    }
}

impl EventSource for EventHub {
    fn subscribe(&self, channel: &str) -> Result<EventSubscription, IngestError> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(IngestError::Closed);
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .push((id, tx));

        let hub: Weak<Mutex<HubState>> = Arc::downgrade(&self.state);
        let name = channel.to_string();
        Ok(EventSubscription::new(channel, rx, move || {
            if let Some(hub) = hub.upgrade() {
                if let Some(subs) = lock(&hub).channels.get_mut(&name) {
                    subs.retain(|(sub_id, _)| *sub_id != id);
                }
            }
        }))
    }
}

fn lock(state: &Mutex<HubState>) -> MutexGuard<'_, HubState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestRecord;

    fn request(id: &str) -> ConnectionEvent {
        RequestRecord::new(id, "GET", "http://a.com/").into()
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe("proxy_event").expect("subscribe");

        assert_eq!(hub.publish("proxy_event", request("1")), 1);
        assert_eq!(hub.publish("proxy_event", request("2")), 1);
        assert_eq!(hub.publish("other", request("3")), 0);

        assert_eq!(sub.recv().await.map(|e| e.id().to_string()).as_deref(), Some("1"));
        assert_eq!(sub.recv().await.map(|e| e.id().to_string()).as_deref(), Some("2"));
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let hub = EventHub::new();
        let first = hub.subscribe("proxy_event").expect("subscribe");
        let _second = hub.subscribe("proxy_event").expect("subscribe");
        assert_eq!(hub.subscriber_count("proxy_event"), 2);

        drop(first);
        assert_eq!(hub.subscriber_count("proxy_event"), 1);
        assert_eq!(hub.publish("proxy_event", request("1")), 1);
    }

    #[tokio::test]
    async fn close_ends_streams_and_rejects_new_subscribers() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe("proxy_event").expect("subscribe");
        hub.close();

        assert!(sub.recv().await.is_none());
        assert!(matches!(hub.subscribe("proxy_event"), Err(IngestError::Closed)));
    }

    #[test]
    fn publish_json_rejects_unknown_payload() {
        let hub = EventHub::new();
        let err = hub.publish_json("proxy_event", r#"{"Nope":{}}"#).unwrap_err();
        assert!(matches!(err, IngestError::Decode(_)));
    }
}
