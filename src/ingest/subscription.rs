use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::models::ConnectionEvent;

type Release = Box<dyn FnOnce() + Send>;

/// A live subscription to one push channel.
///
/// Events arrive in publish order. Dropping the subscription unsubscribes.
pub struct EventSubscription {
    channel: String,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    release: Option<Release>,
}

impl EventSubscription {
    pub fn new(
        channel: impl Into<String>,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            channel: channel.into(),
            events,
            release: Some(Box::new(release)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next event, or `None` once the publisher side is gone
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }
}

impl Stream for EventSubscription {
    type Item = ConnectionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.events.close();
        if let Some(release) = self.release.take() {
            release();
        }
        tracing::debug!("Unsubscribed from channel {}", self.channel);
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
