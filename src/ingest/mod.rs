//! Event ingestion
//!
//! Subscribes to the proxy engine's push channel and forwards each event to
//! the ledger. No reconciliation happens here; the ledger owns that policy.

mod hub;
mod json_lines;
mod subscription;

pub use hub::EventHub;
pub use json_lines::JsonLinesSource;
pub use subscription::EventSubscription;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::time::{Interval, MissedTickBehavior};

use crate::ledger::{ConnectionLedger, IngestOutcome};
use crate::models::ConnectionEvent;
use crate::query::FilterEngine;
use crate::runtime::RuntimeHandle;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unknown channel {0}")]
    UnknownChannel(String),
    #[error("channel already has a subscriber")]
    AlreadySubscribed,
    #[error("event source is closed")]
    Closed,
    #[error("no async runtime available: {0}")]
    Runtime(String),
    #[error("undecodable event payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A named push channel the proxy engine publishes to
pub trait EventSource: Send + Sync {
    fn subscribe(&self, channel: &str) -> Result<EventSubscription, IngestError>;
}

/// Route one event to its ledger entry point, invalidating the view on change
pub fn dispatch(
    ledger: &ConnectionLedger,
    engine: &FilterEngine,
    event: ConnectionEvent,
) -> IngestOutcome {
    let outcome = match event {
        ConnectionEvent::NewRequest(req) => ledger.on_new_request(req),
        ConnectionEvent::NewResponse(res) => ledger.on_new_response(res),
    };
    if outcome.changed_ledger() {
        engine.invalidate();
    }
    outcome
}

/// Subscribe to `channel` and spawn the task that feeds the ledger.
///
/// With a `flush_interval` the ledger is expected to run in buffered mode and
/// is flushed on that period. Stopping or dropping the returned handle
/// unsubscribes before any further event is dispatched.
pub(crate) fn start_ingestion(
    source: &dyn EventSource,
    channel: &str,
    ledger: Arc<ConnectionLedger>,
    engine: Arc<FilterEngine>,
    flush_interval: Option<Duration>,
) -> Result<RuntimeHandle, IngestError> {
    let subscription = source.subscribe(channel)?;
    tracing::info!(
        "Subscribed to channel {} ({})",
        channel,
        match flush_interval {
            Some(period) => format!("buffered, flushing every {}ms", period.as_millis()),
            None => "immediate".to_string(),
        }
    );
    Ok(RuntimeHandle::spawn("ingestion", move |shutdown| {
        pump_events(subscription, ledger, engine, flush_interval, shutdown)
    }))
}

async fn pump_events(
    mut subscription: EventSubscription,
    ledger: Arc<ConnectionLedger>,
    engine: Arc<FilterEngine>,
    flush_interval: Option<Duration>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut flush = flush_interval.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = subscription.next() => match event {
                Some(event) => {
                    tracing::trace!("{} {}", event.kind(), event.id());
                    dispatch(&ledger, &engine, event);
                }
                None => {
                    tracing::info!("Channel {} closed by publisher", subscription.channel());
                    if ledger.flush_pending() > 0 {
                        engine.invalidate();
                    }
                    break;
                }
            },
            _ = tick(&mut flush) => {
                if ledger.flush_pending() > 0 {
                    engine.invalidate();
                }
            }
        }
    }

    let channel = subscription.channel().to_string();
    drop(subscription);
    tracing::info!("Stopped ingestion on channel {}", channel);
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerAnomaly, ReconcileMode};
    use crate::models::{RequestRecord, ResponseRecord};
    use crate::pins::PinRegistry;

    fn stores(mode: ReconcileMode) -> (Arc<ConnectionLedger>, Arc<FilterEngine>) {
        let ledger = Arc::new(ConnectionLedger::new(mode));
        let engine = Arc::new(FilterEngine::new(
            ledger.clone(),
            Arc::new(PinRegistry::new()),
            Duration::from_millis(150),
        ));
        (ledger, engine)
    }

    #[test]
    fn dispatch_routes_by_variant() {
        let (ledger, engine) = stores(ReconcileMode::Immediate);
        let req = RequestRecord::new("1", "GET", "http://a.com/");
        let res = ResponseRecord::new("1", "http://a.com/", 200);

        assert_eq!(dispatch(&ledger, &engine, req.into()), IngestOutcome::Inserted);
        assert!(engine.next_deadline().is_some(), "view invalidated");
        assert_eq!(dispatch(&ledger, &engine, res.into()), IngestOutcome::Attached);
    }

    #[test]
    fn rejected_event_leaves_view_alone() {
        let (ledger, engine) = stores(ReconcileMode::Immediate);
        let orphan = ResponseRecord::new("99", "http://a.com/", 500);
        assert_eq!(
            dispatch(&ledger, &engine, orphan.into()),
            IngestOutcome::Rejected(LedgerAnomaly::OrphanResponse { id: "99".into() })
        );
        assert_eq!(engine.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn pump_applies_events_until_stopped() {
        let (ledger, engine) = stores(ReconcileMode::Immediate);
        let hub = EventHub::new();
        let handle = start_ingestion(&hub, "proxy_event", ledger.clone(), engine, None)
            .expect("subscribed");

        hub.publish("proxy_event", RequestRecord::new("1", "GET", "http://a.com/").into());
        hub.publish("proxy_event", ResponseRecord::new("1", "http://a.com/", 200).into());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ledger.stats().completed, 1);

        handle.stop().await;
        assert_eq!(hub.subscriber_count("proxy_event"), 0);
        assert_eq!(
            hub.publish("proxy_event", RequestRecord::new("2", "GET", "http://a.com/").into()),
            0
        );
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_mode_flushes_on_interval() {
        let (ledger, engine) = stores(ReconcileMode::Buffered);
        let hub = EventHub::new();
        let _handle = start_ingestion(
            &hub,
            "proxy_event",
            ledger.clone(),
            engine,
            Some(Duration::from_millis(200)),
        )
        .expect("subscribed");

        hub.publish("proxy_event", RequestRecord::new("1", "GET", "http://a.com/").into());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ledger.is_empty());
        assert_eq!(ledger.stats().buffered, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn subscription_failure_is_returned() {
        let (ledger, engine) = stores(ReconcileMode::Immediate);
        let hub = EventHub::new();
        hub.close();
        let result = start_ingestion(&hub, "proxy_event", ledger.clone(), engine, None);
        assert!(matches!(result, Err(IngestError::Closed)));
        assert!(ledger.is_empty());
    }
}
