//! Newline-delimited JSON event source.
//!
//! The proxy engine runs out of process; this source reads its event stream
//! from a pipe, socket or stdin, one tagged event per line.

use std::sync::{Mutex, PoisonError};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::ingest::{EventSource, EventSubscription, IngestError};
use crate::models::ConnectionEvent;

pub struct JsonLinesSource<R> {
    channel: String,
    reader: Mutex<Option<R>>,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// A source that serves `reader` under `channel`. It can be subscribed once.
    pub fn new(channel: impl Into<String>, reader: R) -> Self {
        Self {
            channel: channel.into(),
            reader: Mutex::new(Some(reader)),
        }
    }
}

impl<R> EventSource for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn subscribe(&self, channel: &str) -> Result<EventSubscription, IngestError> {
        if channel != self.channel {
            return Err(IngestError::UnknownChannel(channel.to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| IngestError::Runtime(e.to_string()))?;
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(IngestError::AlreadySubscribed)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(read_events(self.channel.clone(), reader, tx));
        Ok(EventSubscription::new(channel, rx, move || task.abort()))
    }
}

async fn read_events<R>(channel: String, reader: R, tx: mpsc::UnboundedSender<ConnectionEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0u64;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                match ConnectionEvent::from_json(&line) {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!("Skipping undecodable event on {} line {}: {}", channel, line_no, err);
                    }
                }
            }
            Ok(None) => {
                tracing::info!("Event stream {} reached end of input", channel);
                break;
            }
            Err(err) => {
                tracing::warn!("Failed to read event stream {}: {}", channel, err);
                break;
            }
        }
    }
}
