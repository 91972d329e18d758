use crate::ingest::IngestError;

/// Start-up faults surfaced to whoever initializes the core
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("failed to subscribe to channel {channel}: {source}")]
    ChannelSubscription {
        channel: String,
        #[source]
        source: IngestError,
    },
    #[error("core is already attached to an event source")]
    AlreadyAttached,
    #[error("invalid configuration: {0}")]
    Config(String),
}
