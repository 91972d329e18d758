//! # Proxy Ledger Core
//!
//! Real-time connection ledger and query engine behind an intercepting
//! proxy's traffic UI. The proxy engine pushes request/response events; this
//! crate reconciles them into connections and serves a filtered, pinned,
//! debounced view of them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     UI / embedding app                   │
//! ├──────────────────────────────────────────────────────────┤
//! │                  TrafficCore (api module)                 │
//! │  ┌──────────┐  ┌────────────┐  ┌──────┐  ┌────────────┐  │
//! │  │  Ingest  │──│   Ledger   │  │ Pins │──│ FilterEngine│  │
//! │  │ (channel)│  │            │──│      │  │ (debounced) │  │
//! │  └──────────┘  └────────────┘  └──────┘  └────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//!        ▲ { NewRequest } | { NewResponse }
//!   proxy engine
//! ```

pub mod api;
pub mod ingest;
pub mod ledger;
pub mod models;
pub mod pins;
pub mod query;

mod runtime;

pub use api::{CoreConfig, CoreError, TrafficCore};
pub use ingest::{EventHub, EventSource, JsonLinesSource};
pub use ledger::{ConnectionLedger, IngestOutcome, LedgerAnomaly, ReconcileMode};
pub use models::{CategoricalFilter, ConnectionEvent, ConnectionRecord, RequestRecord, ResponseRecord};
pub use pins::{PinError, PinRegistry};
pub use query::{EffectiveView, FilterEngine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
