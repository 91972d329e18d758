//! Traffic core
//!
//! Owns the three stores (ledger, pins, filter engine), wires them to the
//! proxy engine's push channel and exposes the query surface the UI calls.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};

use crate::api::{CoreConfig, CoreError};
use crate::ingest::{self, EventSource};
use crate::ledger::{ConnectionLedger, IngestOutcome, LedgerAnomaly, LedgerChange, LedgerStats};
use crate::models::{CategoricalFilter, ConnectionEvent, ConnectionRecord};
use crate::pins::{PinChange, PinError, PinRegistry};
use crate::query::{Clock, EffectiveView, FilterEngine, SystemClock};
use crate::runtime::RuntimeHandle;

#[derive(Default)]
struct CoreTasks {
    ingestion: Option<RuntimeHandle>,
    view_driver: Option<RuntimeHandle>,
}

pub struct TrafficCore {
    config: CoreConfig,
    ledger: Arc<ConnectionLedger>,
    pins: Arc<PinRegistry>,
    engine: Arc<FilterEngine>,
    tasks: Mutex<CoreTasks>,
}

impl Default for TrafficCore {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}

impl TrafficCore {
    pub fn new(config: CoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build the stores with an injected debounce clock
    pub fn with_clock(config: CoreConfig, clock: Arc<dyn Clock>) -> Self {
        let ledger = Arc::new(ConnectionLedger::with_capacity(
            config.reconcile_mode(),
            config.change_capacity,
            config.diagnostics_capacity,
        ));
        let pins = Arc::new(PinRegistry::new());
        let engine = Arc::new(FilterEngine::with_clock(
            ledger.clone(),
            pins.clone(),
            config.debounce(),
            clock,
        ));
        Self {
            config,
            ledger,
            pins,
            engine,
            tasks: Mutex::new(CoreTasks::default()),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Subscribe to the configured channel on `source` and start applying
    /// its events. Also starts the debounced view driver.
    ///
    /// On failure the core stays usable with whatever it already holds.
    pub async fn attach(&self, source: &dyn EventSource) -> Result<(), CoreError> {
        self.config.validate()?;
        let mut tasks = self.tasks();
        if tasks.ingestion.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(CoreError::AlreadyAttached);
        }

        self.spawn_view_driver(&mut tasks);

        let handle = ingest::start_ingestion(
            source,
            &self.config.channel,
            self.ledger.clone(),
            self.engine.clone(),
            self.config.flush_interval(),
        )
        .map_err(|source| {
            tracing::error!(
                "Failed to subscribe to channel {}: {}",
                self.config.channel,
                source
            );
            CoreError::ChannelSubscription {
                channel: self.config.channel.clone(),
                source,
            }
        })?;
        tasks.ingestion = Some(handle);
        Ok(())
    }

    /// Start the debounced view driver without an event source, for cores
    /// fed only through [`TrafficCore::ingest`]. `attach` does this itself.
    pub async fn start(&self) {
        let mut tasks = self.tasks();
        self.spawn_view_driver(&mut tasks);
    }

    pub fn is_attached(&self) -> bool {
        self.tasks()
            .ingestion
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Whether the publisher has ended the subscription (or none was made)
    pub fn ingestion_finished(&self) -> bool {
        !self.is_attached()
    }

    /// Unsubscribe from the event source. Queries keep working.
    pub async fn detach(&self) {
        let ingestion = self.tasks().ingestion.take();
        if let Some(task) = ingestion {
            task.stop().await;
            if self.ledger.flush_pending() > 0 {
                self.engine.invalidate();
            }
        }
    }

    /// Unsubscribe and stop the view driver, dropping any pending recomputation
    pub async fn shutdown(&self) {
        self.detach().await;
        let driver = self.tasks().view_driver.take();
        if let Some(task) = driver {
            task.stop().await;
        }
        self.engine.cancel_pending();
        tracing::info!("Traffic core shut down");
    }

    /// Apply one event directly, as if it arrived on the channel.
    /// The view only follows on its own once the driver runs
    /// ([`TrafficCore::start`] or [`TrafficCore::attach`]).
    pub fn ingest(&self, event: ConnectionEvent) -> IngestOutcome {
        ingest::dispatch(&self.ledger, &self.engine, event)
    }

    pub fn list_connections(&self) -> Vec<ConnectionRecord> {
        self.ledger.list()
    }

    pub fn get_connection(&self, id: &str) -> Option<ConnectionRecord> {
        self.ledger.get(id)
    }

    pub fn clear_connections(&self) -> usize {
        let removed = self.ledger.clear();
        self.engine.invalidate();
        removed
    }

    pub fn connection_stats(&self) -> LedgerStats {
        self.ledger.stats()
    }

    pub fn pin_uri(&self, uri: &str) -> bool {
        self.pins.pin(uri)
    }

    pub fn unpin_uri(&self, uri: &str) {
        if self.pins.unpin(uri) {
            self.engine.invalidate();
        }
    }

    /// Select the pin that scopes the view, or clear it with `None`.
    /// Fails without side effects if `uri` is not pinned.
    pub fn set_current_pin(&self, uri: Option<&str>) -> Result<(), PinError> {
        if self.pins.set_current_pin(uri)? {
            self.engine.invalidate();
        }
        Ok(())
    }

    pub fn list_pins(&self) -> Vec<String> {
        self.pins.list_pins()
    }

    pub fn current_pin(&self) -> Option<String> {
        self.pins.current_pin()
    }

    pub fn clear_pins(&self) {
        if self.pins.clear_pins() {
            self.engine.invalidate();
        }
    }

    /// Press a filter button, or reset to all with `None`. Returns the
    /// filter now in effect.
    pub fn set_active_filter(&self, filter: Option<CategoricalFilter>) -> Option<CategoricalFilter> {
        self.engine.set_active_filter(filter)
    }

    pub fn active_filter(&self) -> Option<CategoricalFilter> {
        self.engine.active_filter()
    }

    pub fn set_keyword(&self, keyword: Option<&str>) {
        self.engine.set_keyword(keyword.map(str::to_string));
    }

    pub fn keyword(&self) -> Option<String> {
        self.engine.keyword()
    }

    /// Connections in the last published view
    pub fn effective_view(&self) -> Vec<ConnectionRecord> {
        self.engine.effective_view().records.clone()
    }

    pub fn current_view(&self) -> Arc<EffectiveView> {
        self.engine.effective_view()
    }

    pub fn refresh_view_now(&self) -> Arc<EffectiveView> {
        self.engine.refresh_now()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<Arc<EffectiveView>> {
        self.engine.subscribe_view()
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<LedgerChange> {
        self.ledger.subscribe_changes()
    }

    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<LedgerAnomaly> {
        self.ledger.subscribe_diagnostics()
    }

    pub fn subscribe_pins(&self) -> broadcast::Receiver<PinChange> {
        self.pins.subscribe_changes()
    }

    pub fn ledger(&self) -> &Arc<ConnectionLedger> {
        &self.ledger
    }

    pub fn pins(&self) -> &Arc<PinRegistry> {
        &self.pins
    }

    pub fn engine(&self) -> &Arc<FilterEngine> {
        &self.engine
    }

    fn spawn_view_driver(&self, tasks: &mut CoreTasks) {
        if tasks.view_driver.is_some() {
            return;
        }
        let engine = self.engine.clone();
        tasks.view_driver = Some(RuntimeHandle::spawn("view debounce", move |shutdown| {
            engine.run(shutdown)
        }));
    }

    fn tasks(&self) -> MutexGuard<'_, CoreTasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
