use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, watch, Notify};
use tokio::time::Instant;

use crate::ledger::ConnectionLedger;
use crate::models::{CategoricalFilter, ConnectionRecord};
use crate::pins::PinRegistry;
use crate::query::clock::{Clock, SystemClock};
use crate::query::debounce::Debouncer;
use crate::query::view::{compute_view, ActiveFilter, ViewCriteria};

/// One published recomputation of the visible connections
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveView {
    /// Number of recomputations so far, 0 for the initial empty view
    pub generation: u64,
    pub criteria: ViewCriteria,
    pub records: Vec<ConnectionRecord>,
}

struct EngineState {
    keyword: Option<String>,
    active: ActiveFilter,
    debouncer: Debouncer,
    generation: u64,
}

/// Owns keyword and filter selection and publishes the debounced view of
/// the ledger through a watch channel.
pub struct FilterEngine {
    ledger: Arc<ConnectionLedger>,
    pins: Arc<PinRegistry>,
    clock: Arc<dyn Clock>,
    state: Mutex<EngineState>,
    view: watch::Sender<Arc<EffectiveView>>,
    wake: Notify,
}

impl FilterEngine {
    pub fn new(ledger: Arc<ConnectionLedger>, pins: Arc<PinRegistry>, quiet: Duration) -> Self {
        Self::with_clock(ledger, pins, quiet, Arc::new(SystemClock))
    }

    pub fn with_clock(
        ledger: Arc<ConnectionLedger>,
        pins: Arc<PinRegistry>,
        quiet: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (view, _) = watch::channel(Arc::new(EffectiveView::default()));
        Self {
            ledger,
            pins,
            clock,
            state: Mutex::new(EngineState {
                keyword: None,
                active: ActiveFilter::default(),
                debouncer: Debouncer::new(quiet),
                generation: 0,
            }),
            view,
            wake: Notify::new(),
        }
    }

    /// Replace the search keyword. An empty string clears it.
    pub fn set_keyword(&self, keyword: Option<String>) -> bool {
        let keyword = keyword.filter(|k| !k.is_empty());
        let mut state = self.lock();
        if state.keyword == keyword {
            return false;
        }
        state.keyword = keyword;
        self.schedule(&mut state);
        true
    }

    pub fn keyword(&self) -> Option<String> {
        self.lock().keyword.clone()
    }

    /// Press a filter button (`Some`) or reset to all (`None`).
    /// Pressing the active button again clears it. Returns the new selection.
    pub fn set_active_filter(&self, filter: Option<CategoricalFilter>) -> Option<CategoricalFilter> {
        let mut state = self.lock();
        let changed = match filter {
            Some(filter) => {
                state.active.click(filter);
                true
            }
            None => state.active.reset(),
        };
        if changed {
            self.schedule(&mut state);
        }
        state.active.get()
    }

    pub fn active_filter(&self) -> Option<CategoricalFilter> {
        self.lock().active.get()
    }

    /// Something the view depends on changed (ledger contents, current pin)
    pub fn invalidate(&self) {
        let mut state = self.lock();
        self.schedule(&mut state);
    }

    /// Recompute if the quiet period has elapsed. Returns whether it did.
    pub fn poll(&self) -> bool {
        let mut state = self.lock();
        if !state.debouncer.take_due(self.clock.now()) {
            return false;
        }
        self.recompute(&mut state);
        true
    }

    /// Skip the quiet period and recompute right away
    pub fn refresh_now(&self) -> Arc<EffectiveView> {
        let mut state = self.lock();
        state.debouncer.cancel();
        self.recompute(&mut state);
        self.effective_view()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.lock().debouncer.deadline()
    }

    pub fn cancel_pending(&self) -> bool {
        self.lock().debouncer.cancel()
    }

    /// Latest published view
    pub fn effective_view(&self) -> Arc<EffectiveView> {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<Arc<EffectiveView>> {
        self.view.subscribe()
    }

    pub fn recomputations(&self) -> u64 {
        self.lock().generation
    }

    pub fn quiet_period(&self) -> Duration {
        self.lock().debouncer.quiet_period()
    }

    /// Drive debounced recomputation until `shutdown` fires or its sender
    /// is dropped. Any recomputation still pending at exit is cancelled.
    pub async fn run(self: Arc<Self>, mut shutdown: oneshot::Receiver<()>) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.wake.notified() => {}
                _ = wait_until(self.clock.as_ref(), deadline) => {
                    self.poll();
                }
            }
        }
        if self.cancel_pending() {
            tracing::debug!("Dropped pending view recomputation on shutdown");
        }
    }

    fn schedule(&self, state: &mut EngineState) {
        state.debouncer.trigger(self.clock.now());
        self.wake.notify_one();
    }

    fn recompute(&self, state: &mut EngineState) {
        let criteria = ViewCriteria {
            current_pin: self.pins.current_pin(),
            keyword: state.keyword.clone(),
            filter: state.active.get(),
        };
        let records = self.ledger.with_records(|all| compute_view(all, &criteria));
        state.generation += 1;
        tracing::debug!(
            "Recomputed view #{}: {} of {} connections",
            state.generation,
            records.len(),
            self.ledger.len()
        );
        self.view.send_replace(Arc::new(EffectiveView {
            generation: state.generation,
            criteria,
            records,
        }));
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deadlines are measured on the engine's clock, so the wait must be too
async fn wait_until(clock: &dyn Clock, deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => clock.sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
