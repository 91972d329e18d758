use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Time source for debounce scheduling.
///
/// [`SystemClock`] follows the tokio clock, so it also honours
/// `tokio::time::pause`. [`ManualClock`] only moves when told to.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;

    /// Resolve once [`Clock::now`] has reached `deadline`
    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'_, ()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'_, ()> {
        Box::pin(tokio::time::sleep_until(deadline))
    }
}

/// Clock for tests that advances only through [`ManualClock::advance`]
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
    advanced: Notify,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
            advanced: Notify::new(),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
        drop(now);
        self.advanced.notify_waiters();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            loop {
                // registered before the check so an advance in between is not missed
                let advanced = self.advanced.notified();
                if self.now() >= deadline {
                    return;
                }
                advanced.await;
            }
        })
    }
}
