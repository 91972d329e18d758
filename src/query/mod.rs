//! Filter/search engine
//!
//! Combines the active pin, keyword and categorical filter into the
//! effective view of the ledger, recomputed on a debounce schedule.

pub mod clock;
pub mod debounce;
mod engine;
mod view;

pub use clock::{Clock, ManualClock, SystemClock};
pub use debounce::Debouncer;
pub use engine::{EffectiveView, FilterEngine};
pub use view::{compute_view, ActiveFilter, ViewCriteria, ViewCriteriaExt};

/// Default quiet period before the view is recomputed
pub const DEFAULT_DEBOUNCE_MS: u64 = 150;
