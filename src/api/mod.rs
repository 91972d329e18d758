//! Public API
//!
//! [`TrafficCore`] is the surface a UI calls; configuration and logging setup
//! live alongside it.

mod config;
mod error;
mod ledger_api;
mod logging;

pub use config::{create_default_config, CoreConfig, DEFAULT_CHANNEL};
pub use error::CoreError;
pub use ledger_api::TrafficCore;
pub use logging::{default_log_dir, init_logging};

/// Get the version of the core library
pub fn get_version() -> String {
    crate::VERSION.to_string()
}
