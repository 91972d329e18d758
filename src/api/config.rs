use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::api::CoreError;
use crate::ledger::ReconcileMode;
use crate::query::DEFAULT_DEBOUNCE_MS;

pub const DEFAULT_CHANNEL: &str = "proxy_event";

const ENV_CHANNEL: &str = "PROXYLEDGER_CHANNEL";
const ENV_DEBOUNCE_MS: &str = "PROXYLEDGER_DEBOUNCE_MS";
const ENV_FLUSH_MS: &str = "PROXYLEDGER_FLUSH_MS";

/// Core configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    /// Push channel the proxy engine publishes on
    pub channel: String,
    /// Quiet period before the effective view is recomputed
    pub debounce_ms: u64,
    /// Flush period for buffered mode. `None` applies every event immediately.
    pub flush_interval_ms: Option<u64>,
    pub diagnostics_capacity: usize,
    pub change_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            flush_interval_ms: None,
            diagnostics_capacity: 128,
            change_capacity: 512,
        }
    }
}

pub fn create_default_config() -> CoreConfig {
    CoreConfig::default()
}

impl CoreConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: CoreConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with the `PROXYLEDGER_*` environment variables applied on top
    pub fn from_env_overrides() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from `lookup` (keyed by environment variable name).
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(channel) = lookup(ENV_CHANNEL).filter(|c| !c.trim().is_empty()) {
            self.channel = channel.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_DEBOUNCE_MS) {
            match raw.trim().parse() {
                Ok(ms) => self.debounce_ms = ms,
                Err(_) => tracing::warn!("Ignoring {}={}: not a number", ENV_DEBOUNCE_MS, raw),
            }
        }
        if let Some(raw) = lookup(ENV_FLUSH_MS) {
            match raw.trim().parse::<u64>() {
                Ok(0) => self.flush_interval_ms = None,
                Ok(ms) => self.flush_interval_ms = Some(ms),
                Err(_) => tracing::warn!("Ignoring {}={}: not a number", ENV_FLUSH_MS, raw),
            }
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.channel.trim().is_empty() {
            return Err(CoreError::Config("channel name is empty".into()));
        }
        if self.diagnostics_capacity == 0 || self.change_capacity == 0 {
            return Err(CoreError::Config(
                "broadcast capacities must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        self.flush_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn reconcile_mode(&self) -> ReconcileMode {
        match self.flush_interval() {
            Some(_) => ReconcileMode::Buffered,
            None => ReconcileMode::Immediate,
        }
    }
}
