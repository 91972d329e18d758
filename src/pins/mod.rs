//! Pin registry
//!
//! Saved URI prefixes plus at most one active pin. While a pin is active the
//! effective view shows only connections under that prefix.

use serde::Serialize;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

const PIN_CHANGE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PinError {
    #[error("{uri} is not pinned; pin it before selecting it")]
    InvalidPinTarget { uri: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PinChange {
    Pinned { uri: String },
    Unpinned { uri: String },
    CurrentChanged { uri: Option<String> },
    Cleared,
}

/// Read-only copy of the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinSnapshot {
    pub pins: Vec<String>,
    pub current_pin: Option<String>,
}

pub struct PinRegistry {
    state: RwLock<PinSnapshot>,
    changes: broadcast::Sender<PinChange>,
}

impl Default for PinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PinRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(PIN_CHANGE_CAPACITY);
        Self {
            state: RwLock::new(PinSnapshot::default()),
            changes,
        }
    }

    /// Add `uri` if absent. Returns whether it was added.
    pub fn pin(&self, uri: &str) -> bool {
        let mut state = self.write();
        if state.pins.iter().any(|p| p == uri) {
            return false;
        }
        state.pins.push(uri.to_string());
        self.emit(PinChange::Pinned {
            uri: uri.to_string(),
        });
        true
    }

    /// Remove `uri`, clearing the current pin if it pointed there.
    /// Returns whether the current pin was cleared.
    pub fn unpin(&self, uri: &str) -> bool {
        let mut state = self.write();
        let before = state.pins.len();
        state.pins.retain(|p| p != uri);
        if state.pins.len() == before {
            return false;
        }
        self.emit(PinChange::Unpinned {
            uri: uri.to_string(),
        });

        if state.current_pin.as_deref() == Some(uri) {
            state.current_pin = None;
            self.emit(PinChange::CurrentChanged { uri: None });
            return true;
        }
        false
    }

    /// Select the active pin, or clear it with `None`. Selecting an
    /// unpinned uri leaves the registry untouched.
    pub fn set_current_pin(&self, uri: Option<&str>) -> Result<bool, PinError> {
        let mut state = self.write();
        if let Some(uri) = uri {
            if !state.pins.iter().any(|p| p == uri) {
                tracing::warn!("Rejected current pin {}: not pinned", uri);
                return Err(PinError::InvalidPinTarget {
                    uri: uri.to_string(),
                });
            }
        }
        if state.current_pin.as_deref() == uri {
            return Ok(false);
        }
        state.current_pin = uri.map(str::to_string);
        self.emit(PinChange::CurrentChanged {
            uri: state.current_pin.clone(),
        });
        Ok(true)
    }

    /// Drop every pin. Returns whether a current pin was cleared.
    pub fn clear_pins(&self) -> bool {
        let mut state = self.write();
        let had_current = state.current_pin.take().is_some();
        state.pins.clear();
        self.emit(PinChange::Cleared);
        had_current
    }

    pub fn list_pins(&self) -> Vec<String> {
        self.read().pins.clone()
    }

    pub fn current_pin(&self) -> Option<String> {
        self.read().current_pin.clone()
    }

    pub fn snapshot(&self) -> PinSnapshot {
        self.read().clone()
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<PinChange> {
        self.changes.subscribe()
    }

    fn emit(&self, change: PinChange) {
        let _ = self.changes.send(change);
    }

    fn read(&self) -> RwLockReadGuard<'_, PinSnapshot> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PinSnapshot> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
