use crate::models::{CategoricalFilter, ConnectionRecord};
use serde::Serialize;

/// Everything that decides which connections are visible
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewCriteria {
    pub current_pin: Option<String>,
    pub keyword: Option<String>,
    pub filter: Option<CategoricalFilter>,
}

pub trait ViewCriteriaExt {
    fn matches(&self, conn: &ConnectionRecord) -> bool;
}

impl ViewCriteriaExt for ViewCriteria {
    fn matches(&self, conn: &ConnectionRecord) -> bool {
        // an active pin overrides keyword and filter
        if let Some(pin) = &self.current_pin {
            return conn.request.uri.starts_with(pin.as_str());
        }
        if let Some(keyword) = &self.keyword {
            if !conn
                .request
                .uri
                .to_lowercase()
                .contains(&keyword.to_lowercase())
            {
                return false;
            }
        }
        if let Some(filter) = &self.filter {
            if !filter.matches(conn) {
                return false;
            }
        }
        true
    }
}

/// Filter `records` down to the visible subset, keeping ledger order
pub fn compute_view(records: &[ConnectionRecord], criteria: &ViewCriteria) -> Vec<ConnectionRecord> {
    records
        .iter()
        .filter(|conn| criteria.matches(conn))
        .cloned()
        .collect()
}

/// Single-slot selection over the filter buttons.
///
/// Clicking the active button clears it; clicking any other replaces it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveFilter(Option<CategoricalFilter>);

impl ActiveFilter {
    pub fn get(&self) -> Option<CategoricalFilter> {
        self.0
    }

    pub fn click(&mut self, filter: CategoricalFilter) -> Option<CategoricalFilter> {
        self.0 = if self.0 == Some(filter) {
            None
        } else {
            Some(filter)
        };
        self.0
    }

    pub fn reset(&mut self) -> bool {
        self.0.take().is_some()
    }
}
