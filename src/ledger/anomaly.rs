use serde::Serialize;

/// Non-fatal reconciliation problems. Reported, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LedgerAnomaly {
    #[error("Orphan response (no matching request connection found: {id})")]
    OrphanResponse { id: String },
    #[error("Duplicate request id {id}, keeping the first request")]
    DuplicateRequestId { id: String },
    #[error("Duplicate response for {id}, keeping the first response")]
    DuplicateResponse { id: String },
}

impl LedgerAnomaly {
    pub fn id(&self) -> &str {
        match self {
            LedgerAnomaly::OrphanResponse { id }
            | LedgerAnomaly::DuplicateRequestId { id }
            | LedgerAnomaly::DuplicateResponse { id } => id,
        }
    }
}

/// Running totals of reported anomalies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyCounters {
    pub orphan_responses: u64,
    pub duplicate_requests: u64,
    pub duplicate_responses: u64,
}

impl AnomalyCounters {
    pub(crate) fn record(&mut self, anomaly: &LedgerAnomaly) {
        match anomaly {
            LedgerAnomaly::OrphanResponse { .. } => self.orphan_responses += 1,
            LedgerAnomaly::DuplicateRequestId { .. } => self.duplicate_requests += 1,
            LedgerAnomaly::DuplicateResponse { .. } => self.duplicate_responses += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.orphan_responses + self.duplicate_requests + self.duplicate_responses
    }
}
