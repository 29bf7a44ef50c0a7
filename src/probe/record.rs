//! Probe records and the updates applied to them.

use super::state::ProbeState;
use crate::core_types::ProbeId;
use crate::network::NetworkGroup;
use chrono::{DateTime, TimeDelta, Timelike, Utc};

/// Truncate to the start of the minute; records are keyed per minute
pub fn cycle_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// One probe transaction against one endpoint in one cycle.
///
/// Natural key: `(endpoint_url, created_at)` with `created_at` truncated to
/// the minute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRecord {
    pub id: ProbeId,
    pub group: NetworkGroup,
    pub endpoint_url: String,
    pub created_at: DateTime<Utc>,
    pub tx_hash: Option<String>,
    pub state: ProbeState,
    pub diagnostic: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ProbeRecord {
    /// Time since submission; falls back to `created_at` when never stamped
    pub fn elapsed(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.submitted_at.unwrap_or(self.created_at)
    }
}

/// A record about to be created in `TEMP`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProbe {
    pub group: NetworkGroup,
    pub endpoint_url: String,
    pub created_at: DateTime<Utc>,
}

impl NewProbe {
    pub fn new(group: NetworkGroup, endpoint_url: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            group,
            endpoint_url: endpoint_url.into(),
            created_at: cycle_minute(at),
        }
    }
}

/// A state change written with compare-and-set on the expected state.
///
/// `tx_hash` and `submitted_at` are kept when `None`; `diagnostic` is always
/// written, so `None` clears it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeUpdate {
    pub state: ProbeState,
    pub tx_hash: Option<String>,
    pub diagnostic: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl ProbeUpdate {
    pub fn pending(tx_hash: impl Into<String>, submitted_at: DateTime<Utc>) -> Self {
        Self {
            state: ProbeState::Pending,
            tx_hash: Some(tx_hash.into()),
            diagnostic: None,
            submitted_at: Some(submitted_at),
        }
    }

    pub fn terminal(state: ProbeState, diagnostic: Option<String>) -> Self {
        Self {
            state,
            tx_hash: None,
            diagnostic,
            submitted_at: None,
        }
    }

    /// Apply to an in-memory record
    pub fn apply(&self, record: &mut ProbeRecord, now: DateTime<Utc>) {
        record.state = self.state;
        if let Some(hash) = &self.tx_hash {
            record.tx_hash = Some(hash.clone());
        }
        record.diagnostic = self.diagnostic.clone();
        if let Some(at) = self.submitted_at {
            record.submitted_at = Some(at);
        }
        record.updated_at = now;
    }
}
