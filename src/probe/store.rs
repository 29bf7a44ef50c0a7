//! Probe record store interface and the in-memory implementation.

use super::record::{NewProbe, ProbeRecord, ProbeUpdate, cycle_minute};
use super::state::ProbeState;
use crate::core_types::ProbeId;
use crate::network::NetworkGroup;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: ProbeId, reason: String },

    #[error("Record already exists for {endpoint_url} at {created_at}")]
    Duplicate {
        endpoint_url: String,
        created_at: DateTime<Utc>,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: ProbeState, to: ProbeState },

    #[error("Record not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Database(_) => "DATABASE_ERROR",
            StoreError::Corrupt { .. } => "CORRUPT_RECORD",
            StoreError::Duplicate { .. } => "DUPLICATE_RECORD",
            StoreError::InvalidTransition { .. } => "INVALID_STATE_TRANSITION",
            StoreError::NotFound(_) => "NOT_FOUND",
        }
    }
}

/// Reject updates that would move a record backwards or out of a terminal state
pub fn check_transition(expected: ProbeState, next: ProbeState) -> Result<(), StoreError> {
    if expected.can_transition_to(next) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            from: expected,
            to: next,
        })
    }
}

#[async_trait]
pub trait ProbeStore: Send + Sync {
    /// Insert a `TEMP` record; `Duplicate` if the natural key exists
    async fn create(&self, probe: &NewProbe) -> Result<ProbeRecord, StoreError>;

    async fn find_by_key(
        &self,
        endpoint_url: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Option<ProbeRecord>, StoreError>;

    /// `PENDING` records, most recent first
    async fn find_outstanding(&self, limit: usize) -> Result<Vec<ProbeRecord>, StoreError>;

    /// `TEMP` records created before `older_than`, oldest first
    async fn find_stale_temp(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ProbeRecord>, StoreError>;

    /// Compare-and-set: applies only while the record is still in `expected`.
    /// Returns whether a row changed.
    async fn update(
        &self,
        id: ProbeId,
        expected: ProbeState,
        update: &ProbeUpdate,
    ) -> Result<bool, StoreError>;

    /// Records created in `[start, end)`, oldest first
    async fn find_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group: Option<NetworkGroup>,
    ) -> Result<Vec<ProbeRecord>, StoreError>;

    /// Create the record for this key, or return the one already there
    async fn ensure(&self, probe: &NewProbe) -> Result<ProbeRecord, StoreError> {
        if let Some(existing) = self.find_by_key(&probe.endpoint_url, probe.created_at).await? {
            return Ok(existing);
        }
        match self.create(probe).await {
            Ok(record) => Ok(record),
            // Lost a race with a concurrent creator
            Err(StoreError::Duplicate { .. }) => self
                .find_by_key(&probe.endpoint_url, probe.created_at)
                .await?
                .ok_or_else(|| StoreError::NotFound(probe.endpoint_url.clone())),
            Err(e) => Err(e),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    next_id: ProbeId,
    records: BTreeMap<ProbeId, ProbeRecord>,
}

/// Store kept in process memory; used by tests and storage-less runs
#[derive(Default)]
pub struct MemoryProbeStore {
    state: Mutex<MemoryState>,
}

impl MemoryProbeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<ProbeRecord> {
        self.state.lock().await.records.values().cloned().collect()
    }

    pub async fn get(&self, id: ProbeId) -> Option<ProbeRecord> {
        self.state.lock().await.records.get(&id).cloned()
    }
}

#[async_trait]
impl ProbeStore for MemoryProbeStore {
    async fn create(&self, probe: &NewProbe) -> Result<ProbeRecord, StoreError> {
        let created_at = cycle_minute(probe.created_at);
        let mut state = self.state.lock().await;
        if state
            .records
            .values()
            .any(|r| r.endpoint_url == probe.endpoint_url && r.created_at == created_at)
        {
            return Err(StoreError::Duplicate {
                endpoint_url: probe.endpoint_url.clone(),
                created_at,
            });
        }
        state.next_id += 1;
        let record = ProbeRecord {
            id: state.next_id,
            group: probe.group,
            endpoint_url: probe.endpoint_url.clone(),
            created_at,
            tx_hash: None,
            state: ProbeState::Temp,
            diagnostic: None,
            submitted_at: None,
            updated_at: Utc::now(),
        };
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_key(
        &self,
        endpoint_url: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Option<ProbeRecord>, StoreError> {
        let created_at = cycle_minute(created_at);
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .find(|r| r.endpoint_url == endpoint_url && r.created_at == created_at)
            .cloned())
    }

    async fn find_outstanding(&self, limit: usize) -> Result<Vec<ProbeRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<ProbeRecord> = state
            .records
            .values()
            .filter(|r| r.state == ProbeState::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn find_stale_temp(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ProbeRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut stale: Vec<ProbeRecord> = state
            .records
            .values()
            .filter(|r| r.state == ProbeState::Temp && r.created_at < older_than)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn update(
        &self,
        id: ProbeId,
        expected: ProbeState,
        update: &ProbeUpdate,
    ) -> Result<bool, StoreError> {
        check_transition(expected, update.state)?;
        let mut state = self.state.lock().await;
        match state.records.get_mut(&id) {
            Some(record) if record.state == expected => {
                update.apply(record, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group: Option<NetworkGroup>,
    ) -> Result<Vec<ProbeRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut found: Vec<ProbeRecord> = state
            .records
            .values()
            .filter(|r| r.created_at >= start && r.created_at < end)
            .filter(|r| group.is_none_or(|g| r.group == g))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_natural_key_is_unique_per_minute() {
        let store = MemoryProbeStore::new();
        store.create(&NewProbe::new(NetworkGroup::Odin, "a", t0())).await.unwrap();
        let dup = store
            .create(&NewProbe::new(NetworkGroup::Odin, "a", t0() + TimeDelta::seconds(30)))
            .await;
        assert!(matches!(dup, Err(StoreError::Duplicate { .. })));
        store
            .create(&NewProbe::new(NetworkGroup::Odin, "a", t0() + TimeDelta::minutes(1)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ensure_reuses_existing() {
        let store = MemoryProbeStore::new();
        let probe = NewProbe::new(NetworkGroup::Heimdall, "a", t0());
        let first = store.ensure(&probe).await.unwrap();
        let second = store.ensure(&probe).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_is_compare_and_set() {
        let store = MemoryProbeStore::new();
        let r = store.create(&NewProbe::new(NetworkGroup::Odin, "a", t0())).await.unwrap();

        assert!(store.update(r.id, ProbeState::Temp, &ProbeUpdate::pending("h", t0())).await.unwrap());
        // Stale expectation: record is no longer TEMP
        assert!(!store
            .update(r.id, ProbeState::Temp, &ProbeUpdate::terminal(ProbeState::SendFailed, None))
            .await
            .unwrap());
        assert_eq!(store.get(r.id).await.unwrap().state, ProbeState::Pending);
    }

    #[tokio::test]
    async fn test_update_rejects_illegal_transition() {
        let store = MemoryProbeStore::new();
        let r = store.create(&NewProbe::new(NetworkGroup::Odin, "a", t0())).await.unwrap();
        let err = store
            .update(r.id, ProbeState::Completed, &ProbeUpdate::pending("h", t0()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
    }

    #[tokio::test]
    async fn test_find_outstanding_most_recent_first() {
        let store = MemoryProbeStore::new();
        for i in 0..3 {
            let at = t0() + TimeDelta::minutes(i);
            let r = store.create(&NewProbe::new(NetworkGroup::Odin, "a", at)).await.unwrap();
            store.update(r.id, ProbeState::Temp, &ProbeUpdate::pending(format!("h{i}"), at)).await.unwrap();
        }
        store.create(&NewProbe::new(NetworkGroup::Odin, "b", t0())).await.unwrap();

        let pending = store.find_outstanding(2).await.unwrap();
        let hashes: Vec<_> = pending.iter().map(|r| r.tx_hash.clone().unwrap()).collect();
        assert_eq!(hashes, vec!["h2", "h1"]);
    }

    #[tokio::test]
    async fn test_find_stale_temp_skips_recent_and_dispatched() {
        let store = MemoryProbeStore::new();
        let old = store.create(&NewProbe::new(NetworkGroup::Odin, "a", t0())).await.unwrap();
        let sent = store.create(&NewProbe::new(NetworkGroup::Odin, "b", t0())).await.unwrap();
        store.update(sent.id, ProbeState::Temp, &ProbeUpdate::pending("h", t0())).await.unwrap();
        store
            .create(&NewProbe::new(NetworkGroup::Odin, "a", t0() + TimeDelta::minutes(10)))
            .await
            .unwrap();

        let stale = store.find_stale_temp(t0() + TimeDelta::minutes(5), 10).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);
    }

    #[tokio::test]
    async fn test_find_between_filters_window_and_group() {
        let store = MemoryProbeStore::new();
        store.create(&NewProbe::new(NetworkGroup::Odin, "a", t0())).await.unwrap();
        store.create(&NewProbe::new(NetworkGroup::Heimdall, "b", t0())).await.unwrap();
        store
            .create(&NewProbe::new(NetworkGroup::Odin, "a", t0() + TimeDelta::minutes(5)))
            .await
            .unwrap();

        let window = store
            .find_between(t0(), t0() + TimeDelta::minutes(5), None)
            .await
            .unwrap();
        assert_eq!(window.len(), 2);

        let odin = store
            .find_between(t0(), t0() + TimeDelta::minutes(10), Some(NetworkGroup::Odin))
            .await
            .unwrap();
        assert_eq!(odin.len(), 2);
        assert!(odin[0].created_at < odin[1].created_at);
    }
}
