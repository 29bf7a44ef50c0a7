//! Reconciliation Engine
//!
//! Resolves `PENDING` probes from the status reported by each network's
//! checking endpoint.
//!
//! | Observed status    | Elapsed since submission | New state   |
//! |--------------------|--------------------------|-------------|
//! | SUCCESS            | <= on_time               | COMPLETED   |
//! | SUCCESS            | >  on_time               | DELAYED     |
//! | STAGING / INCLUDED | <= staging_timeout       | (unchanged) |
//! | STAGING / INCLUDED | >  staging_timeout       | FAILED      |
//! | INVALID / FAILURE  | any                      | FAILED      |
//! | anything else      | any                      | FAILED      |
//! | query error        | any                      | (unchanged) |
//!
//! Each pass also closes `TEMP` records older than `stale_temp_after`: their
//! dispatch ended without recording an outcome, so they become SEND_FAILED.

use super::record::{ProbeRecord, ProbeUpdate};
use super::state::ProbeState;
use super::store::ProbeStore;
use crate::chain::{ChainRpc, TxResult, TxStatus};
use crate::error::{EngineError, ProbeFailure};
use crate::network::{NetworkGroup, Networks};
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Most recent PENDING records examined per invocation
    pub window: usize,
    /// Transaction hashes per status query
    pub max_batch: usize,
    pub on_time: TimeDelta,
    pub staging_timeout: TimeDelta,
    /// Age past which a TEMP record can no longer belong to a live dispatch
    pub stale_temp_after: TimeDelta,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            window: 100,
            max_batch: 50,
            on_time: TimeDelta::seconds(70),
            staging_timeout: TimeDelta::seconds(180),
            stale_temp_after: TimeDelta::seconds(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Resolve {
        state: ProbeState,
        failure: Option<ProbeFailure>,
    },
}

/// Decide what an observed status means for a record pending for `elapsed`
pub fn judge(result: &TxResult, elapsed: TimeDelta, settings: &ReconcileSettings) -> Verdict {
    match &result.status {
        TxStatus::Success if elapsed <= settings.on_time => Verdict::Resolve {
            state: ProbeState::Completed,
            failure: None,
        },
        TxStatus::Success => Verdict::Resolve {
            state: ProbeState::Delayed,
            failure: None,
        },
        TxStatus::Staging | TxStatus::Included if elapsed <= settings.staging_timeout => Verdict::Keep,
        TxStatus::Staging | TxStatus::Included => Verdict::Resolve {
            state: ProbeState::Failed,
            failure: Some(ProbeFailure::StagingTimeout {
                status: result.status.to_string(),
                elapsed_secs: elapsed.num_seconds(),
            }),
        },
        TxStatus::Invalid | TxStatus::Failure => Verdict::Resolve {
            state: ProbeState::Failed,
            failure: Some(ProbeFailure::ChainRejected {
                status: result.status.to_string(),
                exceptions: result.exceptions.clone(),
            }),
        },
        TxStatus::Other(status) => Verdict::Resolve {
            state: ProbeState::Failed,
            failure: Some(ProbeFailure::UnexpectedStatus(status.clone())),
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: usize,
    pub completed: usize,
    pub delayed: usize,
    pub failed: usize,
    pub still_pending: usize,
    /// Status queries that errored (each leaves its whole batch pending)
    pub query_failures: usize,
    /// Stale TEMP records closed as SEND_FAILED
    pub interrupted: usize,
}

impl AddAssign for ReconcileReport {
    fn add_assign(&mut self, rhs: Self) {
        self.examined += rhs.examined;
        self.completed += rhs.completed;
        self.delayed += rhs.delayed;
        self.failed += rhs.failed;
        self.still_pending += rhs.still_pending;
        self.query_failures += rhs.query_failures;
        self.interrupted += rhs.interrupted;
    }
}

pub struct ReconciliationEngine {
    store: Arc<dyn ProbeStore>,
    rpc: Arc<dyn ChainRpc>,
    networks: Arc<Networks>,
    settings: ReconcileSettings,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn ProbeStore>,
        rpc: Arc<dyn ChainRpc>,
        networks: Arc<Networks>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            rpc,
            networks,
            settings,
        }
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport, EngineError> {
        self.reconcile_at(Utc::now()).await
    }

    /// One reconciliation pass, judging elapsed time against `now`
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> Result<ReconcileReport, EngineError> {
        let interrupted = self.close_stale_temp(now).await?;
        let outstanding = self.store.find_outstanding(self.settings.window).await?;
        let mut report = ReconcileReport {
            examined: outstanding.len(),
            interrupted,
            ..ReconcileReport::default()
        };

        let mut by_group: BTreeMap<NetworkGroup, Vec<(ProbeRecord, String)>> = BTreeMap::new();
        for record in outstanding {
            match record.tx_hash.clone() {
                Some(hash) => by_group.entry(record.group).or_default().push((record, hash)),
                None => {
                    self.resolve(&record, ProbeState::Failed, Some(ProbeFailure::MissingTxHash), &mut report)
                        .await?;
                }
            }
        }

        let polls = by_group
            .into_iter()
            .map(|(group, records)| self.poll_group(group, records, now));
        for outcome in join_all(polls).await {
            report += outcome?;
        }

        info!(
            examined = report.examined,
            completed = report.completed,
            delayed = report.delayed,
            failed = report.failed,
            still_pending = report.still_pending,
            query_failures = report.query_failures,
            interrupted = report.interrupted,
            "Reconciliation pass complete"
        );
        Ok(report)
    }

    /// Finalize TEMP records whose dispatch never recorded an outcome
    async fn close_stale_temp(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let stale = self
            .store
            .find_stale_temp(now - self.settings.stale_temp_after, self.settings.window)
            .await?;
        let mut closed = 0;
        for record in stale {
            let failure = ProbeFailure::Interrupted {
                age_secs: (now - record.created_at).num_seconds(),
            };
            let written = self
                .store
                .update(
                    record.id,
                    ProbeState::Temp,
                    &ProbeUpdate::terminal(ProbeState::SendFailed, Some(failure.diagnostic())),
                )
                .await?;
            if written {
                warn!(
                    record_id = record.id,
                    group = %record.group,
                    endpoint = %record.endpoint_url,
                    code = failure.code(),
                    "Stale TEMP record closed"
                );
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn poll_group(
        &self,
        group: NetworkGroup,
        records: Vec<(ProbeRecord, String)>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, EngineError> {
        let endpoint = self.networks.profile(group).checking_endpoint.as_str();
        let mut report = ReconcileReport::default();

        for chunk in records.chunks(self.settings.max_batch.max(1)) {
            let hashes: Vec<String> = chunk.iter().map(|(_, h)| h.clone()).collect();
            let results = match self.rpc.status_batch(endpoint, &hashes).await {
                Ok(results) => results,
                Err(e) => {
                    let failure = ProbeFailure::QueryFailed {
                        cause: e.cause(),
                        message: e.message().to_string(),
                    };
                    warn!(
                        group = %group,
                        endpoint,
                        batch = chunk.len(),
                        code = failure.code(),
                        error = %failure,
                        "Status query failed, records stay pending"
                    );
                    report.query_failures += 1;
                    report.still_pending += chunk.len();
                    continue;
                }
            };

            if results.len() < chunk.len() {
                warn!(
                    group = %group,
                    expected = chunk.len(),
                    received = results.len(),
                    "Short status response, unmatched records stay pending"
                );
                report.still_pending += chunk.len() - results.len();
            }

            for ((record, hash), result) in chunk.iter().zip(results.iter()) {
                match judge(result, record.elapsed(now), &self.settings) {
                    Verdict::Keep => {
                        debug!(tx_hash = %hash, status = %result.status, "Still pending");
                        report.still_pending += 1;
                    }
                    Verdict::Resolve { state, failure } => {
                        self.resolve(record, state, failure, &mut report).await?;
                    }
                }
            }
        }
        Ok(report)
    }

    async fn resolve(
        &self,
        record: &ProbeRecord,
        state: ProbeState,
        failure: Option<ProbeFailure>,
        report: &mut ReconcileReport,
    ) -> Result<(), EngineError> {
        let diagnostic = failure.as_ref().map(ProbeFailure::diagnostic);
        let written = self
            .store
            .update(record.id, ProbeState::Pending, &ProbeUpdate::terminal(state, diagnostic.clone()))
            .await?;
        if !written {
            debug!(record_id = record.id, "Record already resolved elsewhere");
            return Ok(());
        }
        match state {
            ProbeState::Completed => report.completed += 1,
            ProbeState::Delayed => report.delayed += 1,
            _ => report.failed += 1,
        }
        debug!(
            record_id = record.id,
            group = %record.group,
            endpoint = %record.endpoint_url,
            state = %state,
            diagnostic = diagnostic.as_deref().unwrap_or(""),
            "Probe resolved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: i64) -> TimeDelta {
        TimeDelta::seconds(s)
    }

    fn verdict_state(status: TxStatus, elapsed: i64) -> Option<ProbeState> {
        match judge(&TxResult::new(status), secs(elapsed), &ReconcileSettings::default()) {
            Verdict::Keep => None,
            Verdict::Resolve { state, .. } => Some(state),
        }
    }

    #[test]
    fn test_success_thresholds() {
        assert_eq!(verdict_state(TxStatus::Success, 65), Some(ProbeState::Completed));
        assert_eq!(verdict_state(TxStatus::Success, 70), Some(ProbeState::Completed));
        assert_eq!(verdict_state(TxStatus::Success, 71), Some(ProbeState::Delayed));
        assert_eq!(verdict_state(TxStatus::Success, 75), Some(ProbeState::Delayed));
    }

    #[test]
    fn test_staging_thresholds() {
        assert_eq!(verdict_state(TxStatus::Staging, 175), None);
        assert_eq!(verdict_state(TxStatus::Included, 180), None);
        assert_eq!(verdict_state(TxStatus::Staging, 185), Some(ProbeState::Failed));

        let verdict = judge(&TxResult::new(TxStatus::Staging), secs(185), &ReconcileSettings::default());
        let Verdict::Resolve { failure: Some(failure), .. } = verdict else {
            panic!("expected failure");
        };
        assert!(failure.diagnostic().starts_with("staging timeout"));
    }

    #[test]
    fn test_rejections_and_unknown_status_fail() {
        assert_eq!(verdict_state(TxStatus::Invalid, 1), Some(ProbeState::Failed));
        assert_eq!(verdict_state(TxStatus::Failure, 500), Some(ProbeState::Failed));
        let verdict = judge(
            &TxResult::new(TxStatus::Other("TIMEOUT".into())),
            secs(1),
            &ReconcileSettings::default(),
        );
        assert_eq!(
            verdict,
            Verdict::Resolve {
                state: ProbeState::Failed,
                failure: Some(ProbeFailure::UnexpectedStatus("TIMEOUT".into())),
            }
        );
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let settings = ReconcileSettings {
            on_time: secs(30),
            ..ReconcileSettings::default()
        };
        let verdict = judge(&TxResult::new(TxStatus::Success), secs(45), &settings);
        assert!(matches!(verdict, Verdict::Resolve { state: ProbeState::Delayed, .. }));
    }

    #[cfg(feature = "mock-rpc")]
    mod engine {
        use super::*;
        use crate::chain::{ErrorCause, MockChainRpc, RpcError};
        use crate::probe::record::NewProbe;
        use crate::probe::MemoryProbeStore;
        use crate::test_support::test_networks;
        use chrono::TimeZone;

        fn t0() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        }

        async fn pending(store: &MemoryProbeStore, group: NetworkGroup, url: &str, hash: &str) -> ProbeRecord {
            let r = store.create(&NewProbe::new(group, url, t0())).await.unwrap();
            store
                .update(r.id, ProbeState::Temp, &ProbeUpdate::pending(hash, t0()))
                .await
                .unwrap();
            store.get(r.id).await.unwrap()
        }

        fn engine(store: Arc<MemoryProbeStore>, rpc: Arc<MockChainRpc>) -> ReconciliationEngine {
            ReconciliationEngine::new(store, rpc, Arc::new(test_networks()), ReconcileSettings::default())
        }

        #[tokio::test]
        async fn test_resolves_and_never_revisits_terminal() {
            let store = Arc::new(MemoryProbeStore::new());
            let rpc = Arc::new(MockChainRpc::new());
            let a = pending(&store, NetworkGroup::Odin, "a", "h-a").await;
            let b = pending(&store, NetworkGroup::Heimdall, "b", "h-b").await;
            let c = pending(&store, NetworkGroup::Odin, "c", "h-c").await;
            rpc.set_status("h-a", TxResult::new(TxStatus::Success));
            rpc.set_status("h-b", TxResult::new(TxStatus::Success));

            let report = engine(store.clone(), rpc.clone())
                .reconcile_at(t0() + secs(65))
                .await
                .unwrap();
            assert_eq!(report.examined, 3);
            assert_eq!(report.completed, 2);
            assert_eq!(report.still_pending, 1);
            assert_eq!(store.get(a.id).await.unwrap().state, ProbeState::Completed);
            assert_eq!(store.get(b.id).await.unwrap().state, ProbeState::Completed);
            assert_eq!(store.get(c.id).await.unwrap().state, ProbeState::Pending);

            // Later pass sees the chain flip; finished records are untouched
            rpc.set_status("h-a", TxResult::new(TxStatus::Failure));
            let report = engine(store.clone(), rpc)
                .reconcile_at(t0() + secs(200))
                .await
                .unwrap();
            assert_eq!(report.examined, 1);
            assert_eq!(report.failed, 1);
            assert_eq!(store.get(a.id).await.unwrap().state, ProbeState::Completed);
            let c = store.get(c.id).await.unwrap();
            assert_eq!(c.state, ProbeState::Failed);
            assert!(c.diagnostic.unwrap().starts_with("staging timeout"));
        }

        #[tokio::test]
        async fn test_query_failure_leaves_pending() {
            let errors = [
                (RpcError::transport("socket hang up"), ErrorCause::SocketReset),
                (RpcError::transport("operation timed out"), ErrorCause::Timeout),
                (RpcError::Decode("expected a list of results".into()), ErrorCause::Unknown),
            ];
            for (error, cause) in errors {
                assert_eq!(error.cause(), cause);
                let store = Arc::new(MemoryProbeStore::new());
                let rpc = Arc::new(MockChainRpc::new());
                let a = pending(&store, NetworkGroup::Odin, "a", "h-a").await;
                rpc.set_status("h-a", TxResult::new(TxStatus::Success));
                rpc.set_status_error(Some(error));

                let report = engine(store.clone(), rpc).reconcile_at(t0() + secs(10)).await.unwrap();
                assert_eq!(report.query_failures, 1, "{cause}");
                assert_eq!(report.still_pending, 1, "{cause}");
                assert_eq!(report.failed, 0, "{cause}");
                let a = store.get(a.id).await.unwrap();
                assert_eq!(a.state, ProbeState::Pending, "{cause}");
                assert!(a.diagnostic.is_none(), "{cause}");
            }
        }

        #[tokio::test]
        async fn test_stale_temp_closed_as_send_failed() {
            let store = Arc::new(MemoryProbeStore::new());
            let rpc = Arc::new(MockChainRpc::new());
            let stuck = store.create(&NewProbe::new(NetworkGroup::Odin, "a", t0())).await.unwrap();
            let fresh = store
                .create(&NewProbe::new(NetworkGroup::Odin, "a", t0() + secs(240)))
                .await
                .unwrap();

            let engine = engine(store.clone(), rpc);
            let report = engine.reconcile_at(t0() + secs(299)).await.unwrap();
            assert_eq!(report.interrupted, 0);

            let report = engine.reconcile_at(t0() + secs(420)).await.unwrap();
            assert_eq!(report.interrupted, 1);
            assert_eq!(report.examined, 0);
            let stuck = store.get(stuck.id).await.unwrap();
            assert_eq!(stuck.state, ProbeState::SendFailed);
            assert_eq!(
                stuck.diagnostic.as_deref(),
                Some("dispatch interrupted: no outcome recorded after 420s")
            );
            assert_eq!(store.get(fresh.id).await.unwrap().state, ProbeState::Temp);
        }

        #[tokio::test]
        async fn test_short_status_list_leaves_unmatched_pending() {
            let store = Arc::new(MemoryProbeStore::new());
            let rpc = Arc::new(MockChainRpc::new());
            // find_outstanding is most-recent-first; equal minutes fall back to id desc
            let first = pending(&store, NetworkGroup::Odin, "a", "h-a").await;
            let second = pending(&store, NetworkGroup::Odin, "b", "h-b").await;
            rpc.set_status("h-a", TxResult::new(TxStatus::Success));
            rpc.set_status("h-b", TxResult::new(TxStatus::Success));
            rpc.set_status_limit(Some(1));

            let report = engine(store.clone(), rpc).reconcile_at(t0() + secs(10)).await.unwrap();
            assert_eq!(report.completed, 1);
            assert_eq!(report.still_pending, 1);
            assert_eq!(store.get(second.id).await.unwrap().state, ProbeState::Completed);
            assert_eq!(store.get(first.id).await.unwrap().state, ProbeState::Pending);
        }

        #[tokio::test]
        async fn test_batches_respect_max_batch() {
            let store = Arc::new(MemoryProbeStore::new());
            let rpc = Arc::new(MockChainRpc::new());
            for i in 0..5 {
                pending(&store, NetworkGroup::Odin, &format!("e{i}"), &format!("h{i}")).await;
            }
            let engine = ReconciliationEngine::new(
                store,
                rpc.clone(),
                Arc::new(test_networks()),
                ReconcileSettings {
                    max_batch: 2,
                    ..ReconcileSettings::default()
                },
            );
            let report = engine.reconcile_at(t0() + secs(10)).await.unwrap();
            assert_eq!(rpc.status_calls(), 3);
            assert_eq!(report.still_pending, 5);
        }
    }
}
