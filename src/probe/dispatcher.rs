//! Dispatcher
//!
//! Drives one probe for one endpoint in one cycle:
//!
//! ```text
//! ensure TEMP record ─► select pair ─► forge (with retry) ─► PENDING
//!        │                   │                   └─────────► SEND_FAILED
//!        └─ already past TEMP: skip              └─ none ──► SEND_FAILED
//! ```

use super::record::{NewProbe, ProbeUpdate};
use super::retry::{Exhausted, RetryPolicy};
use super::state::ProbeState;
use super::store::{ProbeStore, StoreError};
use crate::account::{AccountPoolHandle, SendOutcome};
use crate::chain::{Endpoint, ErrorCause};
use crate::core_types::ProbeId;
use crate::error::{EngineError, ProbeFailure};
use crate::forge::TransactionForge;
use crate::money::Money;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Submitted { tx_hash: String, attempts: u32 },
    SendFailed { cause: ErrorCause, attempts: u32 },
    /// No sender/receiver pair was available
    NoCapacity,
    /// The record for this cycle had already left TEMP
    Skipped(ProbeState),
}

pub struct Dispatcher {
    store: Arc<dyn ProbeStore>,
    pool: AccountPoolHandle,
    forge: Arc<TransactionForge>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ProbeStore>,
        pool: AccountPoolHandle,
        forge: Arc<TransactionForge>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            pool,
            forge,
            retry,
        }
    }

    pub async fn dispatch(
        &self,
        endpoint: &Endpoint,
        cycle_at: DateTime<Utc>,
    ) -> Result<DispatchOutcome, EngineError> {
        let group = endpoint.group;
        let record = self
            .store
            .ensure(&NewProbe::new(group, endpoint.url.clone(), cycle_at))
            .await?;

        if record.state != ProbeState::Temp {
            debug!(endpoint = %endpoint.url, state = %record.state, "Probe already dispatched this cycle");
            return Ok(DispatchOutcome::Skipped(record.state));
        }

        let Some(pair) = self.pool.select_pair(group).await? else {
            let failure = ProbeFailure::CapacityExhausted;
            warn!(group = %group, endpoint = %endpoint.url, code = failure.code(), "No account pair for probe");
            self.persist(
                record.id,
                &ProbeUpdate::terminal(ProbeState::SendFailed, Some(failure.diagnostic())),
            )
            .await?;
            return Ok(DispatchOutcome::NoCapacity);
        };

        let forge = &self.forge;
        let sender = &pair.sender;
        let recipient = pair.receiver.address;
        let result = self
            .retry
            .run(move |_attempt| forge.send(endpoint, sender, recipient))
            .await;

        match result {
            Ok((tx_hash, attempts)) => {
                // Record first: the transaction is already on chain
                let persisted = self
                    .persist(record.id, &ProbeUpdate::pending(tx_hash.clone(), Utc::now()))
                    .await;
                if let Err(e) = &persisted {
                    error!(
                        record_id = record.id,
                        endpoint = %endpoint.url,
                        tx_hash = %tx_hash,
                        code = e.code(),
                        error = %e,
                        "Submitted transaction could not be recorded"
                    );
                }

                let unit = Money::from_units(self.forge.units());
                self.pool.apply_delta(pair.sender.id, group, -unit).await?;
                self.pool.apply_delta(pair.receiver.id, group, unit).await?;
                self.pool
                    .report_send_outcome(pair.sender.id, group, SendOutcome::Delivered)
                    .await?;

                if !persisted? {
                    warn!(record_id = record.id, tx_hash = %tx_hash, "Probe record left TEMP concurrently");
                }

                info!(
                    group = %group,
                    endpoint = %endpoint.url,
                    sender = %pair.sender.name,
                    receiver = %pair.receiver.name,
                    tx_hash = %tx_hash,
                    attempts,
                    "Probe submitted"
                );
                Ok(DispatchOutcome::Submitted { tx_hash, attempts })
            }
            Err(Exhausted { attempts, last }) => {
                let cause = last.cause();
                let outcome = if last.is_account_fault() {
                    SendOutcome::AccountFailure
                } else {
                    SendOutcome::EndpointFailure {
                        endpoint: endpoint.url.clone(),
                    }
                };
                let failure = ProbeFailure::SendExhausted { attempts, last };
                warn!(
                    group = %group,
                    endpoint = %endpoint.url,
                    sender = %pair.sender.name,
                    code = failure.code(),
                    cause = %cause,
                    attempts,
                    "Probe send failed"
                );
                let persisted = self
                    .persist(
                        record.id,
                        &ProbeUpdate::terminal(ProbeState::SendFailed, Some(failure.diagnostic())),
                    )
                    .await;
                self.pool.report_send_outcome(pair.sender.id, group, outcome).await?;
                persisted?;
                Ok(DispatchOutcome::SendFailed { cause, attempts })
            }
        }
    }

    /// CAS the record out of TEMP, retrying transient store errors
    async fn persist(&self, id: ProbeId, update: &ProbeUpdate) -> Result<bool, StoreError> {
        let store = &self.store;
        self.retry
            .run(move |_attempt| store.update(id, ProbeState::Temp, update))
            .await
            .map(|(written, _)| written)
            .map_err(|exhausted| exhausted.last)
    }
}

#[cfg(all(test, feature = "mock-rpc"))]
mod tests {
    use super::*;
    use crate::account::{AccountPool, spawn_pool};
    use crate::chain::{MockChainRpc, RpcError};
    use crate::network::NetworkGroup;
    use crate::probe::record::ProbeRecord;
    use crate::probe::MemoryProbeStore;
    use crate::test_support::{identities, test_networks};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    /// Memory store whose first `failing` updates error out
    struct FlakyStore {
        inner: MemoryProbeStore,
        failing: AtomicU32,
    }

    impl FlakyStore {
        fn new(failing: u32) -> Self {
            Self {
                inner: MemoryProbeStore::new(),
                failing: AtomicU32::new(failing),
            }
        }
    }

    #[async_trait]
    impl ProbeStore for FlakyStore {
        async fn create(&self, probe: &NewProbe) -> Result<ProbeRecord, StoreError> {
            self.inner.create(probe).await
        }

        async fn find_by_key(
            &self,
            endpoint_url: &str,
            created_at: DateTime<Utc>,
        ) -> Result<Option<ProbeRecord>, StoreError> {
            self.inner.find_by_key(endpoint_url, created_at).await
        }

        async fn find_outstanding(&self, limit: usize) -> Result<Vec<ProbeRecord>, StoreError> {
            self.inner.find_outstanding(limit).await
        }

        async fn find_stale_temp(
            &self,
            older_than: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<ProbeRecord>, StoreError> {
            self.inner.find_stale_temp(older_than, limit).await
        }

        async fn update(
            &self,
            id: ProbeId,
            expected: ProbeState,
            update: &ProbeUpdate,
        ) -> Result<bool, StoreError> {
            let left = self.failing.load(Ordering::SeqCst);
            if left > 0 {
                self.failing.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.update(id, expected, update).await
        }

        async fn find_between(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            group: Option<NetworkGroup>,
        ) -> Result<Vec<ProbeRecord>, StoreError> {
            self.inner.find_between(start, end, group).await
        }
    }

    async fn flaky_fixture(failing: u32) -> (Arc<FlakyStore>, AccountPoolHandle, Dispatcher) {
        let rpc = Arc::new(MockChainRpc::new());
        let store = Arc::new(FlakyStore::new(failing));
        let (pool, _task) = spawn_pool(AccountPool::new(identities(2), 3), 16);
        pool.set_balance(0, NetworkGroup::Odin, Money::from_units(500)).await.unwrap();
        pool.set_balance(1, NetworkGroup::Odin, Money::from_units(100)).await.unwrap();
        let forge = Arc::new(TransactionForge::new(rpc, Arc::new(test_networks()), 1));
        let dispatcher = Dispatcher::new(store.clone(), pool.clone(), forge, RetryPolicy::default());
        (store, pool, dispatcher)
    }

    struct Fixture {
        rpc: Arc<MockChainRpc>,
        store: Arc<MemoryProbeStore>,
        pool: AccountPoolHandle,
        dispatcher: Dispatcher,
    }

    async fn fixture(balances: &[i64]) -> Fixture {
        let rpc = Arc::new(MockChainRpc::new());
        let store = Arc::new(MemoryProbeStore::new());
        let (pool, _task) = spawn_pool(AccountPool::new(identities(balances.len()), 3), 16);
        for (id, units) in balances.iter().enumerate() {
            pool.set_balance(id, NetworkGroup::Odin, Money::from_units(*units)).await.unwrap();
        }
        let forge = Arc::new(TransactionForge::new(rpc.clone(), Arc::new(test_networks()), 1));
        let dispatcher = Dispatcher::new(store.clone(), pool.clone(), forge, RetryPolicy::default());
        Fixture {
            rpc,
            store,
            pool,
            dispatcher,
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint::new("https://a.odin/graphql", NetworkGroup::Odin)
    }

    #[tokio::test]
    async fn test_success_moves_unit_and_marks_pending() {
        let f = fixture(&[500, 100]).await;
        let outcome = f.dispatcher.dispatch(&endpoint(), Utc::now()).await.unwrap();
        let DispatchOutcome::Submitted { tx_hash, attempts } = outcome else {
            panic!("expected submission, got {outcome:?}");
        };
        assert_eq!(attempts, 1);

        let view = f.pool.snapshot(NetworkGroup::Odin).await.unwrap();
        assert_eq!(view[0].balance, Some(Money::from_units(499)));
        assert_eq!(view[1].balance, Some(Money::from_units(101)));

        let record = &f.store.all().await[0];
        assert_eq!(record.state, ProbeState::Pending);
        assert_eq!(record.tx_hash.as_deref(), Some(tx_hash.as_str()));
        assert!(record.diagnostic.is_none());
        assert!(record.submitted_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_hang_up_exhausts_three_attempts() {
        let f = fixture(&[500, 100]).await;
        f.rpc
            .break_endpoint(&endpoint().url, RpcError::transport("socket hang up"));

        let start = Instant::now();
        let outcome = f.dispatcher.dispatch(&endpoint(), Utc::now()).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::SendFailed {
                cause: ErrorCause::SocketReset,
                attempts: 3
            }
        );
        assert_eq!(f.rpc.submit_count(), 3);
        assert!(start.elapsed() >= Duration::from_secs(4));

        let record = &f.store.all().await[0];
        assert_eq!(record.state, ProbeState::SendFailed);
        assert!(record.diagnostic.as_deref().unwrap().contains("socket-reset"));

        // One failed cycle never disables the sender; balances untouched
        let view = f.pool.snapshot(NetworkGroup::Odin).await.unwrap();
        assert!(view[0].active);
        assert_eq!(view[0].failure_streak, 1);
        assert_eq!(view[0].balance, Some(Money::from_units(500)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers() {
        let f = fixture(&[500, 100]).await;
        f.rpc.push_submit_failure(RpcError::transport("operation timed out"));
        let outcome = f.dispatcher.dispatch(&endpoint(), Utc::now()).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Submitted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_no_capacity_finalizes_send_failed() {
        let f = fixture(&[500]).await;
        let outcome = f.dispatcher.dispatch(&endpoint(), Utc::now()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::NoCapacity);
        let record = &f.store.all().await[0];
        assert_eq!(record.state, ProbeState::SendFailed);
        assert_eq!(record.diagnostic.as_deref(), Some("no available accounts"));
        assert_eq!(f.rpc.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_second_dispatch_same_minute_is_skipped() {
        let f = fixture(&[500, 100, 50]).await;
        let at = Utc::now();
        f.dispatcher.dispatch(&endpoint(), at).await.unwrap();
        let again = f.dispatcher.dispatch(&endpoint(), at).await.unwrap();
        assert_eq!(again, DispatchOutcome::Skipped(ProbeState::Pending));
        assert_eq!(f.rpc.submit_count(), 1);
        assert_eq!(f.store.all().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_write_retried_after_store_error() {
        let (store, _pool, dispatcher) = flaky_fixture(1).await;
        let outcome = dispatcher.dispatch(&endpoint(), Utc::now()).await.unwrap();
        let DispatchOutcome::Submitted { tx_hash, .. } = outcome else {
            panic!("expected submission, got {outcome:?}");
        };
        let record = &store.inner.all().await[0];
        assert_eq!(record.state, ProbeState::Pending);
        assert_eq!(record.tx_hash.as_deref(), Some(tx_hash.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecorded_submission_still_settles_pool() {
        let (store, pool, dispatcher) = flaky_fixture(3).await;
        let err = dispatcher.dispatch(&endpoint(), Utc::now()).await.unwrap_err();
        assert_eq!(err.code(), "DATABASE_ERROR");

        // Record stays TEMP for the reconciler to finalize
        assert_eq!(store.inner.all().await[0].state, ProbeState::Temp);
        let view = pool.snapshot(NetworkGroup::Odin).await.unwrap();
        assert_eq!(view[0].balance, Some(Money::from_units(499)));
        assert_eq!(view[1].balance, Some(Money::from_units(101)));
        assert_eq!(view[0].failure_streak, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_endpoint_never_disables_sender() {
        let f = fixture(&[500, 100]).await;
        f.rpc
            .break_endpoint(&endpoint().url, RpcError::transport("socket hang up"));

        let start = Utc::now();
        for minute in 0..5 {
            f.pool.clear_cycle(NetworkGroup::Odin).await.unwrap();
            let outcome = f
                .dispatcher
                .dispatch(&endpoint(), start + chrono::TimeDelta::minutes(minute))
                .await
                .unwrap();
            assert!(matches!(outcome, DispatchOutcome::SendFailed { .. }));
        }
        let view = f.pool.snapshot(NetworkGroup::Odin).await.unwrap();
        assert!(view.iter().all(|v| v.active));

        f.pool.clear_cycle(NetworkGroup::Odin).await.unwrap();
        let healthy = Endpoint::new("https://b.odin/graphql", NetworkGroup::Odin);
        let outcome = f.dispatcher.dispatch(&healthy, start).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Submitted { .. }));
    }
}
