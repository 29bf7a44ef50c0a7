//! Sweep: one dispatch cycle across every endpoint of every network.
//!
//! Order within a sweep:
//! 1. balance refresh, when due for this cycle
//! 2. list endpoints per network group
//! 3. create the TEMP record of every endpoint
//! 4. clear each group's used-sender set
//! 5. dispatch all endpoints concurrently

use crate::account::{AccountPoolHandle, BalanceRefresher, RefreshReport};
use crate::chain::{Endpoint, EndpointDirectory};
use crate::core_types::CycleNum;
use crate::error::EngineError;
use crate::network::NetworkGroup;
use crate::probe::{DispatchOutcome, Dispatcher, NewProbe, ProbeStore, cycle_minute};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Cycle counter and the minute every record of the cycle is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepContext {
    pub cycle: CycleNum,
    pub started_at: DateTime<Utc>,
}

impl SweepContext {
    pub fn first(now: DateTime<Utc>) -> Self {
        Self {
            cycle: 1,
            started_at: cycle_minute(now),
        }
    }

    pub fn next(&self, now: DateTime<Utc>) -> Self {
        Self {
            cycle: self.cycle + 1,
            started_at: cycle_minute(now),
        }
    }

    /// Every `every` cycles; 0 disables in-sweep refresh
    pub fn refresh_due(&self, every: u64) -> bool {
        every > 0 && self.cycle % every == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cycle: CycleNum,
    pub endpoints: usize,
    pub submitted: usize,
    pub send_failed: usize,
    pub no_capacity: usize,
    pub skipped: usize,
    /// Dispatches aborted by a store or pool error
    pub errors: usize,
    /// Groups whose endpoint listing failed
    pub directory_failures: usize,
    pub refresh: Option<RefreshReport>,
}

pub struct Sweeper {
    directory: Arc<dyn EndpointDirectory>,
    store: Arc<dyn ProbeStore>,
    pool: AccountPoolHandle,
    dispatcher: Arc<Dispatcher>,
    refresher: Arc<BalanceRefresher>,
    refresh_every: u64,
}

impl Sweeper {
    pub fn new(
        directory: Arc<dyn EndpointDirectory>,
        store: Arc<dyn ProbeStore>,
        pool: AccountPoolHandle,
        dispatcher: Arc<Dispatcher>,
        refresher: Arc<BalanceRefresher>,
        refresh_every: u64,
    ) -> Self {
        Self {
            directory,
            store,
            pool,
            dispatcher,
            refresher,
            refresh_every,
        }
    }

    async fn list_all(&self, report: &mut SweepReport) -> Vec<Endpoint> {
        let mut seen = HashSet::new();
        let mut endpoints = Vec::new();
        for group in NetworkGroup::ALL {
            match self.directory.list_endpoints(group).await {
                Ok(listed) => {
                    endpoints.extend(listed.into_iter().filter(|e| seen.insert(e.url.clone())));
                }
                Err(e) => {
                    report.directory_failures += 1;
                    warn!(group = %group, cause = %e.cause(), error = %e, "Endpoint listing failed, group skipped this cycle");
                }
            }
        }
        endpoints
    }

    pub async fn run(&self, ctx: &SweepContext) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport {
            cycle: ctx.cycle,
            ..SweepReport::default()
        };

        if ctx.refresh_due(self.refresh_every) {
            report.refresh = Some(self.refresher.refresh_all().await?);
        }

        let endpoints = self.list_all(&mut report).await;
        report.endpoints = endpoints.len();

        // A failed insert here is retried by the endpoint's own dispatch
        for endpoint in &endpoints {
            if let Err(e) = self
                .store
                .ensure(&NewProbe::new(endpoint.group, endpoint.url.clone(), ctx.started_at))
                .await
            {
                warn!(endpoint = %endpoint.url, code = e.code(), error = %e, "Record not created ahead of dispatch");
            }
        }

        for group in NetworkGroup::ALL {
            self.pool.clear_cycle(group).await?;
        }

        let dispatches = endpoints
            .iter()
            .map(|endpoint| self.dispatcher.dispatch(endpoint, ctx.started_at));
        for (endpoint, outcome) in endpoints.iter().zip(join_all(dispatches).await) {
            match outcome {
                Ok(DispatchOutcome::Submitted { .. }) => report.submitted += 1,
                Ok(DispatchOutcome::SendFailed { .. }) => report.send_failed += 1,
                Ok(DispatchOutcome::NoCapacity) => report.no_capacity += 1,
                Ok(DispatchOutcome::Skipped(_)) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    error!(endpoint = %endpoint.url, code = e.code(), error = %e, "Dispatch aborted");
                }
            }
        }

        info!(
            cycle = report.cycle,
            endpoints = report.endpoints,
            submitted = report.submitted,
            send_failed = report.send_failed,
            no_capacity = report.no_capacity,
            skipped = report.skipped,
            errors = report.errors,
            "Sweep complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    #[test]
    fn test_context_advances_and_truncates() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 42).unwrap();
        let first = SweepContext::first(t);
        assert_eq!(first.cycle, 1);
        assert_eq!(first.started_at, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let second = first.next(t + TimeDelta::seconds(60));
        assert_eq!(second.cycle, 2);
        assert_eq!(second.started_at, Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 0).unwrap());
    }

    #[test]
    fn test_refresh_due_every_k_cycles() {
        let t = Utc::now();
        let mut ctx = SweepContext::first(t);
        let mut due = Vec::new();
        for _ in 0..20 {
            if ctx.refresh_due(10) {
                due.push(ctx.cycle);
            }
            ctx = ctx.next(t);
        }
        assert_eq!(due, vec![10, 20]);
        assert!(!ctx.refresh_due(0));
    }
}
