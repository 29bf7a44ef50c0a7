//! Balance refresher
//!
//! Re-reads every account's balance in every network group from that
//! group's balance endpoint. A failed read never deactivates an account: the
//! cached value is kept, or the group's fallback is seeded when none exists.

use super::{AccountIdentity, AccountPoolHandle, PoolError};
use crate::chain::ChainRpc;
use crate::money::Money;
use crate::network::{NetworkGroup, Networks};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub failed: usize,
    /// Failures that seeded the fallback balance
    pub seeded: usize,
}

pub struct BalanceRefresher {
    rpc: Arc<dyn ChainRpc>,
    pool: AccountPoolHandle,
    networks: Arc<Networks>,
    accounts: Vec<Arc<AccountIdentity>>,
}

impl BalanceRefresher {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        pool: AccountPoolHandle,
        networks: Arc<Networks>,
        accounts: Vec<Arc<AccountIdentity>>,
    ) -> Self {
        Self {
            rpc,
            pool,
            networks,
            accounts,
        }
    }

    /// Fetch one balance and record the outcome in the pool.
    /// Ok(None) on success, Ok(Some(seeded)) on a failed read.
    async fn refresh_one(
        &self,
        group: NetworkGroup,
        account: &AccountIdentity,
    ) -> Result<Option<bool>, PoolError> {
        let profile = self.networks.profile(group);
        let currency = profile.currency();
        match self
            .rpc
            .balance(&profile.balance_endpoint, &account.address.to_string(), &currency)
            .await
        {
            Ok(balance) => {
                self.pool
                    .set_balance(account.id, group, Money::new(balance.amount()))
                    .await?;
                Ok(None)
            }
            Err(e) => {
                warn!(
                    group = %group,
                    account = %account.name,
                    cause = %e.cause(),
                    error = %e,
                    "Balance read failed, keeping cached value"
                );
                let seeded = match profile.fallback_balance {
                    Some(fallback) => self.pool.seed_balance(account.id, group, fallback).await?,
                    None => false,
                };
                Ok(Some(seeded))
            }
        }
    }

    /// Refresh all accounts in all groups concurrently
    pub async fn refresh_all(&self) -> Result<RefreshReport, PoolError> {
        let jobs = NetworkGroup::ALL
            .into_iter()
            .flat_map(|g| self.accounts.iter().map(move |a| (g, a)))
            .map(|(g, a)| self.refresh_one(g, a));

        let mut report = RefreshReport::default();
        for outcome in join_all(jobs).await {
            match outcome? {
                None => report.refreshed += 1,
                Some(seeded) => {
                    report.failed += 1;
                    if seeded {
                        report.seeded += 1;
                    }
                }
            }
        }

        info!(
            refreshed = report.refreshed,
            failed = report.failed,
            seeded = report.seeded,
            "Balance refresh complete"
        );
        Ok(report)
    }
}
