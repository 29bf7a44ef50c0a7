//! Pool actor
//!
//! One tokio task owns the [`AccountPool`]; dispatchers and the refresher
//! talk to it through [`AccountPoolHandle`] using oneshot request/response.
//! Every mutation is therefore serialized without a shared lock.

use super::{AccountPool, AccountView, Pairing, SendOutcome};
use crate::core_types::AccountId;
use crate::money::Money;
use crate::network::NetworkGroup;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Account pool channel closed")]
    Closed,
}

enum PoolCommand {
    SelectPair {
        group: NetworkGroup,
        reply: oneshot::Sender<Option<Pairing>>,
    },
    ClearCycle {
        group: NetworkGroup,
        reply: oneshot::Sender<()>,
    },
    MarkInactive {
        id: AccountId,
        group: NetworkGroup,
        reply: oneshot::Sender<bool>,
    },
    ApplyDelta {
        id: AccountId,
        group: NetworkGroup,
        delta: Money,
        reply: oneshot::Sender<()>,
    },
    SetBalance {
        id: AccountId,
        group: NetworkGroup,
        balance: Money,
        reply: oneshot::Sender<()>,
    },
    SeedBalance {
        id: AccountId,
        group: NetworkGroup,
        fallback: Money,
        reply: oneshot::Sender<bool>,
    },
    ReportSendOutcome {
        id: AccountId,
        group: NetworkGroup,
        outcome: SendOutcome,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        group: NetworkGroup,
        reply: oneshot::Sender<Vec<AccountView>>,
    },
}

fn handle_command(pool: &mut AccountPool, command: PoolCommand) {
    // A dropped reply receiver only means the caller went away
    match command {
        PoolCommand::SelectPair { group, reply } => {
            let _ = reply.send(pool.select_pair(group));
        }
        PoolCommand::ClearCycle { group, reply } => {
            pool.clear_cycle(group);
            let _ = reply.send(());
        }
        PoolCommand::MarkInactive { id, group, reply } => {
            let _ = reply.send(pool.mark_inactive(id, group));
        }
        PoolCommand::ApplyDelta {
            id,
            group,
            delta,
            reply,
        } => {
            pool.apply_delta(id, group, delta);
            let _ = reply.send(());
        }
        PoolCommand::SetBalance {
            id,
            group,
            balance,
            reply,
        } => {
            pool.set_balance(id, group, balance);
            let _ = reply.send(());
        }
        PoolCommand::SeedBalance {
            id,
            group,
            fallback,
            reply,
        } => {
            let _ = reply.send(pool.seed_balance(id, group, fallback));
        }
        PoolCommand::ReportSendOutcome {
            id,
            group,
            outcome,
            reply,
        } => {
            let _ = reply.send(pool.report_send_outcome(id, group, outcome));
        }
        PoolCommand::Snapshot { group, reply } => {
            let _ = reply.send(pool.snapshot(group));
        }
    }
}

/// Cloneable handle to the pool actor
#[derive(Clone)]
pub struct AccountPoolHandle {
    tx: mpsc::Sender<PoolCommand>,
}

impl AccountPoolHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> PoolCommand) -> Result<T, PoolError> {
        let (reply, response) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| PoolError::Closed)?;
        response.await.map_err(|_| PoolError::Closed)
    }

    pub async fn select_pair(&self, group: NetworkGroup) -> Result<Option<Pairing>, PoolError> {
        self.request(|reply| PoolCommand::SelectPair { group, reply }).await
    }

    pub async fn clear_cycle(&self, group: NetworkGroup) -> Result<(), PoolError> {
        self.request(|reply| PoolCommand::ClearCycle { group, reply }).await
    }

    pub async fn mark_inactive(&self, id: AccountId, group: NetworkGroup) -> Result<bool, PoolError> {
        self.request(|reply| PoolCommand::MarkInactive { id, group, reply }).await
    }

    pub async fn apply_delta(&self, id: AccountId, group: NetworkGroup, delta: Money) -> Result<(), PoolError> {
        self.request(|reply| PoolCommand::ApplyDelta {
            id,
            group,
            delta,
            reply,
        })
        .await
    }

    pub async fn set_balance(&self, id: AccountId, group: NetworkGroup, balance: Money) -> Result<(), PoolError> {
        self.request(|reply| PoolCommand::SetBalance {
            id,
            group,
            balance,
            reply,
        })
        .await
    }

    pub async fn seed_balance(&self, id: AccountId, group: NetworkGroup, fallback: Money) -> Result<bool, PoolError> {
        self.request(|reply| PoolCommand::SeedBalance {
            id,
            group,
            fallback,
            reply,
        })
        .await
    }

    pub async fn report_send_outcome(
        &self,
        id: AccountId,
        group: NetworkGroup,
        outcome: SendOutcome,
    ) -> Result<bool, PoolError> {
        self.request(|reply| PoolCommand::ReportSendOutcome {
            id,
            group,
            outcome,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self, group: NetworkGroup) -> Result<Vec<AccountView>, PoolError> {
        self.request(|reply| PoolCommand::Snapshot { group, reply }).await
    }
}

/// Start the actor task.
///
/// The task ends when every handle is dropped and returns the pool, which
/// lets tests inspect final state.
pub fn spawn_pool(pool: AccountPool, buffer: usize) -> (AccountPoolHandle, JoinHandle<AccountPool>) {
    let (tx, mut rx) = mpsc::channel(buffer.max(1));
    let task = tokio::spawn(async move {
        let mut pool = pool;
        while let Some(command) = rx.recv().await {
            handle_command(&mut pool, command);
        }
        debug!("Account pool actor stopped");
        pool
    });
    (AccountPoolHandle { tx }, task)
}
