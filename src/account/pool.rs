//! Account pool: selection rules, cached balances and liveness.
//!
//! Not thread-safe on its own; the actor in [`super::actor`] owns the only
//! instance and serializes every call.

use super::{AccountIdentity, AccountView, Pairing, SendOutcome};
use crate::core_types::AccountId;
use crate::money::Money;
use crate::network::NetworkGroup;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
struct Slot {
    balance: Option<Money>,
    active: bool,
    failure_streak: u32,
    /// Endpoints that failed this account during the current streak
    streak_endpoints: HashSet<String>,
    account_faults: u32,
}

impl Slot {
    fn reset_streak(&mut self) {
        self.failure_streak = 0;
        self.streak_endpoints.clear();
        self.account_faults = 0;
    }

    /// A streak made entirely on one endpoint points at the node
    fn blames_account(&self) -> bool {
        self.account_faults > 0 || self.streak_endpoints.len() >= 2
    }
}

#[derive(Debug, Default)]
struct GroupLedger {
    slots: Vec<Slot>,
    /// Senders already chosen since the last `clear_cycle`
    used: HashSet<AccountId>,
}

pub struct AccountPool {
    accounts: Vec<Arc<AccountIdentity>>,
    ledgers: HashMap<NetworkGroup, GroupLedger>,
    failure_streak_limit: u32,
}

impl AccountPool {
    /// Every account starts active with an unknown balance in every group
    pub fn new(accounts: Vec<Arc<AccountIdentity>>, failure_streak_limit: u32) -> Self {
        let ledgers = NetworkGroup::ALL
            .into_iter()
            .map(|g| {
                let slots = vec![
                    Slot {
                        active: true,
                        ..Slot::default()
                    };
                    accounts.len()
                ];
                (
                    g,
                    GroupLedger {
                        slots,
                        used: HashSet::new(),
                    },
                )
            })
            .collect();
        Self {
            accounts,
            ledgers,
            failure_streak_limit: failure_streak_limit.max(1),
        }
    }

    pub fn accounts(&self) -> &[Arc<AccountIdentity>] {
        &self.accounts
    }

    fn ledger_mut(&mut self, group: NetworkGroup) -> &mut GroupLedger {
        self.ledgers.entry(group).or_default()
    }

    fn slot_mut(&mut self, id: AccountId, group: NetworkGroup) -> Option<&mut Slot> {
        self.ledger_mut(group).slots.get_mut(id)
    }

    /// Choose a sender/receiver pair for one dispatch in `group`.
    ///
    /// Sender: highest cached balance, positive, not yet used this cycle.
    /// Receiver: lowest cached balance other than the sender.
    pub fn select_pair(&mut self, group: NetworkGroup) -> Option<Pairing> {
        let ledger = self.ledgers.entry(group).or_default();

        let mut candidates: Vec<(AccountId, Money)> = Vec::with_capacity(ledger.slots.len());
        for (id, slot) in ledger.slots.iter_mut().enumerate() {
            if !slot.active {
                continue;
            }
            match slot.balance {
                Some(balance) => candidates.push((id, balance)),
                None => {
                    slot.active = false;
                    warn!(group = %group, account_id = id, "Balance unknown, account marked inactive");
                }
            }
        }

        // Stable: equal balances keep configuration order
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        let sender = candidates
            .iter()
            .find(|(id, balance)| !ledger.used.contains(id) && balance.is_positive())
            .map(|(id, _)| *id);
        let receiver = sender.and_then(|s| candidates.iter().rev().find(|(id, _)| *id != s).map(|(id, _)| *id));

        match (sender, receiver) {
            (Some(sender), Some(receiver)) => {
                ledger.used.insert(sender);
                debug!(group = %group, sender, receiver, "Pair selected");
                Some(Pairing {
                    sender: self.accounts[sender].clone(),
                    receiver: self.accounts[receiver].clone(),
                })
            }
            _ => {
                warn!(
                    group = %group,
                    candidates = candidates.len(),
                    used = ledger.used.len(),
                    "Capacity exhausted: no available sender/receiver pair"
                );
                None
            }
        }
    }

    pub fn clear_cycle(&mut self, group: NetworkGroup) {
        self.ledger_mut(group).used.clear();
    }

    /// Returns true if the account was active before the call
    pub fn mark_inactive(&mut self, id: AccountId, group: NetworkGroup) -> bool {
        match self.slot_mut(id, group) {
            Some(slot) if slot.active => {
                slot.active = false;
                info!(group = %group, account_id = id, "Account marked inactive");
                true
            }
            _ => false,
        }
    }

    /// Optimistic update after submission; no-op while the balance is unknown
    pub fn apply_delta(&mut self, id: AccountId, group: NetworkGroup, delta: Money) {
        if let Some(slot) = self.slot_mut(id, group)
            && let Some(balance) = slot.balance.as_mut()
        {
            *balance += delta;
        }
    }

    /// Authoritative balance from a successful fetch
    pub fn set_balance(&mut self, id: AccountId, group: NetworkGroup, balance: Money) {
        if let Some(slot) = self.slot_mut(id, group) {
            if !slot.active {
                info!(group = %group, account_id = id, %balance, "Account reactivated by balance refresh");
            }
            slot.balance = Some(balance);
            slot.active = true;
            slot.reset_streak();
        }
    }

    /// Fill an unknown balance with a fallback; liveness is left alone
    pub fn seed_balance(&mut self, id: AccountId, group: NetworkGroup, fallback: Money) -> bool {
        match self.slot_mut(id, group) {
            Some(slot) if slot.balance.is_none() => {
                slot.balance = Some(fallback);
                true
            }
            _ => false,
        }
    }

    /// Track consecutive failed sends; returns true when this call deactivated the account.
    ///
    /// The account is deactivated once the streak reaches the limit and the
    /// failures followed it across at least two endpoints, or at least one
    /// of them was the account's own fault.
    pub fn report_send_outcome(&mut self, id: AccountId, group: NetworkGroup, outcome: SendOutcome) -> bool {
        let limit = self.failure_streak_limit;
        let Some(slot) = self.slot_mut(id, group) else {
            return false;
        };
        match outcome {
            SendOutcome::Delivered => {
                slot.reset_streak();
                return false;
            }
            SendOutcome::EndpointFailure { endpoint } => {
                slot.streak_endpoints.insert(endpoint);
            }
            SendOutcome::AccountFailure => slot.account_faults += 1,
        }
        slot.failure_streak += 1;
        let streak = slot.failure_streak;
        if streak < limit {
            return false;
        }
        if !slot.blames_account() {
            debug!(group = %group, account_id = id, streak, "Failure streak confined to one endpoint, account kept");
            return false;
        }
        warn!(group = %group, account_id = id, streak, "Send failure streak reached limit");
        self.mark_inactive(id, group)
    }

    pub fn snapshot(&self, group: NetworkGroup) -> Vec<AccountView> {
        let Some(ledger) = self.ledgers.get(&group) else {
            return Vec::new();
        };
        ledger
            .slots
            .iter()
            .enumerate()
            .map(|(id, slot)| AccountView {
                id,
                address: self.accounts[id].address,
                balance: slot.balance,
                active: slot.active,
                failure_streak: slot.failure_streak,
                used_this_cycle: ledger.used.contains(&id),
            })
            .collect()
    }
}
