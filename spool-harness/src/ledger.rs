//! Record of the actions a scenario has performed per user and vault.

use std::collections::BTreeMap;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Deposited since the last reconciled cycle.
    pub deposited: U256,
    /// Shares withdrawn since the last reconciled cycle.
    pub withdrawn_shares: U256,
    /// Deposited since the last claim check.
    pub unclaimed_deposits: U256,
    pub claimed: bool,
}

impl LedgerEntry {
    pub fn is_idle(&self) -> bool {
        self.deposited.is_zero() && self.withdrawn_shares.is_zero()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionLedger {
    entries: BTreeMap<(Address, Address), LedgerEntry>,
}

impl ActionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_deposit(&mut self, user: Address, vault: Address, amount: U256) {
        let entry = self.entries.entry((user, vault)).or_default();
        entry.deposited += amount;
        entry.unclaimed_deposits += amount;
    }

    pub fn record_withdraw(&mut self, user: Address, vault: Address, shares: U256) {
        self.entries.entry((user, vault)).or_default().withdrawn_shares += shares;
    }

    pub fn record_claim(&mut self, user: Address, vault: Address) {
        self.entries.entry((user, vault)).or_default().claimed = true;
    }

    /// The entry for a pair, or an empty one if nothing was recorded.
    pub fn entry(&self, user: Address, vault: Address) -> LedgerEntry {
        self.entries.get(&(user, vault)).copied().unwrap_or_default()
    }

    pub fn entries(&self) -> impl Iterator<Item = (Address, Address, &LedgerEntry)> {
        self.entries.iter().map(|(&(user, vault), entry)| (user, vault, entry))
    }

    pub fn pairs(&self) -> impl Iterator<Item = (Address, Address)> + '_ {
        self.entries.keys().copied()
    }

    /// Forget per-cycle amounts once a cycle has been reconciled.
    pub fn close_cycle(&mut self) {
        for entry in self.entries.values_mut() {
            entry.deposited = U256::ZERO;
            entry.withdrawn_shares = U256::ZERO;
        }
    }

    /// Clear a pair after its claim has been asserted.
    pub fn reset(&mut self, user: Address, vault: Address) {
        if let Some(entry) = self.entries.get_mut(&(user, vault)) {
            entry.unclaimed_deposits = U256::ZERO;
            entry.claimed = false;
        }
    }
}
