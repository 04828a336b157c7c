//! Point-in-time balance snapshots.
//!
//! A [`BalanceSnapshot`] is captured from a [`SpoolProtocol`] for a fixed
//! [`SnapshotScope`] and is never mutated afterwards; reconciliation only
//! ever diffs two of them.

use std::collections::{BTreeMap, BTreeSet};

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::codec::decode_proportion_bitmap;
use crate::error::HarnessError;
use crate::protocol::SpoolProtocol;

/// Shares minted per underlying unit when a vault is empty.
pub const SHARE_MULTIPLIER: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyTotals {
    pub total_shares: U256,
    pub total_underlying: U256,
}

/// Actions waiting for the current (`deposit`, `withdraw_shares`) and the
/// following (`*_next`) do-hard-work index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingActions {
    pub deposit: U256,
    pub withdraw_shares: U256,
    pub deposit_next: U256,
    pub withdraw_shares_next: U256,
}

impl PendingActions {
    pub fn total_deposit(&self) -> U256 {
        self.deposit + self.deposit_next
    }

    pub fn total_withdraw_shares(&self) -> U256 {
        self.withdraw_shares + self.withdraw_shares_next
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultStrategyPosition {
    pub balance: U256,
    pub vault_shares: U256,
    /// Basis points, decoded from the vault's proportion bitmap.
    pub target_proportion: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultState {
    pub asset: Address,
    pub total_shares: U256,
    pub total_underlying: U256,
    pub pending: PendingActions,
    pub strategies: BTreeMap<Address, VaultStrategyPosition>,
}

impl VaultState {
    /// Shares minted for `amount` at this vault's share price.
    pub fn shares_for_underlying(&self, amount: U256) -> U256 {
        if self.total_shares.is_zero() || self.total_underlying.is_zero() {
            return amount * U256::from(SHARE_MULTIPLIER);
        }
        amount * self.total_shares / self.total_underlying
    }

    /// Underlying paid out for `shares` at this vault's share price, rounded down.
    pub fn underlying_for_shares(&self, shares: U256) -> U256 {
        if self.total_shares.is_zero() {
            return U256::ZERO;
        }
        shares * self.total_underlying / self.total_shares
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserVaultState {
    pub shares: U256,
    pub active_deposit: U256,
    pub owed: U256,
    pub withdrawn_deposits: U256,
    pub total_underlying: U256,
    pub pending: PendingActions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    pub vaults: BTreeMap<Address, UserVaultState>,
    /// Wallet balance per asset token.
    pub wallets: BTreeMap<Address, U256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub captured_at: DateTime<Utc>,
    pub strategies: BTreeMap<Address, StrategyTotals>,
    pub vaults: BTreeMap<Address, VaultState>,
    pub users: BTreeMap<Address, UserState>,
}

impl BalanceSnapshot {
    pub fn vault(&self, vault: Address) -> Result<&VaultState, HarnessError> {
        self.vaults.get(&vault).ok_or_else(|| {
            HarnessError::SnapshotInconsistency(format!("vault {vault} missing from snapshot"))
        })
    }

    pub fn strategy(&self, strategy: Address) -> Result<&StrategyTotals, HarnessError> {
        self.strategies.get(&strategy).ok_or_else(|| {
            HarnessError::SnapshotInconsistency(format!("strategy {strategy} missing from snapshot"))
        })
    }

    pub fn user_vault(&self, user: Address, vault: Address) -> Result<&UserVaultState, HarnessError> {
        self.users
            .get(&user)
            .and_then(|u| u.vaults.get(&vault))
            .ok_or_else(|| {
                HarnessError::SnapshotInconsistency(format!(
                    "user {user} has no position in vault {vault} in snapshot"
                ))
            })
    }

    /// A position that was never captured is treated as empty.
    pub fn user_vault_or_default(&self, user: Address, vault: Address) -> UserVaultState {
        self.users
            .get(&user)
            .and_then(|u| u.vaults.get(&vault))
            .copied()
            .unwrap_or_default()
    }

    pub fn wallet(&self, user: Address, asset: Address) -> Result<U256, HarnessError> {
        self.users
            .get(&user)
            .and_then(|u| u.wallets.get(&asset))
            .copied()
            .ok_or_else(|| {
                HarnessError::SnapshotInconsistency(format!(
                    "wallet of {user} for asset {asset} missing from snapshot"
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRef {
    pub address: Address,
    pub asset: Address,
}

/// The entities a snapshot covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotScope {
    pub users: BTreeSet<Address>,
    pub vaults: Vec<VaultRef>,
    pub strategies: Vec<Address>,
    /// User × vault pairs to read per-user vault state for.
    pub positions: BTreeSet<(Address, Address)>,
}

impl SnapshotScope {
    pub fn new(vaults: Vec<VaultRef>, strategies: Vec<Address>) -> Self {
        Self {
            vaults,
            strategies,
            ..Default::default()
        }
    }

    pub fn add_user(&mut self, user: Address) {
        self.users.insert(user);
    }

    /// Start reading `user`'s position in `vault`.
    pub fn track(&mut self, user: Address, vault: Address) {
        self.users.insert(user);
        self.positions.insert((user, vault));
    }

    pub fn vault_ref(&self, vault: Address) -> Result<&VaultRef, HarnessError> {
        self.vaults.iter().find(|v| v.address == vault).ok_or_else(|| {
            HarnessError::SnapshotInconsistency(format!("vault {vault} is not in scope"))
        })
    }

    fn assets(&self) -> BTreeSet<Address> {
        self.vaults.iter().map(|v| v.asset).collect()
    }
}

/// Capture a snapshot of everything in `scope`.
///
/// Each vault is settled before any of its dependent reads are issued,
/// including per-user positions in it. Reads for independent entities run
/// concurrently.
pub async fn capture<P>(protocol: &P, scope: &SnapshotScope) -> Result<BalanceSnapshot, HarnessError>
where
    P: SpoolProtocol + ?Sized,
{
    for &(_, vault) in &scope.positions {
        scope.vault_ref(vault)?;
    }

    let vaults = try_join_all(scope.vaults.iter().map(|v| capture_vault(protocol, scope, v)));
    let strategies = try_join_all(scope.strategies.iter().map(|&strategy| async move {
        let totals = protocol.strategy_totals(strategy).await?;
        Ok::<_, HarnessError>((strategy, totals))
    }));
    let (vaults, strategies) = futures::try_join!(vaults, strategies)?;

    let users = try_join_all(scope.users.iter().map(|&user| capture_user(protocol, scope, user))).await?;

    let snapshot = BalanceSnapshot {
        captured_at: Utc::now(),
        strategies: strategies.into_iter().collect(),
        vaults: vaults.into_iter().collect(),
        users: users.into_iter().collect(),
    };

    tracing::debug!(
        vaults = snapshot.vaults.len(),
        strategies = snapshot.strategies.len(),
        users = snapshot.users.len(),
        "snapshot captured"
    );
    Ok(snapshot)
}

async fn capture_vault<P>(
    protocol: &P,
    scope: &SnapshotScope,
    vault: &VaultRef,
) -> Result<(Address, VaultState), HarnessError>
where
    P: SpoolProtocol + ?Sized,
{
    let totals = protocol.settle_vault(vault.address).await?;
    let allocation = protocol.vault_allocation(vault.address).await?;

    if let Some(unknown) = allocation
        .strategies
        .iter()
        .find(|s| !scope.strategies.contains(s))
    {
        return Err(HarnessError::SnapshotInconsistency(format!(
            "vault {} is allocated to strategy {unknown} which is not in the registry",
            vault.address
        )));
    }

    let proportions = decode_proportion_bitmap(allocation.proportions, allocation.strategies.len())?;

    let positions = try_join_all(
        allocation
            .strategies
            .iter()
            .map(|&strategy| protocol.vault_strategy_position(vault.address, strategy)),
    )
    .await?;

    let strategies = allocation
        .strategies
        .iter()
        .zip(positions)
        .zip(proportions)
        .map(|((&strategy, reading), target_proportion)| {
            (
                strategy,
                VaultStrategyPosition {
                    balance: reading.balance,
                    vault_shares: reading.shares,
                    target_proportion,
                },
            )
        })
        .collect();

    Ok((
        vault.address,
        VaultState {
            asset: vault.asset,
            total_shares: totals.total_shares,
            total_underlying: totals.total_underlying,
            pending: totals.pending,
            strategies,
        },
    ))
}

async fn capture_user<P>(
    protocol: &P,
    scope: &SnapshotScope,
    user: Address,
) -> Result<(Address, UserState), HarnessError>
where
    P: SpoolProtocol + ?Sized,
{
    let vaults = try_join_all(
        scope
            .positions
            .iter()
            .filter(|(u, _)| *u == user)
            .map(|&(_, vault)| async move {
                let state = protocol.user_vault_state(user, vault).await?;
                Ok::<_, HarnessError>((vault, state))
            }),
    );
    let wallets = try_join_all(scope.assets().into_iter().map(|asset| async move {
        let balance = protocol.wallet_balance(user, asset).await?;
        Ok::<_, HarnessError>((asset, balance))
    }));
    let (vaults, wallets) = futures::try_join!(vaults, wallets)?;

    Ok((
        user,
        UserState {
            vaults: vaults.into_iter().collect(),
            wallets: wallets.into_iter().collect(),
        },
    ))
}
