//! Reconciliation of balance snapshots around a do-hard-work cycle.
//!
//! Given the snapshot before user actions (S1), optionally the one after the
//! actions but before DHW (S2), and the one after DHW (S3), checks that every
//! user position, vault total and strategy total moved exactly as the
//! recorded actions say it should. The first mismatch aborts with an
//! [`HarnessError::InvariantViolation`].

use std::collections::{BTreeMap, BTreeSet};

use alloy::primitives::{Address, U256};
use serde::Serialize;

use crate::codec::FULL_PROPORTION;
use crate::error::{EntityKey, HarnessError, Violation};
use crate::ledger::{ActionLedger, LedgerEntry};
use crate::snapshot::{BalanceSnapshot, UserVaultState, VaultState};
use crate::tolerance::{
    ExpectedChange, Tolerance, Tolerances, check_exact, check_relative, check_within,
};

/// The snapshots bracketing one cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleSnapshots<'a> {
    pub before: &'a BalanceSnapshot,
    pub pending: Option<&'a BalanceSnapshot>,
    pub after: &'a BalanceSnapshot,
}

/// Expected movement of a vault, summed over its users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VaultExpectation {
    pub shares: ExpectedChange,
    pub underlying: ExpectedChange,
    pub deposits: U256,
    pub withdraw_shares: U256,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub positions_checked: usize,
    pub vaults: BTreeMap<Address, VaultExpectation>,
    pub strategies_checked: usize,
}

pub fn reconcile(
    cycle: &CycleSnapshots<'_>,
    ledger: &ActionLedger,
    tolerances: &Tolerances,
) -> Result<ReconcileReport, HarnessError> {
    let mut pairs: BTreeSet<(Address, Address)> = ledger.pairs().collect();
    for (&user, state) in &cycle.after.users {
        pairs.extend(state.vaults.keys().map(|&vault| (user, vault)));
    }

    let mut report = ReconcileReport::default();

    for &(user, vault) in &pairs {
        let entry = ledger.entry(user, vault);
        let vault_before = cycle.before.vault(vault)?;

        if let Some(pending) = cycle.pending {
            check_pending_user(cycle.before, pending, user, vault, &entry)?;
        }

        let expectation = check_user(cycle, vault_before, user, vault, &entry, tolerances)
            .map_err(reject)?;

        let totals = report.vaults.entry(vault).or_default();
        totals.shares += expectation.shares;
        totals.underlying += expectation.underlying;
        totals.deposits += entry.deposited;
        totals.withdraw_shares += entry.withdrawn_shares;
        report.positions_checked += 1;
    }

    for (&vault, after) in &cycle.after.vaults {
        let before = cycle.before.vault(vault)?;
        let expectation = report.vaults.entry(vault).or_default();

        if let Some(pending) = cycle.pending {
            check_pending_vault(before, pending.vault(vault)?, vault, expectation)
                .map_err(reject)?;
        }
        check_vault(before, after, vault, expectation, tolerances).map_err(reject)?;
    }

    report.strategies_checked = check_strategy_totals(cycle.after, tolerances)?;

    tracing::info!(
        positions = report.positions_checked,
        vaults = report.vaults.len(),
        strategies = report.strategies_checked,
        "cycle reconciled"
    );
    Ok(report)
}

fn reject(violation: Violation) -> HarnessError {
    tracing::warn!("{violation}");
    violation.into()
}

/// Expected share and underlying change for one user position.
fn user_expectation(vault: &VaultState, entry: &LedgerEntry) -> VaultExpectation {
    let mut shares = ExpectedChange::up(vault.shares_for_underlying(entry.deposited));
    shares += ExpectedChange::down(entry.withdrawn_shares);

    let mut underlying = ExpectedChange::up(entry.deposited);
    underlying += ExpectedChange::down(vault.underlying_for_shares(entry.withdrawn_shares));

    VaultExpectation {
        shares,
        underlying,
        deposits: entry.deposited,
        withdraw_shares: entry.withdrawn_shares,
    }
}

fn check_user(
    cycle: &CycleSnapshots<'_>,
    vault_before: &VaultState,
    user: Address,
    vault: Address,
    entry: &LedgerEntry,
    tolerances: &Tolerances,
) -> Result<VaultExpectation, Violation> {
    let key = EntityKey::UserVault { user, vault };
    let before = cycle.before.user_vault_or_default(user, vault);
    let after = cycle.after.user_vault_or_default(user, vault);

    if entry.is_idle() {
        check_exact(key, "shares", before.shares, after.shares)?;
        check_exact(key, "active deposit", before.active_deposit, after.active_deposit)?;
        check_relative(
            key,
            "underlying",
            before.total_underlying,
            after.total_underlying,
            before.total_underlying,
            tolerances.idle,
            tolerances.floor,
        )?;
        return Ok(VaultExpectation::default());
    }

    let expectation = user_expectation(vault_before, entry);
    // Mixed actions take the looser of the two bands.
    let tolerance = match (entry.deposited.is_zero(), entry.withdrawn_shares.is_zero()) {
        (_, true) => tolerances.deposit,
        (true, false) => tolerances.withdraw,
        (false, false) => tolerances.deposit.max(tolerances.withdraw),
    };

    check_relative(
        key,
        "shares",
        expectation.shares.apply(before.shares),
        after.shares,
        expectation.shares.magnitude(),
        tolerance,
        tolerances.floor,
    )?;
    check_relative(
        key,
        "underlying",
        expectation.underlying.apply(before.total_underlying),
        after.total_underlying,
        expectation.underlying.magnitude(),
        tolerance,
        tolerances.floor,
    )?;
    check_active_deposit(key, &before, &after, entry, tolerance)?;

    Ok(expectation)
}

/// Deposits add to the active deposit one-for-one; withdrawals release it in
/// proportion to the shares burned.
fn check_active_deposit(
    key: EntityKey,
    before: &UserVaultState,
    after: &UserVaultState,
    entry: &LedgerEntry,
    tolerance: Tolerance,
) -> Result<(), Violation> {
    if entry.withdrawn_shares.is_zero() {
        return check_exact(
            key,
            "active deposit",
            before.active_deposit + entry.deposited,
            after.active_deposit,
        );
    }

    let released = if before.shares.is_zero() {
        U256::ZERO
    } else {
        before.active_deposit * entry.withdrawn_shares.min(before.shares) / before.shares
    };
    let mut change = ExpectedChange::up(entry.deposited);
    change += ExpectedChange::down(released);

    check_relative(
        key,
        "active deposit",
        change.apply(before.active_deposit),
        after.active_deposit,
        change.magnitude(),
        tolerance,
        U256::from(1u8),
    )
}

fn check_pending_user(
    before: &BalanceSnapshot,
    pending: &BalanceSnapshot,
    user: Address,
    vault: Address,
    entry: &LedgerEntry,
) -> Result<(), HarnessError> {
    let key = EntityKey::UserVault { user, vault };
    let was = before.user_vault_or_default(user, vault).pending;
    let now = pending.user_vault_or_default(user, vault).pending;

    check_exact(
        key,
        "pending deposit",
        was.total_deposit() + entry.deposited,
        now.total_deposit(),
    )
    .map_err(reject)?;
    check_exact(
        key,
        "pending withdraw shares",
        was.total_withdraw_shares() + entry.withdrawn_shares,
        now.total_withdraw_shares(),
    )
    .map_err(reject)
}

fn check_pending_vault(
    before: &VaultState,
    pending: &VaultState,
    vault: Address,
    expectation: &VaultExpectation,
) -> Result<(), Violation> {
    let key = EntityKey::Vault(vault);
    check_exact(
        key,
        "pending deposit",
        before.pending.total_deposit() + expectation.deposits,
        pending.pending.total_deposit(),
    )?;
    check_exact(
        key,
        "pending withdraw shares",
        before.pending.total_withdraw_shares() + expectation.withdraw_shares,
        pending.pending.total_withdraw_shares(),
    )
}

fn check_vault(
    before: &VaultState,
    after: &VaultState,
    vault: Address,
    expectation: &VaultExpectation,
    tolerances: &Tolerances,
) -> Result<(), Violation> {
    let key = EntityKey::Vault(vault);
    check_relative(
        key,
        "total shares",
        expectation.shares.apply(before.total_shares),
        after.total_shares,
        expectation.shares.magnitude(),
        tolerances.vault,
        tolerances.floor,
    )?;
    check_relative(
        key,
        "total underlying",
        expectation.underlying.apply(before.total_underlying),
        after.total_underlying,
        expectation.underlying.magnitude(),
        tolerances.vault,
        tolerances.floor,
    )
}

/// Every strategy's totals must equal the sum of the vault positions in it.
///
/// Returns the number of strategies checked.
pub fn check_strategy_totals(
    snapshot: &BalanceSnapshot,
    tolerances: &Tolerances,
) -> Result<usize, HarnessError> {
    for (&strategy, totals) in &snapshot.strategies {
        let (balance, shares) = snapshot
            .vaults
            .values()
            .filter_map(|v| v.strategies.get(&strategy))
            .fold((U256::ZERO, U256::ZERO), |(b, s), p| (b + p.balance, s + p.vault_shares));

        let key = EntityKey::Strategy(strategy);
        check_relative(
            key,
            "total shares",
            shares,
            totals.total_shares,
            shares,
            tolerances.strategy,
            tolerances.dust,
        )
        .map_err(reject)?;
        check_relative(
            key,
            "total underlying",
            balance,
            totals.total_underlying,
            balance,
            tolerances.strategy,
            tolerances.dust,
        )
        .map_err(reject)?;
    }
    Ok(snapshot.strategies.len())
}

/// Standing invariants of a single snapshot: user shares add up to each
/// vault's total, and vault positions add up to each strategy's totals.
///
/// Only meaningful when the snapshot covers every holder of each vault.
pub fn check_conservation(
    snapshot: &BalanceSnapshot,
    tolerances: &Tolerances,
) -> Result<(), HarnessError> {
    for (&vault, state) in &snapshot.vaults {
        let user_shares = snapshot
            .users
            .values()
            .filter_map(|u| u.vaults.get(&vault))
            .fold(U256::ZERO, |acc, p| acc + p.shares);

        check_within(
            EntityKey::Vault(vault),
            "user shares",
            state.total_shares,
            user_shares,
            tolerances.dust,
        )
        .map_err(reject)?;
    }

    check_strategy_totals(snapshot, tolerances)?;
    Ok(())
}

/// After a reallocation and its DHW, vault positions should sit at the
/// target proportions, measured against the vault's invested total.
pub fn check_target_proportions(
    snapshot: &BalanceSnapshot,
    tolerances: &Tolerances,
) -> Result<(), HarnessError> {
    for (&vault, state) in &snapshot.vaults {
        let invested = state
            .strategies
            .values()
            .fold(U256::ZERO, |acc, p| acc + p.balance);
        if invested.is_zero() {
            continue;
        }

        for (&strategy, position) in &state.strategies {
            let target = invested * U256::from(position.target_proportion) / U256::from(FULL_PROPORTION);
            let key = EntityKey::VaultStrategy { vault, strategy };
            if !tolerances.vault.admits(target, position.balance, invested) {
                return Err(reject(Violation {
                    entity: key,
                    quantity: "balance",
                    expected: target,
                    actual: position.balance,
                    tolerance: tolerances.vault.to_string(),
                }));
            }
        }
    }
    Ok(())
}

/// A reallocation moves value between strategies without creating any.
pub fn check_reallocation(
    before: &BalanceSnapshot,
    after: &BalanceSnapshot,
    tolerances: &Tolerances,
) -> Result<(), HarnessError> {
    let total = |s: &BalanceSnapshot| {
        s.strategies
            .values()
            .fold(U256::ZERO, |acc, t| acc + t.total_underlying)
    };
    let (was, now) = (total(before), total(after));

    for (&vault, state) in &before.vaults {
        let after_state = after.vault(vault)?;
        check_relative(
            EntityKey::Vault(vault),
            "total underlying",
            state.total_underlying,
            after_state.total_underlying,
            state.total_underlying,
            tolerances.strategy,
            tolerances.floor,
        )
        .map_err(reject)?;
    }

    check_relative(
        EntityKey::AllStrategies,
        "total underlying",
        was,
        now,
        was,
        tolerances.strategy,
        tolerances.floor,
    )
    .map_err(reject)
}

/// Each strategy ends within `reallocation_units` of where it started, as
/// after two equal-and-opposite reallocations.
pub fn check_round_trip(
    before: &BalanceSnapshot,
    after: &BalanceSnapshot,
    tolerances: &Tolerances,
) -> Result<(), HarnessError> {
    for (&strategy, totals) in &before.strategies {
        let now = after.strategy(strategy)?;
        check_within(
            EntityKey::Strategy(strategy),
            "total underlying",
            totals.total_underlying,
            now.total_underlying,
            tolerances.reallocation_units,
        )
        .map_err(reject)?;
    }
    Ok(())
}
