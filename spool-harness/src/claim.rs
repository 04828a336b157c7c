//! Payout check for claims.

use alloy::primitives::{Address, U256};

use crate::error::{EntityKey, HarnessError};
use crate::ledger::{ActionLedger, LedgerEntry};
use crate::snapshot::{BalanceSnapshot, UserVaultState};
use crate::tolerance::{Tolerances, check_relative};

/// What a claim should pay out: everything owed, plus any deposits that are
/// covered neither by the remaining vault position nor by the owed balance.
pub fn expected_payout(entry: &LedgerEntry, before: &UserVaultState) -> U256 {
    let covered = before.total_underlying + before.owed;
    before.owed + entry.unclaimed_deposits.saturating_sub(covered)
}

/// Verify the wallet delta of every claimed pair in `ledger`.
///
/// Returns the pairs that were checked; the caller resets them.
pub fn check_claims(
    before: &BalanceSnapshot,
    after: &BalanceSnapshot,
    ledger: &ActionLedger,
    tolerances: &Tolerances,
) -> Result<Vec<(Address, Address)>, HarnessError> {
    let mut checked = Vec::new();

    for (user, vault, entry) in ledger.entries().filter(|(_, _, e)| e.claimed) {
        let asset = before.vault(vault)?.asset;
        let position = before.user_vault_or_default(user, vault);
        let expected = expected_payout(entry, &position);

        let wallet_before = before.wallet(user, asset)?;
        let wallet_after = after.wallet(user, asset)?;

        check_relative(
            EntityKey::Wallet { user, asset },
            "balance after claim",
            wallet_before + expected,
            wallet_after,
            expected,
            tolerances.claim,
            tolerances.floor,
        )
        .map_err(|v| {
            tracing::warn!(%vault, "{v}");
            HarnessError::from(v)
        })?;

        tracing::debug!(%user, %vault, %wallet_after, "claim reconciled");
        checked.push((user, vault));
    }

    Ok(checked)
}
