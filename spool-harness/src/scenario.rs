//! Scenario driver.
//!
//! Runs user actions against a [`SpoolProtocol`] while recording them in an
//! [`ActionLedger`], and reconciles each do-hard-work cycle:
//!
//! ```text
//! begin_cycle()     S1
//! deposit/withdraw  ledger
//! mark_pending()    S2 (optional)
//! finish_cycle()    DHW, S3, reconcile
//! ```
//!
//! Every call that mutates protocol state is awaited before the next one is
//! issued.

use alloy::primitives::{Address, U256};

use crate::claim::check_claims;
use crate::codec::Allocation;
use crate::error::HarnessError;
use crate::ledger::ActionLedger;
use crate::protocol::SpoolProtocol;
use crate::reconcile::{CycleSnapshots, ReconcileReport, reconcile};
use crate::snapshot::{BalanceSnapshot, SnapshotScope, capture};
use crate::tolerance::Tolerances;

/// The result of a reconciled cycle, with the snapshots it was checked on.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub report: ReconcileReport,
    pub before: BalanceSnapshot,
    pub after: BalanceSnapshot,
}

pub struct Scenario<P> {
    protocol: P,
    scope: SnapshotScope,
    ledger: ActionLedger,
    tolerances: Tolerances,
    before: Option<BalanceSnapshot>,
    pending: Option<BalanceSnapshot>,
}

impl<P: SpoolProtocol> Scenario<P> {
    pub fn new(protocol: P, scope: SnapshotScope, tolerances: Tolerances) -> Self {
        Self {
            protocol,
            scope,
            ledger: ActionLedger::new(),
            tolerances,
            before: None,
            pending: None,
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn ledger(&self) -> &ActionLedger {
        &self.ledger
    }

    pub fn scope(&self) -> &SnapshotScope {
        &self.scope
    }

    pub fn tolerances(&self) -> &Tolerances {
        &self.tolerances
    }

    /// Include `user`'s position in `vault` in every snapshot from now on.
    pub fn track(&mut self, user: Address, vault: Address) -> Result<(), HarnessError> {
        self.scope.vault_ref(vault)?;
        self.scope.track(user, vault);
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<BalanceSnapshot, HarnessError> {
        capture(&self.protocol, &self.scope).await
    }

    /// Capture S1. Replaces any cycle in progress.
    pub async fn begin_cycle(&mut self) -> Result<&BalanceSnapshot, HarnessError> {
        let snapshot = self.snapshot().await?;
        tracing::info!(users = self.scope.users.len(), "cycle started");
        self.pending = None;
        let snapshot: &BalanceSnapshot = self.before.insert(snapshot);
        Ok(snapshot)
    }

    /// Capture S2, after user actions and before do-hard-work.
    pub async fn mark_pending(&mut self) -> Result<&BalanceSnapshot, HarnessError> {
        if self.before.is_none() {
            return Err(no_cycle("mark_pending"));
        }
        let snapshot = self.snapshot().await?;
        let snapshot: &BalanceSnapshot = self.pending.insert(snapshot);
        Ok(snapshot)
    }

    pub async fn deposit(
        &mut self,
        user: Address,
        vault: Address,
        amount: U256,
    ) -> Result<(), HarnessError> {
        self.track(user, vault)?;
        self.protocol.deposit(user, vault, amount).await?;
        self.ledger.record_deposit(user, vault, amount);
        tracing::info!(%user, %vault, %amount, "deposit");
        Ok(())
    }

    pub async fn withdraw(
        &mut self,
        user: Address,
        vault: Address,
        shares: U256,
    ) -> Result<(), HarnessError> {
        self.track(user, vault)?;
        self.protocol.withdraw(user, vault, shares).await?;
        self.ledger.record_withdraw(user, vault, shares);
        tracing::info!(%user, %vault, %shares, "withdraw");
        Ok(())
    }

    /// Claim for `user` from `vault` and check the wallet received what the
    /// position owed. Returns the amount reported by the protocol.
    pub async fn claim(&mut self, user: Address, vault: Address) -> Result<U256, HarnessError> {
        self.track(user, vault)?;
        let before = self.snapshot().await?;
        let claimed = self.protocol.claim(user, vault).await?;
        self.ledger.record_claim(user, vault);
        let after = self.snapshot().await?;

        for (user, vault) in check_claims(&before, &after, &self.ledger, &self.tolerances)? {
            self.ledger.reset(user, vault);
        }
        tracing::info!(%user, %vault, %claimed, "claim reconciled");
        Ok(claimed)
    }

    /// Submit one allocation request per vault. Takes effect at the next
    /// do-hard-work.
    pub async fn reallocate(
        &mut self,
        requests: &[(Address, Allocation)],
    ) -> Result<Vec<U256>, HarnessError> {
        let mut ids = Vec::with_capacity(requests.len());
        for (vault, allocation) in requests {
            self.scope.vault_ref(*vault)?;
            let packed = allocation.encode()?;
            let id = self.protocol.create_allocation_request(*vault, &packed).await?;
            tracing::info!(%vault, request = %id, strategies = allocation.len(), "allocation requested");
            ids.push(id);
        }
        Ok(ids)
    }

    /// Run do-hard-work, capture S3 and reconcile it against S1 (and S2 if
    /// marked). The ledger's per-cycle amounts are cleared on success.
    pub async fn finish_cycle(&mut self) -> Result<CycleOutcome, HarnessError> {
        let Some(before) = self.before.take() else {
            return Err(no_cycle("finish_cycle"));
        };
        let pending = self.pending.take();

        self.protocol.do_hard_work().await?;
        let after = self.snapshot().await?;

        let cycle = CycleSnapshots {
            before: &before,
            pending: pending.as_ref(),
            after: &after,
        };
        let report = reconcile(&cycle, &self.ledger, &self.tolerances)?;
        self.ledger.close_cycle();

        Ok(CycleOutcome {
            report,
            before,
            after,
        })
    }

    /// Shorthand for `begin_cycle`, `finish_cycle` with no actions between.
    pub async fn idle_cycle(&mut self) -> Result<CycleOutcome, HarnessError> {
        self.begin_cycle().await?;
        self.finish_cycle().await
    }
}

fn no_cycle(call: &str) -> HarnessError {
    HarnessError::SnapshotInconsistency(format!("{call} called without begin_cycle"))
}
