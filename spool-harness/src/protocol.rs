//! The call surface of the external Spool deployment.
//!
//! The harness never owns protocol state. Everything it knows comes through
//! [`SpoolProtocol`], which is implemented over RPC by [`ChainProtocol`] and
//! by in-memory simulations in tests.

use std::collections::HashMap;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;

use crate::chain::ChainClient;
use crate::codec::PackedAllocation;
use crate::contracts::{IERC20, ISpoolController, ISpoolLens, ISpoolVault};
use crate::error::HarnessError;
use crate::snapshot::{PendingActions, StrategyTotals, UserVaultState};

/// Vault aggregates returned by the settlement call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VaultTotals {
    pub total_underlying: U256,
    pub total_shares: U256,
    pub pending: PendingActions,
}

/// Strategies a vault is allocated to, with the packed proportion word.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultAllocation {
    pub strategies: Vec<Address>,
    pub proportions: U256,
}

/// A vault's holding in one strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionReading {
    pub balance: U256,
    pub shares: U256,
}

#[async_trait]
pub trait SpoolProtocol: Send + Sync {
    /// Submit a reallocation request for one vault; returns the request id.
    async fn create_allocation_request(
        &self,
        vault: Address,
        allocation: &PackedAllocation,
    ) -> Result<U256, HarnessError>;

    /// Redeem anything a finished DHW cycle left for the vault, then report
    /// its totals. Mutates external state.
    async fn settle_vault(&self, vault: Address) -> Result<VaultTotals, HarnessError>;

    async fn vault_allocation(&self, vault: Address) -> Result<VaultAllocation, HarnessError>;

    async fn vault_strategy_position(
        &self,
        vault: Address,
        strategy: Address,
    ) -> Result<PositionReading, HarnessError>;

    async fn strategy_totals(&self, strategy: Address) -> Result<StrategyTotals, HarnessError>;

    async fn user_vault_state(
        &self,
        user: Address,
        vault: Address,
    ) -> Result<UserVaultState, HarnessError>;

    async fn wallet_balance(&self, user: Address, asset: Address) -> Result<U256, HarnessError>;

    async fn deposit(&self, user: Address, vault: Address, amount: U256) -> Result<(), HarnessError>;

    async fn withdraw(&self, user: Address, vault: Address, shares: U256) -> Result<(), HarnessError>;

    /// Pay out everything owed to `user` by `vault`; returns the claimed amount.
    async fn claim(&self, user: Address, vault: Address) -> Result<U256, HarnessError>;

    /// Run one batch-processing cycle over every pending action.
    async fn do_hard_work(&self) -> Result<(), HarnessError>;
}

/// [`SpoolProtocol`] over JSON-RPC.
///
/// Operator calls (settlement, DHW, reallocation) are signed by `operator`;
/// user actions need a client registered through [`ChainProtocol::with_user`].
pub struct ChainProtocol {
    operator: ChainClient,
    controller: Address,
    lens: Address,
    users: HashMap<Address, ChainClient>,
}

impl ChainProtocol {
    pub fn new(operator: ChainClient, controller: Address, lens: Address) -> Self {
        Self {
            operator,
            controller,
            lens,
            users: HashMap::new(),
        }
    }

    /// Register a signing key for a user account.
    pub fn with_user(mut self, private_key: &str) -> Result<Self, HarnessError> {
        let client = self.operator.with_key(private_key)?;
        self.users.insert(client.address, client);
        Ok(self)
    }

    /// Accounts with a registered signing key.
    pub fn users(&self) -> impl Iterator<Item = Address> + '_ {
        self.users.keys().copied()
    }

    fn user_client(&self, user: Address) -> Result<&ChainClient, HarnessError> {
        self.users
            .get(&user)
            .ok_or_else(|| HarnessError::Config(format!("No signing key registered for user {user}")))
    }

    /// Strategy addresses in global index order.
    pub async fn all_strategies(&self) -> Result<Vec<Address>, HarnessError> {
        let controller = ISpoolController::new(self.controller, self.operator.provider());
        Ok(controller.getAllStrategies().call().await?)
    }
}

fn pending_tx_error(what: &str, e: impl std::fmt::Display) -> HarnessError {
    HarnessError::Chain(format!("{what} receipt failed: {e}"))
}

#[async_trait]
impl SpoolProtocol for ChainProtocol {
    async fn create_allocation_request(
        &self,
        vault: Address,
        allocation: &PackedAllocation,
    ) -> Result<U256, HarnessError> {
        let controller = ISpoolController::new(self.controller, self.operator.provider());
        let call = controller.createAllocationRequest(
            vault,
            allocation.strategies,
            allocation.proportions,
        );

        // The id is only observable through a static call made before the send.
        let request_id = call.call().await?;
        let receipt = call
            .send()
            .await?
            .get_receipt()
            .await
            .map_err(|e| pending_tx_error("createAllocationRequest", e))?;

        tracing::info!(
            %vault,
            %request_id,
            tx = %receipt.transaction_hash,
            "allocation request submitted"
        );
        Ok(request_id)
    }

    async fn settle_vault(&self, vault: Address) -> Result<VaultTotals, HarnessError> {
        let lens = ISpoolLens::new(self.lens, self.operator.provider());

        lens.settleVault(vault)
            .send()
            .await?
            .get_receipt()
            .await
            .map_err(|e| pending_tx_error("settleVault", e))?;

        // Settled state is stable, so a static call reads the same totals back.
        let settled = lens.settleVault(vault).call().await?;
        Ok(VaultTotals {
            total_underlying: settled.totalUnderlying,
            total_shares: settled.totalShares,
            pending: PendingActions {
                deposit: settled.pendingDeposit,
                withdraw_shares: settled.pendingWithdrawShares,
                deposit_next: settled.pendingDepositNext,
                withdraw_shares_next: settled.pendingWithdrawSharesNext,
            },
        })
    }

    async fn vault_allocation(&self, vault: Address) -> Result<VaultAllocation, HarnessError> {
        let contract = ISpoolVault::new(vault, self.operator.provider());
        let strategies = contract.getStrategies().call().await?;
        let proportions = contract.proportions().call().await?;
        Ok(VaultAllocation {
            strategies,
            proportions,
        })
    }

    async fn vault_strategy_position(
        &self,
        vault: Address,
        strategy: Address,
    ) -> Result<PositionReading, HarnessError> {
        let lens = ISpoolLens::new(self.lens, self.operator.provider());
        let position = lens.getVaultStrategyPosition(vault, strategy).call().await?;
        Ok(PositionReading {
            balance: position.balance,
            shares: position.shares,
        })
    }

    async fn strategy_totals(&self, strategy: Address) -> Result<StrategyTotals, HarnessError> {
        let lens = ISpoolLens::new(self.lens, self.operator.provider());
        let totals = lens.getStrategyTotals(strategy).call().await?;
        Ok(StrategyTotals {
            total_underlying: totals.totalUnderlying,
            total_shares: totals.totalShares,
        })
    }

    async fn user_vault_state(
        &self,
        user: Address,
        vault: Address,
    ) -> Result<UserVaultState, HarnessError> {
        let lens = ISpoolLens::new(self.lens, self.operator.provider());
        let state = lens.getUserVaultState(user, vault).call().await?;
        Ok(UserVaultState {
            shares: state.shares,
            active_deposit: state.activeDeposit,
            owed: state.owed,
            withdrawn_deposits: state.withdrawnDeposits,
            total_underlying: state.totalUnderlying,
            pending: PendingActions {
                deposit: state.pendingDeposit,
                withdraw_shares: state.pendingWithdrawShares,
                deposit_next: state.pendingDepositNext,
                withdraw_shares_next: state.pendingWithdrawSharesNext,
            },
        })
    }

    async fn wallet_balance(&self, user: Address, asset: Address) -> Result<U256, HarnessError> {
        let token = IERC20::new(asset, self.operator.provider());
        Ok(token.balanceOf(user).call().await?)
    }

    async fn deposit(&self, user: Address, vault: Address, amount: U256) -> Result<(), HarnessError> {
        let client = self.user_client(user)?;
        let contract = ISpoolVault::new(vault, client.provider());
        let asset = contract.underlying().call().await?;

        IERC20::new(asset, client.provider())
            .approve(vault, amount)
            .send()
            .await?
            .get_receipt()
            .await
            .map_err(|e| pending_tx_error("approve", e))?;

        contract
            .deposit(amount)
            .send()
            .await?
            .get_receipt()
            .await
            .map_err(|e| pending_tx_error("deposit", e))?;

        tracing::debug!(%user, %vault, %amount, "deposit submitted");
        Ok(())
    }

    async fn withdraw(&self, user: Address, vault: Address, shares: U256) -> Result<(), HarnessError> {
        let client = self.user_client(user)?;
        ISpoolVault::new(vault, client.provider())
            .withdraw(shares)
            .send()
            .await?
            .get_receipt()
            .await
            .map_err(|e| pending_tx_error("withdraw", e))?;

        tracing::debug!(%user, %vault, %shares, "withdraw submitted");
        Ok(())
    }

    async fn claim(&self, user: Address, vault: Address) -> Result<U256, HarnessError> {
        let client = self.user_client(user)?;
        let contract = ISpoolVault::new(vault, client.provider());
        let amount = contract.claim().call().await?;
        contract
            .claim()
            .send()
            .await?
            .get_receipt()
            .await
            .map_err(|e| pending_tx_error("claim", e))?;

        tracing::debug!(%user, %vault, %amount, "claim submitted");
        Ok(amount)
    }

    async fn do_hard_work(&self) -> Result<(), HarnessError> {
        let controller = ISpoolController::new(self.controller, self.operator.provider());
        let receipt = controller
            .doHardWork()
            .send()
            .await?
            .get_receipt()
            .await
            .map_err(|e| pending_tx_error("doHardWork", e))?;

        tracing::info!(
            tx = %receipt.transaction_hash,
            gas_used = receipt.gas_used,
            "do-hard-work cycle complete"
        );
        Ok(())
    }
}
