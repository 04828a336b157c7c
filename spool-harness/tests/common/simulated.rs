//! In-memory Spool deployment.
//!
//! Actions queue until `do_hard_work`, which processes withdrawals, then
//! deposits, then any pending reallocation, for every vault. Strategies and
//! vaults mint `SHARE_MULTIPLIER` shares per unit while empty and never
//! accrue yield, so every price stays exact.

use std::collections::BTreeMap;
use std::sync::Mutex;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use spool_harness::HarnessError;
use spool_harness::codec::{Allocation, FULL_PROPORTION, PackedAllocation, encode_proportion_bitmap};
use spool_harness::protocol::{PositionReading, SpoolProtocol, VaultAllocation, VaultTotals};
use spool_harness::snapshot::{PendingActions, SHARE_MULTIPLIER, StrategyTotals, UserVaultState};

#[derive(Debug, Default, Clone, Copy)]
struct Position {
    balance: U256,
    shares: U256,
}

#[derive(Debug, Default)]
struct UserPosition {
    shares: U256,
    active_deposit: U256,
    owed: U256,
    withdrawn_deposits: U256,
    pending_deposit: U256,
    pending_withdraw_shares: U256,
}

#[derive(Debug)]
struct SimVault {
    asset: Address,
    strategies: Vec<Address>,
    proportions: Vec<u32>,
    total_shares: U256,
    positions: BTreeMap<Address, Position>,
    users: BTreeMap<Address, UserPosition>,
    pending_deposit: U256,
    pending_withdraw_shares: U256,
    requested: Option<Allocation>,
}

impl SimVault {
    fn total_underlying(&self) -> U256 {
        self.positions
            .values()
            .fold(U256::ZERO, |acc, p| acc + p.balance)
    }

    fn user_underlying(&self, shares: U256) -> U256 {
        if self.total_shares.is_zero() {
            return U256::ZERO;
        }
        shares * self.total_underlying() / self.total_shares
    }
}

#[derive(Debug, Default)]
struct State {
    strategy_order: Vec<Address>,
    strategies: BTreeMap<Address, StrategyTotals>,
    vaults: BTreeMap<Address, SimVault>,
    wallets: BTreeMap<(Address, Address), U256>,
    next_request: u64,
    deposit_fee_ppm: u64,
    hard_work_runs: u64,
}

#[derive(Debug, Default)]
pub struct SimulatedSpool {
    state: Mutex<State>,
}

fn unknown(what: &str, address: Address) -> HarnessError {
    HarnessError::Chain(format!("execution reverted: unknown {what} {address}"))
}

/// Split `amount` by basis-point proportions; the last entry takes the remainder.
fn split(amount: U256, proportions: &[u32]) -> Vec<U256> {
    let mut parts: Vec<U256> = proportions
        .iter()
        .map(|&p| amount * U256::from(p) / U256::from(FULL_PROPORTION))
        .collect();
    let assigned = parts.iter().fold(U256::ZERO, |acc, p| acc + *p);
    if let Some(last) = parts.last_mut() {
        *last += amount - assigned;
    }
    parts
}

fn invest(totals: &mut StrategyTotals, position: &mut Position, amount: U256) {
    if amount.is_zero() {
        return;
    }
    let minted = if totals.total_shares.is_zero() || totals.total_underlying.is_zero() {
        amount * U256::from(SHARE_MULTIPLIER)
    } else {
        amount * totals.total_shares / totals.total_underlying
    };
    totals.total_shares += minted;
    totals.total_underlying += amount;
    position.balance += amount;
    position.shares += minted;
}

fn divest(totals: &mut StrategyTotals, position: &mut Position, amount: U256) {
    if amount.is_zero() {
        return;
    }
    let burned = if amount >= position.balance {
        position.shares
    } else {
        amount * position.shares / position.balance
    };
    let amount = amount.min(position.balance);
    totals.total_shares -= burned;
    totals.total_underlying -= amount;
    position.balance -= amount;
    position.shares -= burned;
}

impl SimulatedSpool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy at the next global index.
    pub fn add_strategy(&self, strategy: Address) {
        let mut state = self.state.lock().unwrap();
        state.strategy_order.push(strategy);
        state.strategies.insert(strategy, StrategyTotals::default());
    }

    pub fn add_vault(&self, vault: Address, asset: Address, allocation: &Allocation) {
        let mut state = self.state.lock().unwrap();
        let strategies = allocation
            .indices()
            .iter()
            .map(|&i| state.strategy_order[i])
            .collect();
        state.vaults.insert(
            vault,
            SimVault {
                asset,
                strategies,
                proportions: allocation.proportions().to_vec(),
                total_shares: U256::ZERO,
                positions: BTreeMap::new(),
                users: BTreeMap::new(),
                pending_deposit: U256::ZERO,
                pending_withdraw_shares: U256::ZERO,
                requested: None,
            },
        );
    }

    pub fn fund(&self, user: Address, asset: Address, amount: U256) {
        let mut state = self.state.lock().unwrap();
        *state.wallets.entry((user, asset)).or_default() += amount;
    }

    /// Keep a cut of every deposit at the next do-hard-work.
    pub fn set_deposit_fee_ppm(&self, ppm: u64) {
        self.state.lock().unwrap().deposit_fee_ppm = ppm;
    }

    /// Drain underlying from a strategy's totals without touching any vault position.
    pub fn skim_strategy(&self, strategy: Address, amount: U256) {
        let mut state = self.state.lock().unwrap();
        let totals = state.strategies.get_mut(&strategy).unwrap();
        totals.total_underlying -= amount;
    }

    pub fn hard_work_runs(&self) -> u64 {
        self.state.lock().unwrap().hard_work_runs
    }
}

fn process_vault(
    vault: &mut SimVault,
    strategies: &mut BTreeMap<Address, StrategyTotals>,
    strategy_order: &[Address],
    deposit_fee_ppm: u64,
) {
    // Withdrawals at the current price.
    let underlying = vault.total_underlying();
    let total_shares = vault.total_shares;
    let mut withdrawn = U256::ZERO;
    for user in vault.users.values_mut() {
        let shares = std::mem::take(&mut user.pending_withdraw_shares);
        if shares.is_zero() {
            continue;
        }
        let amount = shares * underlying / total_shares;
        let released = user.active_deposit * shares / user.shares;
        user.active_deposit -= released;
        user.withdrawn_deposits += released;
        user.shares -= shares;
        user.owed += amount;
        withdrawn += amount;
        vault.total_shares -= shares;
    }
    vault.pending_withdraw_shares = U256::ZERO;

    if !withdrawn.is_zero() {
        let held: Vec<(Address, U256)> = vault
            .positions
            .iter()
            .filter(|(_, p)| !p.balance.is_zero())
            .map(|(&s, p)| (s, p.balance))
            .collect();
        let mut left = withdrawn;
        for (i, &(strategy, balance)) in held.iter().enumerate() {
            let amount = if i + 1 == held.len() {
                left
            } else {
                withdrawn * balance / underlying
            };
            left -= amount;
            let position = vault.positions.entry(strategy).or_default();
            divest(strategies.get_mut(&strategy).unwrap(), position, amount);
        }
    }

    // Deposits, all priced before any of them is minted.
    let underlying = vault.total_underlying();
    let total_shares = vault.total_shares;
    let mut invested = U256::ZERO;
    for user in vault.users.values_mut() {
        let deposit = std::mem::take(&mut user.pending_deposit);
        if deposit.is_zero() {
            continue;
        }
        let net = deposit - deposit * U256::from(deposit_fee_ppm) / U256::from(1_000_000u64);
        let minted = if total_shares.is_zero() || underlying.is_zero() {
            net * U256::from(SHARE_MULTIPLIER)
        } else {
            net * total_shares / underlying
        };
        user.shares += minted;
        user.active_deposit += net;
        vault.total_shares += minted;
        invested += net;
    }
    vault.pending_deposit = U256::ZERO;

    for (&strategy, amount) in vault
        .strategies
        .iter()
        .zip(split(invested, &vault.proportions))
    {
        let position = vault.positions.entry(strategy).or_default();
        invest(strategies.get_mut(&strategy).unwrap(), position, amount);
    }

    if let Some(allocation) = vault.requested.take() {
        let mut total = U256::ZERO;
        for (strategy, position) in vault.positions.iter_mut() {
            let balance = position.balance;
            divest(strategies.get_mut(strategy).unwrap(), position, balance);
            total += balance;
        }
        vault.positions.clear();

        vault.strategies = allocation
            .indices()
            .iter()
            .map(|&i| strategy_order[i])
            .collect();
        vault.proportions = allocation.proportions().to_vec();
        for (&strategy, amount) in vault
            .strategies
            .iter()
            .zip(split(total, &vault.proportions))
        {
            let position = vault.positions.entry(strategy).or_default();
            invest(strategies.get_mut(&strategy).unwrap(), position, amount);
        }
    }
}

#[async_trait]
impl SpoolProtocol for SimulatedSpool {
    async fn create_allocation_request(
        &self,
        vault: Address,
        allocation: &PackedAllocation,
    ) -> Result<U256, HarnessError> {
        let allocation = Allocation::decode(allocation)?;
        let mut state = self.state.lock().unwrap();
        if let Some(&index) = allocation
            .indices()
            .iter()
            .find(|&&i| i >= state.strategy_order.len())
        {
            return Err(HarnessError::Chain(format!(
                "execution reverted: strategy index {index} out of range"
            )));
        }
        state
            .vaults
            .get_mut(&vault)
            .ok_or_else(|| unknown("vault", vault))?
            .requested = Some(allocation);
        state.next_request += 1;
        Ok(U256::from(state.next_request))
    }

    async fn settle_vault(&self, vault: Address) -> Result<VaultTotals, HarnessError> {
        let state = self.state.lock().unwrap();
        let v = state.vaults.get(&vault).ok_or_else(|| unknown("vault", vault))?;
        Ok(VaultTotals {
            total_underlying: v.total_underlying(),
            total_shares: v.total_shares,
            pending: PendingActions {
                deposit: v.pending_deposit,
                withdraw_shares: v.pending_withdraw_shares,
                ..Default::default()
            },
        })
    }

    async fn vault_allocation(&self, vault: Address) -> Result<VaultAllocation, HarnessError> {
        let state = self.state.lock().unwrap();
        let v = state.vaults.get(&vault).ok_or_else(|| unknown("vault", vault))?;
        Ok(VaultAllocation {
            strategies: v.strategies.clone(),
            proportions: encode_proportion_bitmap(&v.proportions)?,
        })
    }

    async fn vault_strategy_position(
        &self,
        vault: Address,
        strategy: Address,
    ) -> Result<PositionReading, HarnessError> {
        let state = self.state.lock().unwrap();
        let v = state.vaults.get(&vault).ok_or_else(|| unknown("vault", vault))?;
        let position = v.positions.get(&strategy).copied().unwrap_or_default();
        Ok(PositionReading {
            balance: position.balance,
            shares: position.shares,
        })
    }

    async fn strategy_totals(&self, strategy: Address) -> Result<StrategyTotals, HarnessError> {
        let state = self.state.lock().unwrap();
        state
            .strategies
            .get(&strategy)
            .copied()
            .ok_or_else(|| unknown("strategy", strategy))
    }

    async fn user_vault_state(
        &self,
        user: Address,
        vault: Address,
    ) -> Result<UserVaultState, HarnessError> {
        let state = self.state.lock().unwrap();
        let v = state.vaults.get(&vault).ok_or_else(|| unknown("vault", vault))?;
        let Some(position) = v.users.get(&user) else {
            return Ok(UserVaultState::default());
        };
        Ok(UserVaultState {
            shares: position.shares,
            active_deposit: position.active_deposit,
            owed: position.owed,
            withdrawn_deposits: position.withdrawn_deposits,
            total_underlying: v.user_underlying(position.shares),
            pending: PendingActions {
                deposit: position.pending_deposit,
                withdraw_shares: position.pending_withdraw_shares,
                ..Default::default()
            },
        })
    }

    async fn wallet_balance(&self, user: Address, asset: Address) -> Result<U256, HarnessError> {
        let state = self.state.lock().unwrap();
        Ok(state.wallets.get(&(user, asset)).copied().unwrap_or_default())
    }

    async fn deposit(&self, user: Address, vault: Address, amount: U256) -> Result<(), HarnessError> {
        let mut state = self.state.lock().unwrap();
        let asset = state.vaults.get(&vault).ok_or_else(|| unknown("vault", vault))?.asset;
        let wallet = state.wallets.entry((user, asset)).or_default();
        if *wallet < amount {
            return Err(HarnessError::Chain(
                "execution reverted: ERC20: transfer amount exceeds balance".into(),
            ));
        }
        *wallet -= amount;

        let v = state.vaults.get_mut(&vault).ok_or_else(|| unknown("vault", vault))?;
        v.users.entry(user).or_default().pending_deposit += amount;
        v.pending_deposit += amount;
        Ok(())
    }

    async fn withdraw(&self, user: Address, vault: Address, shares: U256) -> Result<(), HarnessError> {
        let mut state = self.state.lock().unwrap();
        let v = state.vaults.get_mut(&vault).ok_or_else(|| unknown("vault", vault))?;
        let position = v.users.entry(user).or_default();
        if position.shares < position.pending_withdraw_shares + shares {
            return Err(HarnessError::Chain(
                "execution reverted: withdrawing more shares than owned".into(),
            ));
        }
        position.pending_withdraw_shares += shares;
        v.pending_withdraw_shares += shares;
        Ok(())
    }

    async fn claim(&self, user: Address, vault: Address) -> Result<U256, HarnessError> {
        let mut state = self.state.lock().unwrap();
        let v = state.vaults.get_mut(&vault).ok_or_else(|| unknown("vault", vault))?;
        let asset = v.asset;
        let owed = v
            .users
            .get_mut(&user)
            .map(|p| std::mem::take(&mut p.owed))
            .unwrap_or_default();
        *state.wallets.entry((user, asset)).or_default() += owed;
        Ok(owed)
    }

    async fn do_hard_work(&self) -> Result<(), HarnessError> {
        let mut state = self.state.lock().unwrap();
        let State {
            strategy_order,
            strategies,
            vaults,
            deposit_fee_ppm,
            hard_work_runs,
            ..
        } = &mut *state;
        for vault in vaults.values_mut() {
            process_vault(vault, strategies, strategy_order, *deposit_fee_ppm);
        }
        *hard_work_runs += 1;
        Ok(())
    }
}
