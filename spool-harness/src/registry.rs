//! Deployment registry.
//!
//! The deployment scripts persist every contract address they create to a
//! JSON file. This module loads that file into typed maps so that lookups
//! such as "the Yearn strategy for USDC" either succeed or fail loudly.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::codec::Allocation;
use crate::error::HarnessError;
use crate::snapshot::{SnapshotScope, VaultRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StrategyName {
    Aave,
    Compound,
    Convex,
    Curve,
    Harvest,
    Idle,
    Morpho,
    Yearn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetSymbol {
    Dai,
    Usdc,
    Usdt,
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for AssetSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetSymbol::Dai => "DAI",
            AssetSymbol::Usdc => "USDC",
            AssetSymbol::Usdt => "USDT",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub address: Address,
    pub asset: AssetSymbol,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRegistry {
    pub controller: Address,
    pub lens: Address,
    #[serde(default)]
    pub assets: BTreeMap<AssetSymbol, Address>,
    #[serde(default)]
    pub strategies: BTreeMap<StrategyName, BTreeMap<AssetSymbol, Address>>,
    /// Strategy addresses in the controller's global index order.
    #[serde(default)]
    pub strategy_order: Vec<Address>,
    #[serde(default)]
    pub vaults: BTreeMap<String, VaultEntry>,
}

impl DeploymentRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Io(format!("Failed to read deployment file {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, HarnessError> {
        let mut registry: Self = serde_json::from_str(content)?;
        if registry.strategy_order.is_empty() {
            registry.strategy_order = registry
                .strategies
                .values()
                .flat_map(|by_asset| by_asset.values().copied())
                .collect();
        }
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<(), HarnessError> {
        for by_asset in self.strategies.values() {
            for address in by_asset.values() {
                if !self.strategy_order.contains(address) {
                    return Err(HarnessError::Registry(format!(
                        "strategy {address} has no global index"
                    )));
                }
            }
        }
        for (name, vault) in &self.vaults {
            if !self.assets.contains_key(&vault.asset) {
                return Err(HarnessError::Registry(format!(
                    "vault {name} uses unknown asset {}",
                    vault.asset
                )));
            }
        }
        Ok(())
    }

    /// Replace the index order, e.g. with the controller's live list.
    pub fn with_strategy_order(mut self, order: Vec<Address>) -> Result<Self, HarnessError> {
        self.strategy_order = order;
        self.validate()?;
        Ok(self)
    }

    pub fn asset(&self, symbol: AssetSymbol) -> Result<Address, HarnessError> {
        self.assets
            .get(&symbol)
            .copied()
            .ok_or_else(|| HarnessError::Registry(format!("asset {symbol} not deployed")))
    }

    pub fn strategy(&self, name: StrategyName, asset: AssetSymbol) -> Result<Address, HarnessError> {
        self.strategies
            .get(&name)
            .and_then(|by_asset| by_asset.get(&asset))
            .copied()
            .ok_or_else(|| HarnessError::Registry(format!("strategy {name} for {asset} not deployed")))
    }

    /// Every deployed strategy for one asset.
    pub fn strategies_for(&self, asset: AssetSymbol) -> Vec<(StrategyName, Address)> {
        self.strategies
            .iter()
            .filter_map(|(&name, by_asset)| by_asset.get(&asset).map(|&a| (name, a)))
            .collect()
    }

    pub fn vault(&self, name: &str) -> Result<&VaultEntry, HarnessError> {
        self.vaults
            .get(name)
            .ok_or_else(|| HarnessError::Registry(format!("vault {name} not deployed")))
    }

    pub fn strategy_index(&self, strategy: Address) -> Result<usize, HarnessError> {
        self.strategy_order
            .iter()
            .position(|&s| s == strategy)
            .ok_or_else(|| HarnessError::Registry(format!("strategy {strategy} has no global index")))
    }

    /// Build a validated allocation from `(strategy address, proportion)` pairs.
    pub fn allocation_for(&self, targets: &[(Address, u32)]) -> Result<Allocation, HarnessError> {
        let indices = targets
            .iter()
            .map(|&(strategy, _)| self.strategy_index(strategy))
            .collect::<Result<Vec<_>, _>>()?;
        let proportions = targets.iter().map(|&(_, p)| p).collect();
        Ok(Allocation::new(indices, proportions)?)
    }

    /// Snapshot scope over every deployed vault and strategy, with no users yet.
    pub fn scope(&self) -> Result<SnapshotScope, HarnessError> {
        let vaults = self
            .vaults
            .values()
            .map(|v| {
                Ok(VaultRef {
                    address: v.address,
                    asset: self.asset(v.asset)?,
                })
            })
            .collect::<Result<Vec<_>, HarnessError>>()?;
        Ok(SnapshotScope::new(vaults, self.strategy_order.clone()))
    }
}
