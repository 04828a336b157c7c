use alloy::primitives::{Address, U256};
use spool_harness::codec::Allocation;
use spool_harness::registry::{AssetSymbol, DeploymentRegistry, StrategyName};
use spool_harness::scenario::Scenario;
use spool_harness::tolerance::Tolerances;

use super::simulated::SimulatedSpool;

pub const ALICE: Address = Address::new([0xA1; 20]);
pub const BOB: Address = Address::new([0xB0; 20]);

/// Initial wallet balance of every funded user.
pub const FUNDING: u64 = 1_000_000;

pub const DEPLOYMENT: &str = r#"{
    "controller": "0x00000000000000000000000000000000000000c0",
    "lens": "0x00000000000000000000000000000000000000c1",
    "assets": {
        "USDC": "0x00000000000000000000000000000000000000a0"
    },
    "strategies": {
        "Aave": { "USDC": "0x0000000000000000000000000000000000000010" },
        "Compound": { "USDC": "0x0000000000000000000000000000000000000011" },
        "Yearn": { "USDC": "0x0000000000000000000000000000000000000012" }
    },
    "vaults": {
        "usdc-balanced": {
            "address": "0x00000000000000000000000000000000000000d0",
            "asset": "USDC"
        },
        "usdc-yield": {
            "address": "0x00000000000000000000000000000000000000d1",
            "asset": "USDC"
        }
    }
}"#;

pub fn registry() -> DeploymentRegistry {
    DeploymentRegistry::from_json(DEPLOYMENT).unwrap()
}

pub fn usdc(registry: &DeploymentRegistry) -> Address {
    registry.asset(AssetSymbol::Usdc).unwrap()
}

pub fn vault(registry: &DeploymentRegistry) -> Address {
    registry.vault("usdc-balanced").unwrap().address
}

pub fn second_vault(registry: &DeploymentRegistry) -> Address {
    registry.vault("usdc-yield").unwrap().address
}

pub fn strategy(registry: &DeploymentRegistry, name: StrategyName) -> Address {
    registry.strategy(name, AssetSymbol::Usdc).unwrap()
}

/// Simulated deployment of the registry: both vaults start 50/50 over Aave
/// and Compound, Alice and Bob hold [`FUNDING`] USDC each.
pub fn simulated(registry: &DeploymentRegistry) -> SimulatedSpool {
    let spool = SimulatedSpool::new();
    for &strategy in &registry.strategy_order {
        spool.add_strategy(strategy);
    }

    let allocation = registry
        .allocation_for(&[
            (strategy(registry, StrategyName::Aave), 5000),
            (strategy(registry, StrategyName::Compound), 5000),
        ])
        .unwrap();
    spool.add_vault(vault(registry), usdc(registry), &allocation);
    spool.add_vault(second_vault(registry), usdc(registry), &allocation);

    for user in [ALICE, BOB] {
        spool.fund(user, usdc(registry), U256::from(FUNDING));
    }
    spool
}

pub fn scenario() -> (DeploymentRegistry, Scenario<SimulatedSpool>) {
    let registry = registry();
    let spool = simulated(&registry);
    let scope = registry.scope().unwrap();
    let scenario = Scenario::new(spool, scope, Tolerances::default());
    (registry, scenario)
}

pub fn split(registry: &DeploymentRegistry, targets: &[(StrategyName, u32)]) -> Allocation {
    let targets: Vec<(Address, u32)> = targets
        .iter()
        .map(|&(name, p)| (strategy(registry, name), p))
        .collect();
    registry.allocation_for(&targets).unwrap()
}
