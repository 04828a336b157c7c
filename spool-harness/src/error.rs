use std::fmt;

use alloy::primitives::{Address, U256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Invariant violated: {0}")]
    InvariantViolation(Box<Violation>),

    #[error("Snapshot inconsistency: {0}")]
    SnapshotInconsistency(String),

    #[error("Registry lookup failed: {0}")]
    Registry(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Input to the allocation codec that cannot be packed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Too many strategies: {count} (max {max})")]
    TooManyStrategies { count: usize, max: usize },

    #[error("Strategy index {index} at position {position} does not fit in 8 bits")]
    InvalidIndex { position: usize, index: usize },

    #[error("Strategy index {index} appears more than once")]
    DuplicateIndex { index: usize },

    #[error("Proportion {value} at position {position} does not fit in 14 bits")]
    ProportionOutOfRange { position: usize, value: u32 },

    #[error("Strategy count {strategies} does not match proportion count {proportions}")]
    LengthMismatch { strategies: usize, proportions: usize },

    #[error("Proportions sum to {sum}, expected {expected}")]
    ProportionSum { sum: u64, expected: u32 },

    #[error("Cannot decode {length} fields of {bits} bits from a 256-bit word")]
    WidthExceeded { length: usize, bits: usize },
}

/// The entity a failed assertion is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKey {
    UserVault { user: Address, vault: Address },
    Vault(Address),
    VaultStrategy { vault: Address, strategy: Address },
    Strategy(Address),
    /// Every strategy in the snapshot, taken together.
    AllStrategies,
    Wallet { user: Address, asset: Address },
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::UserVault { user, vault } => write!(f, "user {user} in vault {vault}"),
            EntityKey::Vault(vault) => write!(f, "vault {vault}"),
            EntityKey::VaultStrategy { vault, strategy } => {
                write!(f, "vault {vault} in strategy {strategy}")
            }
            EntityKey::Strategy(strategy) => write!(f, "strategy {strategy}"),
            EntityKey::AllStrategies => write!(f, "all strategies"),
            EntityKey::Wallet { user, asset } => write!(f, "wallet of {user} for asset {asset}"),
        }
    }
}

/// A reconciliation assertion that did not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub entity: EntityKey,
    pub quantity: &'static str,
    pub expected: U256,
    pub actual: U256,
    /// Human-readable bound that was applied, e.g. "0.03%" or "exact".
    pub tolerance: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {}: expected {}, got {} (tolerance {})",
            self.quantity, self.entity, self.expected, self.actual, self.tolerance
        )
    }
}

impl From<Violation> for HarnessError {
    fn from(v: Violation) -> Self {
        HarnessError::InvariantViolation(Box::new(v))
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(e: serde_json::Error) -> Self {
        HarnessError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for HarnessError {
    fn from(e: toml::de::Error) -> Self {
        HarnessError::Config(e.to_string())
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(e: std::io::Error) -> Self {
        HarnessError::Io(e.to_string())
    }
}

impl From<alloy::contract::Error> for HarnessError {
    fn from(e: alloy::contract::Error) -> Self {
        HarnessError::Chain(e.to_string())
    }
}
