pub mod error;
pub mod codec;
pub mod tolerance;
pub mod snapshot;
pub mod ledger;
pub mod reconcile;
pub mod claim;
pub mod protocol;
pub mod contracts;
pub mod chain;
pub mod registry;
pub mod config;
pub mod scenario;

pub use error::{EncodingError, EntityKey, HarnessError, Violation};
pub use codec::{Allocation, PackedAllocation};
pub use config::HarnessConfig;
pub use protocol::{ChainProtocol, SpoolProtocol};
pub use registry::{AssetSymbol, DeploymentRegistry, StrategyName};
pub use scenario::{CycleOutcome, Scenario};
pub use snapshot::{BalanceSnapshot, SnapshotScope};
pub use tolerance::{Tolerance, Tolerances};
