//! Harness configuration.
//!
//! Loaded from a TOML file, then overridden from the environment:
//!
//! ```toml
//! rpc_url = "http://localhost:8545"
//! chain_id = 31337
//! operator_key = "0xac09..."
//! deployment_path = "deployments/local.json"
//! user_keys = ["0x59c6..."]
//!
//! [tolerances]
//! deposit = 300
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::tolerance::Tolerances;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default)]
    pub operator_key: String,
    #[serde(default = "default_deployment_path")]
    pub deployment_path: PathBuf,
    #[serde(default)]
    pub user_keys: Vec<String>,
    #[serde(default)]
    pub tolerances: Tolerances,
}

fn default_rpc_url() -> String {
    "http://localhost:8545".to_string()
}

fn default_chain_id() -> u64 {
    31337
}

fn default_deployment_path() -> PathBuf {
    PathBuf::from("deployments/local.json")
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            chain_id: default_chain_id(),
            operator_key: String::new(),
            deployment_path: default_deployment_path(),
            user_keys: Vec::new(),
            tolerances: Tolerances::default(),
        }
    }
}

impl HarnessConfig {
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Io(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Read `path` if it exists, fall back to defaults otherwise, then apply
    /// the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, HarnessError> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_toml(p)?,
            Some(p) => {
                tracing::debug!(path = %p.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `RPC_URL`, `CHAIN_ID`, `OPERATOR_PRIVATE_KEY`
    /// and `DEPLOYMENT_PATH` as returned by `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), HarnessError> {
        if let Some(url) = lookup("RPC_URL") {
            self.rpc_url = url;
        }
        if let Some(id) = lookup("CHAIN_ID") {
            self.chain_id = id
                .parse()
                .map_err(|e| HarnessError::Config(format!("Invalid CHAIN_ID {id:?}: {e}")))?;
        }
        if let Some(key) = lookup("OPERATOR_PRIVATE_KEY") {
            self.operator_key = key;
        }
        if let Some(path) = lookup("DEPLOYMENT_PATH") {
            self.deployment_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn require_operator_key(&self) -> Result<&str, HarnessError> {
        if self.operator_key.is_empty() {
            return Err(HarnessError::Config(
                "operator_key is not set (OPERATOR_PRIVATE_KEY)".into(),
            ));
        }
        Ok(&self.operator_key)
    }
}
