//! Signing accounts for the node that hosts the Spool deployment.
//!
//! The harness holds one [`ChainClient`] for the operator, which settles
//! vaults, runs do-hard-work and files allocation requests, plus one per
//! test user whose deposits, withdrawals and claims it drives.

use alloy::network::{Ethereum, EthereumWallet};
use alloy::primitives::Address;
use alloy::providers::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy::providers::{Identity, ProviderBuilder, RootProvider};
use alloy::signers::local::PrivateKeySigner;

use crate::error::HarnessError;

/// Provider with the recommended fillers and a local wallet, over HTTP.
pub type HttpProvider = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider<Ethereum>,
    Ethereum,
>;

/// One account on the node. Every transaction sent through `provider` is
/// signed by `address`.
pub struct ChainClient {
    pub provider: HttpProvider,
    pub address: Address,
    pub rpc_url: String,
    pub chain_id: u64,
}

impl ChainClient {
    /// Connect `private_key`'s account to the node at `rpc_url`. The key
    /// and URL are checked here; the node is not contacted until the first
    /// call.
    pub fn new(rpc_url: &str, private_key: &str, chain_id: u64) -> Result<Self, HarnessError> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| HarnessError::Config(format!("signing key is not a valid secp256k1 key: {e}")))?;
        let address = signer.address();

        let url: url::Url = rpc_url
            .parse()
            .map_err(|e| HarnessError::Config(format!("rpc url {rpc_url:?} does not parse: {e}")))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url);

        Ok(Self {
            provider,
            address,
            rpc_url: rpc_url.to_string(),
            chain_id,
        })
    }

    /// Another account on the same node and chain.
    pub fn with_key(&self, private_key: &str) -> Result<Self, HarnessError> {
        Self::new(&self.rpc_url, private_key, self.chain_id)
    }

    pub fn provider(&self) -> &HttpProvider {
        &self.provider
    }
}
