//! Builds, once at startup, the per-network provider/signer wiring every service needs.
//!
//! Grounded in the teacher's `chain/evm.rs`: one [`EthereumWallet`] registering every signer key
//! configured for a network, attached to one RPC-backed provider via `ProviderBuilder`. This
//! facilitator additionally needs a *read-only* provider per network (no wallet, used by the
//! [`crate::gas_oracle::GasOracle`] and [`crate::balance::BalanceChecker`], which never sign
//! anything) and a [`crate::signer_pool::SignerPool`] per network, since lease/rotation logic has
//! moved out of the provider layer and into the pool (spec §4.7).

use std::collections::HashMap;
use std::sync::Arc;

use alloy::network::EthereumWallet;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;

use crate::config::Config;
use crate::network::Network;
use crate::signer_pool::SignerPool;

#[derive(Debug, thiserror::Error)]
pub enum ProviderCacheError {
    #[error("signer pool construction failed for {0}: {1}")]
    SignerPool(Network, crate::signer_pool::SignerPoolError),
}

/// Everything built per network at startup: a signing provider (wallet-backed, used by the
/// Settlement Engine), a read-only provider (used by oracles/balance checks), and the signer
/// pool whose leases gate which key a given settlement's transaction is sent `.from(...)`.
pub struct NetworkProviders {
    pub signing: DynProvider,
    pub read_only: DynProvider,
    pub signer_pool: Arc<SignerPool>,
}

/// Built once at startup from [`Config`]; indexed by network.
pub struct ProviderCache {
    providers: HashMap<Network, NetworkProviders>,
}

impl ProviderCache {
    pub fn from_config(config: &Config) -> Result<Self, ProviderCacheError> {
        let mut providers = HashMap::new();

        for &network in &config.networks {
            let rpc_url = config.rpc_urls[&network].clone();
            let raw_keys = &config.signer_keys[&network];

            let signers: Vec<PrivateKeySigner> = raw_keys
                .iter()
                .map(|key| PrivateKeySigner::from_bytes(key).expect("private key already validated in Config::load"))
                .collect();

            let mut wallet = EthereumWallet::from(signers[0].clone());
            for signer in &signers[1..] {
                wallet.register_signer(signer.clone());
            }

            let signing = ProviderBuilder::new()
                .wallet(wallet)
                .connect_http(rpc_url.clone());
            let signing = DynProvider::new(signing);

            let read_only = ProviderBuilder::new().connect_http(rpc_url);
            let read_only = DynProvider::new(read_only);

            let signer_pool = SignerPool::new(
                network,
                signers,
                config.signer_pool.lease_timeout,
                config.signer_pool.quarantine_duration,
                config.signer_pool.quarantine_threshold,
            )
            .map_err(|e| ProviderCacheError::SignerPool(network, e))?;

            providers.insert(
                network,
                NetworkProviders {
                    signing,
                    read_only,
                    signer_pool: Arc::new(signer_pool),
                },
            );
        }

        Ok(ProviderCache { providers })
    }

    pub fn signing_providers(&self) -> HashMap<Network, DynProvider> {
        self.providers
            .iter()
            .map(|(network, p)| (*network, p.signing.clone()))
            .collect()
    }

    /// Read-only providers, type-erased to `dyn Provider` for [`crate::gas_oracle::GasOracle`]
    /// and [`crate::balance::BalanceChecker`], which both key on that trait object rather than
    /// `DynProvider` directly.
    pub fn read_only_providers(&self) -> HashMap<Network, Arc<dyn Provider + Send + Sync>> {
        self.providers
            .iter()
            .map(|(network, p)| {
                let provider: Arc<dyn Provider + Send + Sync> = Arc::new(p.read_only.clone());
                (*network, provider)
            })
            .collect()
    }

    pub fn signer_pools(&self) -> HashMap<Network, Arc<SignerPool>> {
        self.providers
            .iter()
            .map(|(network, p)| (*network, p.signer_pool.clone()))
            .collect()
    }
}
