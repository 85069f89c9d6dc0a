//! Network registry: per-chain constants for every EVM network this facilitator settles on.
//!
//! [`Network`] is the wire-level identifier (`"base-sepolia"`, `"base"`, ...). [`NetworkConfig`]
//! is the read-only record the Verifier and Settlement Engine consult for chain id, the
//! network's single supported asset, its EIP-712 domain, and per-network gas-limit overrides.
//! The registry is populated once at startup and never mutated afterward: no network is added
//! or removed at runtime, so no lock is needed to read it (spec.md §5 "Network registry:
//! immutable post-init; no locking").

use alloy::primitives::{address, Address};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// Supported EVM networks.
///
/// New networks are added here and in [`REGISTRY`]; nowhere else knows the set.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
    #[serde(rename = "base")]
    Base,
    #[serde(rename = "avalanche-fuji")]
    AvalancheFuji,
    #[serde(rename = "avalanche")]
    Avalanche,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Network::BaseSepolia => "base-sepolia",
            Network::Base => "base",
            Network::AvalancheFuji => "avalanche-fuji",
            Network::Avalanche => "avalanche",
        };
        write!(f, "{s}")
    }
}

impl Network {
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::BaseSepolia => 84532,
            Network::Base => 8453,
            Network::AvalancheFuji => 43113,
            Network::Avalanche => 43114,
        }
    }

    /// Whether this network is a testnet. Drives the testnet fee floor (§4.5) and the
    /// static-price short-circuit in the Price Oracle (§4.3).
    pub fn is_testnet(&self) -> bool {
        matches!(self, Network::BaseSepolia | Network::AvalancheFuji)
    }

    /// Whether the Filecoin (FEVM) gas-bound bypass of §4.5 applies.
    ///
    /// None of the built-in networks are Filecoin; the check is name-based (not a hardcoded
    /// enum match) because the source policy keys off "any network whose name contains
    /// `filecoin`" rather than a specific variant, and a registry built from config could add
    /// Filecoin-family networks without a code change here.
    pub fn is_fevm(&self) -> bool {
        self.to_string().contains("filecoin")
    }

    pub fn variants() -> &'static [Network] {
        &[
            Network::BaseSepolia,
            Network::Base,
            Network::AvalancheFuji,
            Network::Avalanche,
        ]
    }
}

/// EIP-712 domain fields for a token's `name`/`version`, used to reconstruct the typed-data
/// domain during signature verification.
#[derive(Debug, Clone)]
pub struct TokenEip712 {
    pub name: String,
    pub version: String,
}

/// The network's single supported settlement asset (spec.md §9 "Open question: asset
/// whitelist" — this repository restricts to one asset per network behind the
/// `multi-asset` feature flag; see [`NetworkConfig::supported_assets`]).
#[derive(Debug, Clone)]
pub struct TokenAsset {
    pub address: Address,
    pub decimals: u8,
    pub eip712: TokenEip712,
}

/// Per-hook-type router addresses this network recognizes (spec §3 `NetworkConfig.hooks`).
/// Classifying a payload's hook address against this registry picks the hook-type-specific
/// gas overhead of spec §4.5; an address matching none of these fields is `HookType::Unknown`
/// (see [`crate::fee_engine::HookType::classify`]). Kept address-only (no dependency on
/// `fee_engine`'s `HookType` enum) so the registry stays a pure leaf, per spec §9 "Cyclic
/// dependencies".
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    pub transfer: Option<Address>,
    pub split: Option<Address>,
    pub mint: Option<Address>,
    pub reward: Option<Address>,
}

/// Per-chain constants consulted by the Verifier and Settlement Engine.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network: Network,
    pub chain_id: u64,
    pub default_asset: TokenAsset,
    /// Additional assets the network config is aware of but which settlement does not
    /// currently accept (see the `multi-asset` feature flag discussed in DESIGN.md).
    pub supported_assets: Vec<TokenAsset>,
    pub native_token_symbol: &'static str,
    /// Network-specific override of the minimum transaction gas limit (§4.5). `None` means
    /// "use the global `minGasLimit`".
    pub min_gas_limit_override: Option<u64>,
    /// This network's deployed hook addresses, by hook type (spec §3).
    pub hooks: HookRegistry,
}

fn usdc_eip712() -> TokenEip712 {
    TokenEip712 {
        name: "USDC".into(),
        version: "2".into(),
    }
}

static REGISTRY: Lazy<HashMap<Network, NetworkConfig>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        Network::BaseSepolia,
        NetworkConfig {
            network: Network::BaseSepolia,
            chain_id: 84532,
            default_asset: TokenAsset {
                address: address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
                decimals: 6,
                eip712: usdc_eip712(),
            },
            supported_assets: Vec::new(),
            native_token_symbol: "ETH",
            min_gas_limit_override: None,
            hooks: HookRegistry::default(),
        },
    );
    m.insert(
        Network::Base,
        NetworkConfig {
            network: Network::Base,
            chain_id: 8453,
            default_asset: TokenAsset {
                address: address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
                decimals: 6,
                eip712: usdc_eip712(),
            },
            supported_assets: Vec::new(),
            native_token_symbol: "ETH",
            min_gas_limit_override: None,
            hooks: HookRegistry::default(),
        },
    );
    m.insert(
        Network::AvalancheFuji,
        NetworkConfig {
            network: Network::AvalancheFuji,
            chain_id: 43113,
            default_asset: TokenAsset {
                address: address!("0x5425890298aed601595a70AB815c96711a31Bc65"),
                decimals: 6,
                eip712: usdc_eip712(),
            },
            supported_assets: Vec::new(),
            native_token_symbol: "AVAX",
            min_gas_limit_override: None,
            hooks: HookRegistry::default(),
        },
    );
    m.insert(
        Network::Avalanche,
        NetworkConfig {
            network: Network::Avalanche,
            chain_id: 43114,
            default_asset: TokenAsset {
                address: address!("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
                decimals: 6,
                eip712: usdc_eip712(),
            },
            supported_assets: Vec::new(),
            native_token_symbol: "AVAX",
            min_gas_limit_override: None,
            hooks: HookRegistry::default(),
        },
    );
    m
});

#[derive(Debug, thiserror::Error)]
pub enum NetworkRegistryError {
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(Network),
}

/// Read-only lookup over [`NetworkConfig`], keyed by [`Network`].
///
/// This is the authority [`crate::verifier::Verifier`] and
/// [`crate::settlement::SettlementEngine`] consult (spec.md §4.2). There is exactly one
/// `NetworkConfig` per supported network; writes happen only at process startup via
/// [`NetworkRegistry::global`] / [`NetworkRegistry::with_configs`].
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    configs: HashMap<Network, NetworkConfig>,
}

impl NetworkRegistry {
    /// The default registry of built-in networks.
    pub fn global() -> Self {
        NetworkRegistry {
            configs: REGISTRY.clone(),
        }
    }

    /// Build a registry from an explicit set of configs, useful for tests that want to
    /// restrict the supported set or substitute fake chain ids.
    pub fn with_configs(configs: Vec<NetworkConfig>) -> Self {
        NetworkRegistry {
            configs: configs.into_iter().map(|c| (c.network, c)).collect(),
        }
    }

    pub fn get(&self, network: Network) -> Result<&NetworkConfig, NetworkRegistryError> {
        self.configs
            .get(&network)
            .ok_or(NetworkRegistryError::UnsupportedNetwork(network))
    }

    pub fn is_supported(&self, network: Network) -> bool {
        self.configs.contains_key(&network)
    }

    pub fn supported_networks(&self) -> Vec<Network> {
        self.configs.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_registry_knows_base_sepolia() {
        let registry = NetworkRegistry::global();
        let config = registry.get(Network::BaseSepolia).expect("configured");
        assert_eq!(config.chain_id, 84532);
        assert_eq!(config.default_asset.decimals, 6);
    }

    #[test]
    fn unknown_network_reported_via_with_configs() {
        let registry = NetworkRegistry::with_configs(vec![]);
        assert!(!registry.is_supported(Network::Base));
        assert!(registry.get(Network::Base).is_err());
    }

    #[test]
    fn fevm_detection_is_name_based() {
        assert!(!Network::Base.is_fevm());
    }
}
