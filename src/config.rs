//! Startup configuration for the facilitator (spec.md §6 "Configuration", SPEC_FULL.md §10.3).
//!
//! Environment variables are the source of truth; a handful of top-level knobs (bind address,
//! environment) can be overridden from the CLI, following the teacher's `clap` + `env` pattern
//! in its old `Config` type. Everything is parsed once in [`Config::load`] into an immutable
//! struct passed by `Arc` to every service constructor — nothing here reads `env::var` again
//! after startup (spec.md §9 "panic vs error": a missing signer or RPC URL for a network this
//! process is asked to serve is a configuration error, so the process refuses to start rather
//! than failing individual requests later).

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use clap::Parser;
use url::Url;

use crate::network::Network;

/// CLI flags for the facilitator HTTP server. Every flag has an environment-variable fallback
/// via `clap`'s `env` feature; CLI flags only exist to override a handful of top-level knobs,
/// per SPEC_FULL.md §10.3.
#[derive(Parser, Debug)]
#[command(name = "x402-settle")]
#[command(about = "Settlement facilitator for an EIP-3009 micropayment protocol")]
struct CliArgs {
    /// Bind address host.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,
    /// Bind address port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,
    /// `testnet` or `mainnet`; drives the fee-floor policy (spec.md §4.5).
    #[arg(long, env = "ENVIRONMENT", default_value = "testnet")]
    environment: Environment,
}

/// Drives the fee-floor policy of spec.md §4.5 ($0.001 testnet vs $0.01 mainnet) and nothing
/// else — it is not used to gate which networks are reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Testnet,
    Mainnet,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "testnet" => Ok(Environment::Testnet),
            "mainnet" => Ok(Environment::Mainnet),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }
}

impl Environment {
    pub fn is_testnet(&self) -> bool {
        matches!(self, Environment::Testnet)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid ENVIRONMENT value: {0} (expected testnet or mainnet)")]
    InvalidEnvironment(String),
    #[error("no RPC_URL_* configured for any network; the facilitator has nothing to serve")]
    NoNetworksConfigured,
    #[error("network {0} has an RPC URL but no signer key (EVM_PRIVATE_KEY_{0} or EVM_PRIVATE_KEY)")]
    MissingSigner(Network),
    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, url::ParseError),
    #[error("invalid private key for network {0}: {1}")]
    InvalidPrivateKey(Network, String),
    #[error("invalid address in {0}: {1}")]
    InvalidAddress(String, String),
}

/// Per-network signer pool tuning (spec.md §4.7), shared across all networks. A future version
/// could make these per-network; nothing in spec.md asks for that yet.
#[derive(Debug, Clone, Copy)]
pub struct SignerPoolTuning {
    pub lease_timeout: Duration,
    pub quarantine_duration: Duration,
    pub quarantine_threshold: u32,
}

/// Fee & Gas-Limit Engine tuning (spec.md §4.5), shared across all networks except where a
/// per-network override (`network_min_gas_limit`) applies.
#[derive(Debug, Clone)]
pub struct FeeEngineTuning {
    pub min_gas_limit: u64,
    pub max_gas_limit: u64,
    pub safety_multiplier: f64,
    pub testnet_min_fee_usd: f64,
    pub mainnet_min_fee_usd: f64,
    pub affordability_margin: f64,
}

/// Parsed, immutable startup configuration. Constructed once via [`Config::load`] and handed
/// out as `Arc<Config>` to every service (spec.md §9 "Global mutable state": services are
/// explicit, constructed at startup, not ambient globals).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub environment: Environment,
    /// Networks this process has an RPC URL for; the set the Network Registry and providers are
    /// built from.
    pub networks: Vec<Network>,
    pub rpc_urls: HashMap<Network, Url>,
    pub signer_keys: HashMap<Network, Vec<B256>>,
    pub price_oracle_enabled: bool,
    pub price_cache_ttl: Duration,
    pub gas_oracle_enabled: bool,
    pub gas_cache_ttl: Duration,
    pub balance_cache_ttl: Duration,
    pub router_whitelist: HashMap<Network, Vec<Address>>,
    /// Absent entry means "whitelist disabled" for that network (spec.md §6).
    pub hook_whitelist: HashMap<Network, Vec<Address>>,
    pub signer_pool: SignerPoolTuning,
    pub fee_engine: FeeEngineTuning,
    /// Whether the Settlement Engine runs the advisory `eth_call` simulation step (spec.md
    /// §4.9 "Simulated").
    pub simulate: bool,
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn rpc_env_var(network: Network) -> String {
    format!("RPC_URL_{}", network.to_string().to_ascii_uppercase().replace('-', "_"))
}

fn signer_env_var(network: Network) -> String {
    format!("EVM_PRIVATE_KEY_{}", network.to_string().to_ascii_uppercase().replace('-', "_"))
}

fn router_whitelist_env_var(network: Network) -> String {
    format!("ROUTER_WHITELIST_{}", network.to_string().to_ascii_uppercase().replace('-', "_"))
}

fn hook_whitelist_env_var(network: Network) -> String {
    format!("HOOK_WHITELIST_{}", network.to_string().to_ascii_uppercase().replace('-', "_"))
}

fn parse_address_list(raw: &str, context: &str) -> Result<Vec<Address>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Address::from_str(s).map_err(|e| ConfigError::InvalidAddress(context.to_string(), e.to_string()))
        })
        .collect()
}

fn parse_private_keys(raw: &str, network: Network) -> Result<Vec<B256>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            B256::from_str(s).map_err(|e| ConfigError::InvalidPrivateKey(network, e.to_string()))
        })
        .collect()
}

impl Config {
    /// Loads configuration from CLI flags/environment. Fails fast (spec.md §9) if a network has
    /// an RPC URL but no signer key configured, or if no network is configured at all.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let mut rpc_urls = HashMap::new();
        let mut signer_keys = HashMap::new();
        let mut router_whitelist = HashMap::new();
        let mut hook_whitelist = HashMap::new();

        for network in Network::variants().iter().copied() {
            let rpc_var = rpc_env_var(network);
            let Ok(rpc_raw) = std::env::var(&rpc_var) else {
                continue;
            };
            let url = Url::parse(&rpc_raw).map_err(|e| ConfigError::InvalidUrl(rpc_var, e))?;
            rpc_urls.insert(network, url);

            let signer_var = signer_env_var(network);
            let raw_keys = std::env::var(&signer_var)
                .or_else(|_| std::env::var("EVM_PRIVATE_KEY"))
                .map_err(|_| ConfigError::MissingSigner(network))?;
            let keys = parse_private_keys(&raw_keys, network)?;
            if keys.is_empty() {
                return Err(ConfigError::MissingSigner(network));
            }
            signer_keys.insert(network, keys);

            if let Ok(raw) = std::env::var(router_whitelist_env_var(network)) {
                router_whitelist.insert(network, parse_address_list(&raw, "ROUTER_WHITELIST")?);
            }
            if let Ok(raw) = std::env::var(hook_whitelist_env_var(network)) {
                hook_whitelist.insert(network, parse_address_list(&raw, "HOOK_WHITELIST")?);
            }
        }

        if rpc_urls.is_empty() {
            return Err(ConfigError::NoNetworksConfigured);
        }
        let networks: Vec<Network> = rpc_urls.keys().copied().collect();

        Ok(Config {
            host: cli.host,
            port: cli.port,
            environment: cli.environment,
            networks,
            rpc_urls,
            signer_keys,
            price_oracle_enabled: env_bool("PRICE_ORACLE_ENABLED", true),
            price_cache_ttl: Duration::from_secs(env_u64("PRICE_CACHE_TTL_SECONDS", 30)),
            gas_oracle_enabled: env_bool("GAS_ORACLE_ENABLED", true),
            gas_cache_ttl: Duration::from_secs(env_u64("GAS_CACHE_TTL_SECONDS", 10)),
            balance_cache_ttl: Duration::from_secs(env_u64("BALANCE_CACHE_TTL_SECONDS", 5)),
            router_whitelist,
            hook_whitelist,
            signer_pool: SignerPoolTuning {
                lease_timeout: Duration::from_secs(env_u64("SIGNER_LEASE_TIMEOUT_SECONDS", 30)),
                quarantine_duration: Duration::from_secs(env_u64("SIGNER_QUARANTINE_SECONDS", 300)),
                quarantine_threshold: env_u64("SIGNER_QUARANTINE_THRESHOLD", 3) as u32,
            },
            fee_engine: FeeEngineTuning {
                min_gas_limit: env_u64("FEE_MIN_GAS_LIMIT", 100_000),
                max_gas_limit: env_u64("FEE_MAX_GAS_LIMIT", 2_000_000),
                safety_multiplier: env_f64("FEE_SAFETY_MULTIPLIER", 1.2),
                testnet_min_fee_usd: env_f64("FEE_TESTNET_MIN_USD", 0.001),
                mainnet_min_fee_usd: env_f64("FEE_MAINNET_MIN_USD", 0.01),
                affordability_margin: env_f64("FEE_AFFORDABILITY_MARGIN", 0.2),
            },
            simulate: env_bool("SETTLEMENT_SIMULATE", true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("Testnet".parse::<Environment>().unwrap(), Environment::Testnet);
        assert_eq!("MAINNET".parse::<Environment>().unwrap(), Environment::Mainnet);
        assert!("production".parse::<Environment>().is_err());
    }

    #[test]
    fn address_list_parses_and_trims() {
        let addrs = parse_address_list(
            " 0x0000000000000000000000000000000000000001 , 0x0000000000000000000000000000000000000002",
            "test",
        )
        .unwrap();
        assert_eq!(addrs.len(), 2);
    }

    #[test]
    fn empty_address_list_is_empty_not_an_error() {
        let addrs = parse_address_list("", "test").unwrap();
        assert!(addrs.is_empty());
    }
}
