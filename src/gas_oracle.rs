//! Gas Oracle (C4): live gas-price sampling per network with caching and a sane floor.
//!
//! Same cache discipline as [`crate::price_oracle`], consulted only by the Fee & Gas-Limit
//! Engine (spec §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::providers::Provider;
use dashmap::DashMap;

use crate::network::Network;

/// Never return a gas price below this, even if an RPC momentarily reports something
/// implausibly low (spec §4.4 "clamp to a sane floor").
pub const MIN_GAS_PRICE_WEI: u128 = 1_000_000_000; // 1 gwei

#[derive(Debug, thiserror::Error)]
pub enum GasOracleError {
    #[error("no RPC provider configured for network {0}")]
    NoProvider(Network),
    #[error("RPC error fetching gas price: {0}")]
    Rpc(String),
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    price_wei: u128,
    fetched_at: Instant,
}

/// Caches live `eth_gasPrice` (or equivalent) reads per network.
pub struct GasOracle {
    providers: HashMap<Network, Arc<dyn Provider + Send + Sync>>,
    cache: DashMap<Network, CacheEntry>,
    ttl: Duration,
    static_fallback_wei: u128,
}

impl GasOracle {
    pub fn new(
        providers: HashMap<Network, Arc<dyn Provider + Send + Sync>>,
        ttl: Duration,
        static_fallback_wei: u128,
    ) -> Self {
        GasOracle {
            providers,
            cache: DashMap::new(),
            ttl,
            static_fallback_wei: static_fallback_wei.max(MIN_GAS_PRICE_WEI),
        }
    }

    /// Returns the cached or freshly sampled gas price in wei, clamped to
    /// [`MIN_GAS_PRICE_WEI`]. Never fails upward: an RPC error falls back to the last known
    /// value, then to the configured static fallback.
    pub async fn get_gas_price(&self, network: Network) -> u128 {
        if let Some(entry) = self.cache.get(&network) {
            if entry.fetched_at.elapsed() < self.ttl {
                return entry.price_wei;
            }
        }

        let sampled = match self.providers.get(&network) {
            Some(provider) => provider
                .get_gas_price()
                .await
                .map(|p| p.max(MIN_GAS_PRICE_WEI))
                .map_err(|e| GasOracleError::Rpc(e.to_string())),
            None => Err(GasOracleError::NoProvider(network)),
        };

        let price = match sampled {
            Ok(p) => p,
            Err(_) => self
                .cache
                .get(&network)
                .map(|e| e.price_wei)
                .unwrap_or(self.static_fallback_wei),
        };

        self.cache.insert(
            network,
            CacheEntry {
                price_wei: price,
                fetched_at: Instant::now(),
            },
        );
        price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_provider_falls_back_to_static_floor() {
        let oracle = GasOracle::new(HashMap::new(), Duration::from_secs(10), 2_000_000_000);
        let price = oracle.get_gas_price(Network::Base).await;
        assert_eq!(price, 2_000_000_000);
    }

    #[tokio::test]
    async fn static_fallback_is_clamped_to_the_floor() {
        let oracle = GasOracle::new(HashMap::new(), Duration::from_secs(10), 1);
        let price = oracle.get_gas_price(Network::Base).await;
        assert_eq!(price, MIN_GAS_PRICE_WEI);
    }
}
