//! Balance Checker (C6): cached ERC-20 balance queries used both pre-verify and defensively
//! pre-settle (spec §4.6).
//!
//! Short TTL, same shape as [`crate::price_oracle`] and [`crate::gas_oracle`]. Failures are
//! swallowed into "unknown" rather than propagated: a broken RPC must never block a payment
//! that would otherwise succeed (spec §4.6 "a broken oracle does not block payments").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::sol;
use dashmap::DashMap;

use crate::network::Network;

sol! {
    #[sol(rpc)]
    interface IErc20 {
        function balanceOf(address account) external view returns (uint256);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    network: Network,
    token: Address,
    payer: Address,
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    balance: U256,
    fetched_at: Instant,
}

/// Result of a balance check, mirroring spec §4.6's
/// `{hasSufficient, balance, required, cached}`.
#[derive(Debug, Clone, Copy)]
pub struct BalanceCheck {
    pub has_sufficient: bool,
    /// `None` when the RPC read failed and no cached value existed either; treated as
    /// "unknown, assume sufficient" by callers per the swallow-failure policy.
    pub balance: Option<U256>,
    pub required: U256,
    pub cached: bool,
}

pub struct BalanceChecker {
    providers: HashMap<Network, Arc<dyn Provider + Send + Sync>>,
    cache: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
}

impl BalanceChecker {
    pub fn new(providers: HashMap<Network, Arc<dyn Provider + Send + Sync>>, ttl: Duration) -> Self {
        BalanceChecker {
            providers,
            cache: DashMap::new(),
            ttl,
        }
    }

    pub async fn check_balance(
        &self,
        network: Network,
        token: Address,
        payer: Address,
        required: U256,
    ) -> BalanceCheck {
        let key = CacheKey { network, token, payer };

        if let Some(entry) = self.cache.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return BalanceCheck {
                    has_sufficient: entry.balance >= required,
                    balance: Some(entry.balance),
                    required,
                    cached: true,
                };
            }
        }

        let Some(provider) = self.providers.get(&network) else {
            return self.fallback_result(&key, required);
        };

        let contract = IErc20::new(token, provider.clone());
        match contract.balanceOf(payer).call().await {
            Ok(balance) => {
                self.cache.insert(
                    key,
                    CacheEntry {
                        balance,
                        fetched_at: Instant::now(),
                    },
                );
                BalanceCheck {
                    has_sufficient: balance >= required,
                    balance: Some(balance),
                    required,
                    cached: false,
                }
            }
            Err(_) => self.fallback_result(&key, required),
        }
    }

    fn fallback_result(&self, key: &CacheKey, required: U256) -> BalanceCheck {
        match self.cache.get(key) {
            Some(entry) => BalanceCheck {
                has_sufficient: entry.balance >= required,
                balance: Some(entry.balance),
                required,
                cached: true,
            },
            // Swallowed failure: never override a successful verify with a balance we
            // couldn't determine. Callers treat `balance: None` as "do not block".
            None => BalanceCheck {
                has_sufficient: true,
                balance: None,
                required,
                cached: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_provider_never_blocks_payment() {
        let checker = BalanceChecker::new(HashMap::new(), Duration::from_secs(5));
        let result = checker
            .check_balance(Network::Base, Address::ZERO, Address::ZERO, U256::from(1_000u64))
            .await;
        assert!(result.has_sufficient);
        assert!(result.balance.is_none());
    }
}
