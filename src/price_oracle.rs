//! Price Oracle (C3): cached native-token and payment-token USD prices with TTL and background
//! refresh.
//!
//! Grounded in the teacher's cache-entry-with-TTL shape (`provider_cache.rs` caches providers
//! keyed by network behind a `DashMap`; this caches prices the same way, keyed by network and
//! kind). Pluggable behind [`PriceSource`] so tests substitute a fake and so the live CoinGecko
//! client spec.md explicitly keeps out of scope can be added later without touching callers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::network::Network;

#[derive(Debug, thiserror::Error)]
pub enum PriceOracleError {
    #[error("price source unavailable: {0}")]
    SourceUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PriceKind {
    Native,
    PaymentToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey(Network, PriceKind);

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    price_usd: f64,
    fetched_at: Instant,
}

/// A pluggable upstream for live prices. The in-tree implementation is a static table; a real
/// deployment can supply a CoinGecko-backed (or other) implementation without this module
/// changing (spec.md §1 keeps the CoinGecko client itself out of scope).
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn native_price_usd(&self, network: Network) -> Result<f64, PriceOracleError>;
    async fn payment_token_price_usd(&self, network: Network) -> Result<f64, PriceOracleError>;
}

/// A price source that always returns a fixed value, used for testnets (spec §4.3: testnets
/// other than Filecoin testnet short-circuit to static prices) and as the oracle's own
/// last-resort fallback.
pub struct StaticPriceSource {
    pub native_usd: f64,
    pub payment_token_usd: f64,
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn native_price_usd(&self, _network: Network) -> Result<f64, PriceOracleError> {
        Ok(self.native_usd)
    }

    async fn payment_token_price_usd(&self, _network: Network) -> Result<f64, PriceOracleError> {
        Ok(self.payment_token_usd)
    }
}

/// Caches [`PriceSource`] reads per `(network, kind)` with a configurable TTL. Never returns
/// zero or non-finite values: a source failure falls back to the last known good value, then to
/// `fallback`, which itself must be sane.
pub struct PriceOracle {
    source: Arc<dyn PriceSource>,
    fallback: Arc<StaticPriceSource>,
    cache: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
}

impl PriceOracle {
    pub fn new(source: Arc<dyn PriceSource>, fallback: Arc<StaticPriceSource>, ttl: Duration) -> Self {
        PriceOracle {
            source,
            fallback,
            cache: DashMap::new(),
            ttl,
        }
    }

    pub async fn get_native_price_usd(&self, network: Network) -> f64 {
        self.get_price(network, PriceKind::Native).await
    }

    pub async fn get_payment_token_price_usd(&self, network: Network) -> f64 {
        self.get_price(network, PriceKind::PaymentToken).await
    }

    async fn get_price(&self, network: Network, kind: PriceKind) -> f64 {
        let key = CacheKey(network, kind);

        if let Some(entry) = self.cache.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return entry.price_usd;
            }
        }

        // Testnets (other than Filecoin testnet) never need a live quote: demo payments
        // shouldn't require upstream availability.
        if network.is_testnet() && !network.is_fevm() {
            let price = self.fallback_price(kind).await;
            self.cache.insert(
                key,
                CacheEntry {
                    price_usd: price,
                    fetched_at: Instant::now(),
                },
            );
            return price;
        }

        let fetched = match kind {
            PriceKind::Native => self.source.native_price_usd(network).await,
            PriceKind::PaymentToken => self.source.payment_token_price_usd(network).await,
        };

        let price = match fetched {
            Ok(p) if p.is_finite() && p > 0.0 => p,
            _ => {
                if let Some(entry) = self.cache.get(&key) {
                    entry.price_usd
                } else {
                    self.fallback_price(kind).await
                }
            }
        };

        self.cache.insert(
            key,
            CacheEntry {
                price_usd: price,
                fetched_at: Instant::now(),
            },
        );
        price
    }

    async fn fallback_price(&self, kind: PriceKind) -> f64 {
        match kind {
            PriceKind::Native => self
                .fallback
                .native_price_usd(Network::Base)
                .await
                .unwrap_or(1.0),
            PriceKind::PaymentToken => self
                .fallback
                .payment_token_price_usd(Network::Base)
                .await
                .unwrap_or(1.0),
        }
    }

    /// Periodically repopulate cache entries for every configured network, so a request never
    /// pays the upstream latency on a cold cache (spec §4.3 "background refresher").
    pub async fn run_background_refresh(self: Arc<Self>, networks: Vec<Network>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for network in &networks {
                let _ = self.get_native_price_usd(*network).await;
                let _ = self.get_payment_token_price_usd(*network).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSource;

    #[async_trait]
    impl PriceSource for FailingSource {
        async fn native_price_usd(&self, _network: Network) -> Result<f64, PriceOracleError> {
            Err(PriceOracleError::SourceUnavailable("down".into()))
        }
        async fn payment_token_price_usd(&self, _network: Network) -> Result<f64, PriceOracleError> {
            Err(PriceOracleError::SourceUnavailable("down".into()))
        }
    }

    struct LiveSource {
        native: f64,
        token: f64,
    }

    #[async_trait]
    impl PriceSource for LiveSource {
        async fn native_price_usd(&self, _network: Network) -> Result<f64, PriceOracleError> {
            Ok(self.native)
        }
        async fn payment_token_price_usd(&self, _network: Network) -> Result<f64, PriceOracleError> {
            Ok(self.token)
        }
    }

    fn fallback() -> Arc<StaticPriceSource> {
        Arc::new(StaticPriceSource {
            native_usd: 3000.0,
            payment_token_usd: 1.0,
        })
    }

    #[tokio::test]
    async fn testnets_short_circuit_to_static_price() {
        let oracle = PriceOracle::new(Arc::new(FailingSource), fallback(), Duration::from_secs(30));
        let price = oracle.get_native_price_usd(Network::BaseSepolia).await;
        assert_eq!(price, 3000.0);
    }

    #[tokio::test]
    async fn mainnet_failure_falls_back_never_zero() {
        let oracle = PriceOracle::new(Arc::new(FailingSource), fallback(), Duration::from_secs(30));
        let price = oracle.get_native_price_usd(Network::Base).await;
        assert!(price.is_finite() && price > 0.0);
    }

    #[tokio::test]
    async fn live_price_is_cached_until_ttl_expires() {
        let oracle = PriceOracle::new(
            Arc::new(LiveSource { native: 2500.0, token: 1.0 }),
            fallback(),
            Duration::from_millis(20),
        );
        let first = oracle.get_native_price_usd(Network::Base).await;
        assert_eq!(first, 2500.0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = oracle.get_native_price_usd(Network::Base).await;
        assert_eq!(second, 2500.0);
    }
}
