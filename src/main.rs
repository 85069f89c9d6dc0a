//! x402 settlement facilitator HTTP entrypoint.
//!
//! Wires every service module together from [`x402_settle::config::Config`] and serves the HTTP
//! surface in [`x402_settle::handlers`] behind CORS, request tracing, and graceful shutdown.
//!
//! Endpoints:
//! - `GET /verify`, `POST /verify` — verify a payment without settling it.
//! - `GET /settle`, `POST /settle` — verify and settle a payment on-chain.
//! - `GET /supported`, `GET /health` — list supported `(scheme, network)` pairs.
//! - `GET /metrics` — Prometheus text exposition.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use x402_settle::balance::BalanceChecker;
use x402_settle::config::Config;
use x402_settle::fee_engine::{FeeEngine, FeeEngineConfig};
use x402_settle::gas_oracle::GasOracle;
use x402_settle::handlers::{self, AppState};
use x402_settle::network::NetworkRegistry;
use x402_settle::metrics::{CompositeMetricsSink, LoggerMetricsSink, MetricsSink, PrometheusMetricsSink};
use x402_settle::price_oracle::{PriceOracle, StaticPriceSource};
use x402_settle::provider_cache::ProviderCache;
use x402_settle::settlement::SettlementEngine;
use x402_settle::sig_down::SigDown;
use x402_settle::verifier::Verifier;

/// Static gas-price fallback used when the Gas Oracle has no live sample yet and no cached
/// value, independent of the Fee Engine's own floors.
const DEFAULT_GAS_PRICE_FALLBACK_WEI: u128 = 2_000_000_000; // 2 gwei

/// Static USD price fallbacks for testnets and as the oracle's last resort (spec §4.3; a live
/// CoinGecko-backed `PriceSource` is out of scope per SPEC_FULL.md §12).
const DEFAULT_NATIVE_PRICE_USD: f64 = 3000.0;
const DEFAULT_PAYMENT_TOKEN_PRICE_USD: f64 = 1.0;

#[cfg(feature = "telemetry")]
fn init_tracing() -> x402_settle::telemetry::Telemetry {
    x402_settle::telemetry::Telemetry::new()
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    // Held for the lifetime of `main`: dropping it early would shut down the OTEL
    // exporters while the server is still running.
    let _telemetry_guard = init_tracing();

    let config = Config::load()?;
    tracing::info!(networks = ?config.networks, environment = ?config.environment, "starting facilitator");

    let global_registry = NetworkRegistry::global();
    let network_configs = config
        .networks
        .iter()
        .map(|n| global_registry.get(*n).map(|cfg| cfg.clone()))
        .collect::<Result<Vec<_>, _>>()?;
    let registry = Arc::new(NetworkRegistry::with_configs(network_configs));

    let provider_cache = ProviderCache::from_config(&config)?;
    let signer_pools = provider_cache.signer_pools();
    let signing_providers = provider_cache.signing_providers();
    let read_only_providers = if config.gas_oracle_enabled {
        provider_cache.read_only_providers()
    } else {
        HashMap::new()
    };
    let balance_providers = provider_cache.read_only_providers();

    let balance_checker = Arc::new(BalanceChecker::new(balance_providers, config.balance_cache_ttl));

    let gas_oracle = Arc::new(GasOracle::new(
        read_only_providers,
        config.gas_cache_ttl,
        DEFAULT_GAS_PRICE_FALLBACK_WEI,
    ));

    let static_prices = Arc::new(StaticPriceSource {
        native_usd: DEFAULT_NATIVE_PRICE_USD,
        payment_token_usd: DEFAULT_PAYMENT_TOKEN_PRICE_USD,
    });
    let price_oracle = Arc::new(PriceOracle::new(
        static_prices.clone(),
        static_prices,
        config.price_cache_ttl,
    ));
    if config.price_oracle_enabled {
        let refresh_oracle = price_oracle.clone();
        let refresh_networks = config.networks.clone();
        let refresh_interval = config.price_cache_ttl;
        tokio::spawn(async move {
            refresh_oracle
                .run_background_refresh(refresh_networks, refresh_interval)
                .await;
        });
    }

    let network_min_gas_limit = registry
        .supported_networks()
        .into_iter()
        .filter_map(|network| {
            registry
                .get(network)
                .ok()
                .and_then(|cfg| cfg.min_gas_limit_override.map(|limit| (network, limit)))
        })
        .collect();

    let fee_engine = Arc::new(FeeEngine::new(FeeEngineConfig {
        min_gas_limit: config.fee_engine.min_gas_limit,
        max_gas_limit: config.fee_engine.max_gas_limit,
        safety_multiplier: config.fee_engine.safety_multiplier,
        testnet_min_fee_usd: config.fee_engine.testnet_min_fee_usd,
        mainnet_min_fee_usd: config.fee_engine.mainnet_min_fee_usd,
        affordability_margin: config.fee_engine.affordability_margin,
        network_min_gas_limit,
        hook_whitelist: config.hook_whitelist.clone(),
    }));

    let verifier = Arc::new(Verifier::new(registry.clone(), Some(balance_checker.clone())));

    let prometheus = Arc::new(PrometheusMetricsSink::new());
    let metrics: Arc<dyn MetricsSink> = Arc::new(CompositeMetricsSink::new(vec![
        Arc::new(LoggerMetricsSink),
        prometheus.clone(),
    ]));

    let settlement = Arc::new(SettlementEngine::new(
        registry.clone(),
        verifier.clone(),
        balance_checker.clone(),
        signer_pools,
        signing_providers,
        fee_engine,
        gas_oracle,
        price_oracle,
        config.environment.is_testnet(),
        config.simulate,
        config.router_whitelist.clone(),
        metrics.clone(),
    ));

    let state = Arc::new(AppState {
        registry,
        verifier,
        settlement,
        metrics,
        prometheus,
    });

    let app = handlers::routes(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let sig_down = SigDown::try_new()?;
    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            sig_down.cancellation_token().cancelled().await;
            tracing::info!("shutdown signal received, draining in-flight settlements");
        })
        .await?;

    Ok(())
}
