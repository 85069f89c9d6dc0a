//! HTTP surface: `/verify`, `/settle`, `/supported`, `/health`, `/metrics` (spec §6,
//! SPEC_FULL.md §11).
//!
//! Grounded in the teacher's `handlers.rs` route shape (`get_root`/`get_supported`/`post_verify`/
//! `post_settle`, `routes()` assembling an `axum::Router`), adapted to this facilitator's own
//! `Verifier`/`SettlementEngine` instead of `Facilitator`, and extended with `/health` (aliased
//! to `/supported` per SPEC_FULL.md §11) and `/metrics` (Prometheus text exposition).

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::metrics::{FailureEvent, MetricsSink};
use crate::network::NetworkRegistry;
use crate::settlement::SettlementEngine;
use crate::types::{
    ErrorResponse, EvmAddress, MixedAddress, Scheme, SettleRequest, SettleResponse, SupportedKind,
    VerifyRequest, VerifyResponse,
};
use crate::verifier::{Verifier, VerifyOutcome};

/// Shared application state handed to every route handler.
pub struct AppState {
    pub registry: Arc<NetworkRegistry>,
    pub verifier: Arc<Verifier>,
    pub settlement: Arc<SettlementEngine>,
    pub metrics: Arc<dyn MetricsSink>,
    pub prometheus: Arc<crate::metrics::PrometheusMetricsSink>,
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(get_root))
        .route("/supported", get(get_supported))
        .route("/health", get(get_supported))
        .route("/verify", get(get_verify_info).post(post_verify))
        .route("/settle", get(get_settle_info).post(post_settle))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

async fn get_root() -> &'static str {
    "x402 settlement facilitator"
}

/// `GET /supported` (and its `/health` alias): every `(scheme, network)` pair this process will
/// accept, derived from the live [`NetworkRegistry`] rather than a hardcoded list.
async fn get_supported(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let kinds: Vec<SupportedKind> = state
        .registry
        .supported_networks()
        .into_iter()
        .map(|network| SupportedKind {
            scheme: Scheme::Exact,
            network,
        })
        .collect();
    Json(kinds)
}

async fn get_verify_info() -> &'static str {
    "POST a PaymentPayload and PaymentRequirements to verify a payment without settling it"
}

async fn get_settle_info() -> &'static str {
    "POST a PaymentPayload and PaymentRequirements to verify and settle a payment on-chain"
}

async fn post_verify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyRequest>,
) -> Response {
    let started = Instant::now();
    let network = request.payment_payload.network;

    let outcome = state
        .verifier
        .verify(&request.payment_payload, &request.payment_requirements)
        .await;

    state.metrics.record_verify_duration(network, started.elapsed());

    match outcome {
        Ok(VerifyOutcome::Valid { payer }) | Ok(VerifyOutcome::Tolerated { payer, .. }) => {
            Json(VerifyResponse {
                is_valid: true,
                invalid_reason: None,
                payer: EvmAddress(payer).into(),
            })
            .into_response()
        }
        Ok(VerifyOutcome::Invalid { reason, payer }) => {
            state.metrics.record_failure(&FailureEvent { network, reason });
            Json(VerifyResponse {
                is_valid: false,
                invalid_reason: Some(reason),
                payer: payer
                    .map(|p| EvmAddress(p).into())
                    .unwrap_or_else(|| MixedAddress("unknown".to_string())),
            })
            .into_response()
        }
        Err(e) => internal_error(e.to_string()),
    }
}

async fn post_settle(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SettleRequest>,
) -> Response {
    let started = Instant::now();
    let network = request.payment_payload.network;

    let outcome = state
        .settlement
        .settle(&request.payment_payload, &request.payment_requirements)
        .await;

    state.metrics.record_settle_duration(network, started.elapsed());

    // Per-state transition events (spec §4.10) are emitted by the Settlement Engine itself as
    // the pipeline runs; this handler only records the request-level aggregates.
    if let Some(reason) = outcome.error_reason {
        state.metrics.record_failure(&FailureEvent { network, reason });
    }
    if let Some(metrics) = &outcome.gas_metrics {
        state.metrics.record_gas_used(network, metrics.gas_used);
    }

    Json(SettleResponse {
        success: outcome.success,
        error_reason: outcome.error_reason,
        payer: EvmAddress(outcome.payer).into(),
        transaction: outcome.transaction,
        network,
        gas_metrics: outcome.gas_metrics,
    })
    .into_response()
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.prometheus.render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => internal_error(e.to_string()),
    }
}

fn internal_error(message: String) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: message })).into_response()
}
