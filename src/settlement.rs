//! Settlement Engine (C9): the state machine that takes a verified payment from `Received` to
//! `Done` (spec §4.9).
//!
//! The on-chain call pattern (`SolCallBuilder`, `.send()`, `.get_receipt()`, tracing spans
//! around each RPC boundary) is grounded in the teacher's `FacilitatorLocal::settle`; this
//! module generalizes it from a single `transferWithAuthorization` call to the
//! `settleAndExecute` router call this protocol's commitment/hook design requires, and makes
//! the pipeline's intermediate states first-class instead of implicit control flow.

use std::sync::Arc;
use std::time::Instant;

use alloy::primitives::{Address, Bytes, FixedBytes, U256};
use alloy::providers::{DynProvider, Provider};
use alloy::sol;
use tracing::{instrument, warn};

use crate::balance::BalanceChecker;
use crate::commitment::{self, CommitmentParams};
use crate::fee_engine::{FeeEngine, HookType};
use crate::gas_oracle::GasOracle;
use crate::metrics::{MetricsSink, TransitionEvent};
use crate::network::NetworkRegistry;
use crate::price_oracle::PriceOracle;
use crate::sig6492;
use crate::signer_pool::{LeaseOutcome, SignerPool};
use crate::types::{ErrorReason, GasMetrics, PaymentPayload, PaymentRequirements, TransactionHash};
use crate::verifier::{VerifierError, VerifyOutcome};

sol! {
    /// Fixed ABI the router is consumed through (spec §6). No Solidity source is vendored —
    /// only the interface, via `sol!`.
    #[sol(rpc)]
    interface ISettlementRouter {
        function settleAndExecute(
            address token,
            address from,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            bytes signature,
            bytes32 salt,
            address payTo,
            uint256 facilitatorFee,
            address hook,
            bytes hookData
        ) external returns (bool);

        function isSettled(bytes32 contextKey) external view returns (bool);

        function calculateContextKey(address from, address token, bytes32 nonce) external view returns (bytes32);

        function getPendingFees(address owner, address token) external view returns (uint256);

        function claimFees(address[] tokens) external;

        event Settled(bytes32 indexed contextKey, address indexed from, address indexed payTo, uint256 value);
        event HookExecuted(bytes32 indexed contextKey, address indexed hook, bool success);
    }
}

/// A named point in the pipeline (spec §4.9 diagram), surfaced in tracing/metrics so every
/// transition is independently observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementState {
    Received,
    Validated,
    Verified,
    CommitmentChecked,
    SignerLeased,
    GasPriced,
    Simulated,
    Submitted,
    Confirmed,
    Accounted,
    Done,
}

/// The outcome of one pipeline run. Per spec §4.9 "Failure semantics", the three failure kinds
/// (pre-submit, submit, post-submit revert) are distinguished purely by which of `transaction`
/// and `error_reason` are populated: pre-submit and submit failures carry no transaction hash
/// (nothing to audit on-chain); a post-submit revert always carries its hash.
pub struct SettlementOutcome {
    pub success: bool,
    pub transaction: Option<TransactionHash>,
    pub error_reason: Option<ErrorReason>,
    pub gas_metrics: Option<GasMetrics>,
    pub payer: Address,
}

pub struct SettlementEngine {
    registry: Arc<NetworkRegistry>,
    verifier: Arc<crate::verifier::Verifier>,
    balance_checker: Arc<BalanceChecker>,
    signer_pools: std::collections::HashMap<crate::network::Network, Arc<SignerPool>>,
    /// One multi-signer provider per network: the wallet behind it registers every key in
    /// that network's [`SignerPool`], so any lease's address can be passed to `.from(...)`
    /// on a call built against the same provider (spec §4.7 "Signer exclusivity").
    providers: std::collections::HashMap<crate::network::Network, DynProvider>,
    fee_engine: Arc<FeeEngine>,
    gas_oracle: Arc<GasOracle>,
    price_oracle: Arc<PriceOracle>,
    is_testnet_environment: bool,
    simulate: bool,
    router_whitelist: std::collections::HashMap<crate::network::Network, Vec<Address>>,
    metrics: Arc<dyn MetricsSink>,
}

impl SettlementEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<NetworkRegistry>,
        verifier: Arc<crate::verifier::Verifier>,
        balance_checker: Arc<BalanceChecker>,
        signer_pools: std::collections::HashMap<crate::network::Network, Arc<SignerPool>>,
        providers: std::collections::HashMap<crate::network::Network, DynProvider>,
        fee_engine: Arc<FeeEngine>,
        gas_oracle: Arc<GasOracle>,
        price_oracle: Arc<PriceOracle>,
        is_testnet_environment: bool,
        simulate: bool,
        router_whitelist: std::collections::HashMap<crate::network::Network, Vec<Address>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        SettlementEngine {
            registry,
            verifier,
            balance_checker,
            signer_pools,
            providers,
            fee_engine,
            gas_oracle,
            price_oracle,
            is_testnet_environment,
            simulate,
            router_whitelist,
            metrics,
        }
    }

    fn is_router_whitelisted(&self, network: crate::network::Network, router: Address) -> bool {
        match self.router_whitelist.get(&network) {
            Some(allowed) => allowed.iter().any(|a| *a == router),
            None => true,
        }
    }

    /// Drives one payload through the full pipeline, spec §4.9. Any failure drops out with a
    /// [`SettlementFailure`] carried inside the returned [`SettlementOutcome`] as
    /// `success=false` plus `error_reason`/`transaction` set per the failure kind.
    #[instrument(skip(self, payload, requirements), fields(network = %payload.network))]
    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> SettlementOutcome {
        let payer = payload.payload.authorization.from.0;
        let hook = requirements.extra.hook.0;
        // The nonce is globally unique per settlement attempt (it's the commitment itself), so
        // it doubles as the correlation id for every transition event this pipeline emits.
        let request_id = payload.payload.authorization.nonce.to_string();
        let mut state = SettlementState::Received;
        let mut last_transition_at = Instant::now();
        tracing::debug!(?state, %payer, "settlement pipeline started");

        macro_rules! transition {
            ($to:expr) => {{
                state = $to;
                let now = Instant::now();
                let elapsed = now.duration_since(last_transition_at);
                last_transition_at = now;
                tracing::debug!(?state, %payer, "settlement state transition");
                self.metrics.record_transition(&TransitionEvent {
                    request_id: request_id.clone(),
                    network: payload.network,
                    payer: format!("{payer:#x}"),
                    hook: format!("{hook:#x}"),
                    state: format!("{state:?}"),
                    duration: elapsed,
                });
            }};
        }

        macro_rules! fail {
            ($reason:expr) => {{
                let reason = $reason;
                tracing::warn!(?state, %payer, ?reason, "settlement failed");
                self.metrics.record_transition(&TransitionEvent {
                    request_id: request_id.clone(),
                    network: payload.network,
                    payer: format!("{payer:#x}"),
                    hook: format!("{hook:#x}"),
                    state: format!("Failed({reason:?}) after {state:?}"),
                    duration: last_transition_at.elapsed(),
                });
                return SettlementOutcome {
                    success: false,
                    transaction: None,
                    error_reason: Some(reason),
                    gas_metrics: None,
                    payer,
                };
            }};
        }

        // Validated: network supported, router whitelisted, asset is the network's default.
        transition!(SettlementState::Validated);
        let Ok(network_config) = self.registry.get(payload.network) else {
            fail!(ErrorReason::SettlementRouterNotConfigured);
        };
        let router: Address = requirements.extra.settlement_router.0;
        if !self.is_router_whitelisted(payload.network, router) {
            fail!(ErrorReason::SettlementRouterNotConfigured);
        }
        let asset: Address = match requirements.asset.clone().try_into() {
            Ok(a) => a,
            Err(_) => fail!(ErrorReason::InvalidTransactionState),
        };
        if asset != network_config.default_asset.address {
            fail!(ErrorReason::InvalidTransactionState);
        }

        // Verified: full independent re-verification (merchants may call /settle directly).
        transition!(SettlementState::Verified);
        match self.verifier.verify(payload, requirements).await {
            Ok(VerifyOutcome::Invalid { reason, .. }) => fail!(reason),
            Ok(_) => {}
            Err(VerifierError::UnsupportedNetwork(_)) => {
                fail!(ErrorReason::SettlementRouterNotConfigured)
            }
            Err(VerifierError::Clock(_)) => fail!(ErrorReason::UnexpectedSettleError),
        }

        // CommitmentChecked: the sole cryptographic barrier to parameter tampering.
        transition!(SettlementState::CommitmentChecked);
        // Bound from `requirements.extra`, the merchant-advertised copy, not `payload.payload`'s
        // payer-supplied copy: the commitment must bind what the merchant advertised, or a
        // merchant-side tamper of `extra` after the payer signed would go unchecked (spec §1,
        // §8 "merchant substitutes payTo after signing").
        let auth = &payload.payload.authorization;
        let commitment_params = CommitmentParams {
            chain_id: network_config.chain_id,
            router,
            token: asset,
            from: auth.from.0,
            value: auth.value.0,
            valid_after: auth.valid_after.seconds_since_epoch(),
            valid_before: auth.valid_before.seconds_since_epoch(),
            salt: requirements.extra.salt.into(),
            pay_to: requirements.extra.pay_to.0,
            facilitator_fee: requirements.extra.facilitator_fee.0,
            hook: requirements.extra.hook.0,
            hook_data: requirements.extra.hook_data.clone(),
        };
        if !commitment::verify_commitment(FixedBytes(auth.nonce.0), &commitment_params) {
            fail!(ErrorReason::InvalidCommitment);
        }

        // Idempotency pre-check (spec §3 "ContextKey", §8 "Idempotency"): a replay of an
        // already-settled payload is rejected here, before ever leasing a signer or spending
        // gas on a doomed transaction. The router remains the source of truth — this is a
        // read-only optimization, not a ledger the engine itself maintains.
        let context_key = commitment::compute_context_key(auth.from.0, asset, FixedBytes(auth.nonce.0));
        if let Some(provider) = self.providers.get(&payload.network) {
            let contract = ISettlementRouter::new(router, provider.clone());
            if let Ok(true) = contract.isSettled(context_key).call().await {
                fail!(ErrorReason::AlreadySettled);
            }
        }

        // Defensive balance re-check just before submission (spec §4.6).
        let balance_check = self
            .balance_checker
            .check_balance(payload.network, asset, payer, auth.value.0)
            .await;
        if !balance_check.has_sufficient {
            fail!(ErrorReason::InsufficientFunds);
        }

        // SignerLeased: pins one EVM account + RPC client for the rest of the pipeline.
        transition!(SettlementState::SignerLeased);
        let Some(pool) = self.signer_pools.get(&payload.network) else {
            fail!(ErrorReason::SettlementRouterNotConfigured);
        };
        let lease = match pool.acquire().await {
            Ok(lease) => lease,
            Err(_) => fail!(ErrorReason::UnexpectedSettleError),
        };
        let Some(provider) = self.providers.get(&payload.network).cloned() else {
            pool.release(lease, LeaseOutcome::Failure).await;
            fail!(ErrorReason::SettlementRouterNotConfigured);
        };

        // GasPriced: consult oracles, pick an effective gas limit for this hook.
        transition!(SettlementState::GasPriced);
        let gas_price = self.gas_oracle.get_gas_price(payload.network).await;
        let native_price = self.price_oracle.get_native_price_usd(payload.network).await;
        let token_price = self
            .price_oracle
            .get_payment_token_price_usd(payload.network)
            .await;

        let hook_type = HookType::classify(&network_config.hooks, requirements.extra.hook.0);
        let min_fee = match self.fee_engine.calculate_min_facilitator_fee(
            payload.network,
            requirements.extra.hook.0,
            hook_type,
            network_config.default_asset.decimals,
            gas_price,
            native_price,
            token_price,
            self.is_testnet_environment,
        ) {
            Ok(fee) => fee,
            Err(_) => {
                pool.release(lease, LeaseOutcome::Failure).await;
                fail!(ErrorReason::InvalidTransactionState);
            }
        };

        let gas_limit = self.fee_engine.calculate_effective_gas_limit(
            payload.network,
            hook_type,
            min_fee.fee_usd,
            gas_price,
            native_price,
        );

        let unwrapped_sig = match sig6492::unwrap(&payload.payload.signature) {
            Ok(sig) => sig,
            Err(_) => {
                pool.release(lease, LeaseOutcome::Failure).await;
                fail!(ErrorReason::InvalidSignature);
            }
        };

        let contract = ISettlementRouter::new(router, provider.clone());
        let call = contract.settleAndExecute(
            asset,
            auth.from.0,
            auth.value.0,
            U256::from(auth.valid_after.seconds_since_epoch()),
            U256::from(auth.valid_before.seconds_since_epoch()),
            FixedBytes(auth.nonce.0),
            Bytes::copy_from_slice(unwrapped_sig.inner()),
            FixedBytes(requirements.extra.salt.0),
            requirements.extra.pay_to.0,
            requirements.extra.facilitator_fee.0,
            requirements.extra.hook.0,
            Bytes::copy_from_slice(&requirements.extra.hook_data.0),
        );
        // `.from(...)` pins this call to the specific key this lease represents; without it
        // alloy's wallet filler would pick its first registered signer regardless of which key
        // the pool handed out, silently defeating per-key exclusivity under concurrency.
        let call = call.gas(gas_limit).from(lease.address());

        // Simulated: advisory eth_call. A revert is logged but only aborts on known-fatal,
        // deterministic errors (spec §4.9, and §9 "Open question: simulation aborts").
        if self.simulate {
            transition!(SettlementState::Simulated);
            if let Err(e) = call.call().await {
                let message = e.to_string();
                if is_known_fatal_simulation_error(&message) {
                    pool.release(lease, LeaseOutcome::Failure).await;
                    fail!(ErrorReason::InvalidTransactionState);
                }
                warn!(error = %message, "settlement simulation reverted; proceeding to submission");
            }
        }

        // Submitted.
        transition!(SettlementState::Submitted);
        let pending = match call.send().await {
            Ok(pending) => pending,
            Err(e) => {
                pool.release(lease, LeaseOutcome::Failure).await;
                tracing::warn!(?state, %payer, error = %e, "settlement submission failed");
                self.metrics.record_transition(&TransitionEvent {
                    request_id: request_id.clone(),
                    network: payload.network,
                    payer: format!("{payer:#x}"),
                    hook: format!("{hook:#x}"),
                    state: "Failed(UnexpectedSettleError) after Submitted".to_string(),
                    duration: last_transition_at.elapsed(),
                });
                return SettlementOutcome {
                    success: false,
                    transaction: None,
                    error_reason: Some(ErrorReason::UnexpectedSettleError),
                    gas_metrics: None,
                    payer,
                };
            }
        };
        let tx_hash = TransactionHash::from(*pending.tx_hash());

        // Confirmed.
        transition!(SettlementState::Confirmed);
        let receipt = match pending.get_receipt().await {
            Ok(r) => r,
            Err(_) => {
                pool.release(lease, LeaseOutcome::Failure).await;
                self.metrics.record_transition(&TransitionEvent {
                    request_id: request_id.clone(),
                    network: payload.network,
                    payer: format!("{payer:#x}"),
                    hook: format!("{hook:#x}"),
                    state: "Failed(InvalidTransactionState) after Confirmed".to_string(),
                    duration: last_transition_at.elapsed(),
                });
                return SettlementOutcome {
                    success: false,
                    transaction: Some(tx_hash),
                    error_reason: Some(ErrorReason::InvalidTransactionState),
                    gas_metrics: None,
                    payer,
                };
            }
        };

        if !receipt.status() {
            pool.release(lease, LeaseOutcome::Failure).await;
            // Disambiguate the revert: a competing settlement for the same nonce could have
            // landed between our idempotency pre-check and this transaction's inclusion. Any
            // other revert is surfaced generically — its hash is still returned so the caller
            // can audit it (spec §4.9 "Failure semantics").
            let already_settled = matches!(
                contract.isSettled(context_key).call().await,
                Ok(true)
            );
            let reason = if already_settled {
                ErrorReason::AlreadySettled
            } else {
                ErrorReason::UnexpectedSettleError
            };
            self.metrics.record_transition(&TransitionEvent {
                request_id: request_id.clone(),
                network: payload.network,
                payer: format!("{payer:#x}"),
                hook: format!("{hook:#x}"),
                state: format!("Failed({reason:?}) after Confirmed"),
                duration: last_transition_at.elapsed(),
            });
            return SettlementOutcome {
                success: false,
                transaction: Some(tx_hash),
                error_reason: Some(reason),
                gas_metrics: None,
                payer,
            };
        }

        pool.release(lease, LeaseOutcome::Success).await;

        // Accounted: build GasMetrics, warn on unprofitable settlements. Never mutates outcome.
        transition!(SettlementState::Accounted);
        let gas_used = receipt.gas_used;
        let effective_gas_price = receipt.effective_gas_price;
        let actual_cost_native = (gas_used as f64 * effective_gas_price as f64) / 1e18;
        let actual_cost_usd = actual_cost_native * native_price;
        let fee_usd = min_fee.fee_usd;
        let profit_usd = fee_usd - actual_cost_usd;
        let profit_margin_percent = if fee_usd > 0.0 { (profit_usd / fee_usd) * 100.0 } else { 0.0 };
        let profitable = profit_usd >= 0.0;

        if !profitable {
            warn!(
                network = %payload.network,
                tx = %tx_hash,
                actual_gas_cost_usd = actual_cost_usd,
                facilitator_fee_usd = fee_usd,
                "settlement was unprofitable"
            );
        }

        let gas_metrics = GasMetrics {
            gas_used,
            effective_gas_price,
            actual_gas_cost_native: actual_cost_native,
            actual_gas_cost_usd: actual_cost_usd,
            facilitator_fee: requirements.extra.facilitator_fee.0.try_into().unwrap_or(u128::MAX),
            facilitator_fee_usd: fee_usd,
            profit_usd,
            profit_margin_percent,
            profitable,
        };

        transition!(SettlementState::Done);

        SettlementOutcome {
            success: true,
            transaction: Some(tx_hash),
            error_reason: None,
            gas_metrics: Some(gas_metrics),
            payer,
        }
    }
}

/// Classifies a simulation revert message as deterministic-and-fatal (abort submission) versus
/// advisory (log and proceed). Conservative: only reverts whose decoded reason names a
/// known-permanent condition abort; everything else is treated as possibly
/// execution-height-dependent (spec §9 "Open question: simulation aborts").
fn is_known_fatal_simulation_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("alreadysettled")
        || lower.contains("unsupportedtoken")
        || lower.contains("hooknotwhitelisted")
        || lower.contains("invalidsignature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_are_classified_correctly() {
        assert!(is_known_fatal_simulation_error("execution reverted: AlreadySettled()"));
        assert!(is_known_fatal_simulation_error("execution reverted: UnsupportedToken"));
        assert!(!is_known_fatal_simulation_error("execution reverted: out of gas at height 123"));
    }
}
