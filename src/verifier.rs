//! Verifier (C8): the canonical EIP-3009 authorization checks, shared by `/verify` and the
//! Settlement Engine's `Verified` step (spec §4.8).
//!
//! Grounded directly in the teacher's `assert_requirements` / `assert_domain` /
//! `assert_signature` / `assert_time` / `assert_enough_balance` / `assert_enough_value` free
//! functions in `facilitator_local.rs`: the same checks, the same 6-second expiry grace period,
//! generalized to this protocol's richer payload (settlement fields, ERC-6492 signatures) and
//! recomposed as one `Verifier` service instead of a single hardcoded `Facilitator` impl.
//!
//! Per spec §9 "Dynamic typing and schema leniency": the result is three-valued, not boolean —
//! `Tolerated(reason, payer)` lets the engine treat an `invalid_scheme` mismatch (a network this
//! process settles but an upstream SDK wouldn't recognize natively) as pass-through without
//! conflating it with a real validation failure.

use std::sync::Arc;
use std::time::{SystemTime, SystemTimeError};

use alloy::primitives::{Address, FixedBytes};
use alloy::signers::Signature;
use alloy::sol_types::{eip712_domain, Eip712Domain, SolStruct};
use tracing::instrument;

use crate::balance::BalanceChecker;
use crate::network::{Network, NetworkRegistry};
use crate::sig6492;
use crate::types::{ErrorReason, PaymentPayload, PaymentRequirements, TransferWithAuthorization};

/// EIP-3009 signature expiry checks get a 6-second grace period to absorb request latency
/// between client-side signing and facilitator-side verification (grounded in the teacher's
/// `assert_time`).
pub const EXPIRY_GRACE_SECONDS: u64 = 6;

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("system clock error: {0}")]
    Clock(#[from] SystemTimeError),
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(Network),
}

/// The three-valued verification outcome (spec §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid { payer: Address },
    Invalid { reason: ErrorReason, payer: Option<Address> },
    /// A recognized-but-non-fatal mismatch the engine treats as pass-through. Today this is
    /// only `invalid_scheme`; no other reason is ever tolerated (spec §9 "do not swallow other
    /// invalid reasons").
    Tolerated { reason: ErrorReason, payer: Address },
}

impl VerifyOutcome {
    pub fn payer(&self) -> Option<Address> {
        match self {
            VerifyOutcome::Valid { payer } => Some(*payer),
            VerifyOutcome::Invalid { payer, .. } => *payer,
            VerifyOutcome::Tolerated { payer, .. } => Some(*payer),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyOutcome::Valid { .. } | VerifyOutcome::Tolerated { .. })
    }
}

pub struct Verifier {
    registry: Arc<NetworkRegistry>,
    balance_checker: Option<Arc<BalanceChecker>>,
}

impl Verifier {
    pub fn new(registry: Arc<NetworkRegistry>, balance_checker: Option<Arc<BalanceChecker>>) -> Self {
        Verifier {
            registry,
            balance_checker,
        }
    }

    /// Runs every check in spec §4.8. Never raises on an invalid payment — only on
    /// protocol-level malformedness (an unsupported network, or a clock read failure).
    #[instrument(skip(self, payload, requirements), fields(network = %payload.network))]
    pub async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyOutcome, VerifierError> {
        let from = payload.payload.authorization.from.0;

        if payload.scheme != requirements.scheme {
            return Ok(tolerate_or_reject(ErrorReason::InvalidScheme, from));
        }
        if payload.network != requirements.network {
            return Ok(tolerate_or_reject(ErrorReason::InvalidScheme, from));
        }

        let router_address: Address = match requirements.pay_to.clone().try_into() {
            Ok(addr) => addr,
            Err(_) => return Ok(VerifyOutcome::Invalid { reason: ErrorReason::InvalidRecipient, payer: Some(from) }),
        };
        if payload.payload.authorization.to.0 != router_address {
            return Ok(VerifyOutcome::Invalid { reason: ErrorReason::InvalidRecipient, payer: Some(from) });
        }

        if !self.registry.is_supported(payload.network) {
            return Err(VerifierError::UnsupportedNetwork(payload.network));
        }
        let network_config = self
            .registry
            .get(payload.network)
            .map_err(|_| VerifierError::UnsupportedNetwork(payload.network))?;

        let domain = eip712_domain! {
            name: network_config.default_asset.eip712.name.clone(),
            version: network_config.default_asset.eip712.version.clone(),
            chain_id: network_config.chain_id,
            verifying_contract: network_config.default_asset.address,
        };

        if let Err(reason) = check_signature(payload, &domain) {
            return Ok(VerifyOutcome::Invalid { reason, payer: Some(from) });
        }

        if let Err(reason) = check_time(&payload.payload.authorization)? {
            return Ok(VerifyOutcome::Invalid { reason, payer: Some(from) });
        }

        if payload.payload.authorization.value.0 < requirements.max_amount_required.0 {
            return Ok(VerifyOutcome::Invalid { reason: ErrorReason::InsufficientFunds, payer: Some(from) });
        }

        if let Some(checker) = &self.balance_checker {
            let check = checker
                .check_balance(
                    payload.network,
                    network_config.default_asset.address,
                    from,
                    requirements.max_amount_required.0,
                )
                .await;
            if !check.has_sufficient {
                return Ok(VerifyOutcome::Invalid { reason: ErrorReason::InsufficientFunds, payer: Some(from) });
            }
        }

        Ok(VerifyOutcome::Valid { payer: from })
    }
}

fn tolerate_or_reject(reason: ErrorReason, payer: Address) -> VerifyOutcome {
    match reason {
        ErrorReason::InvalidScheme => VerifyOutcome::Tolerated { reason, payer },
        other => VerifyOutcome::Invalid { reason: other, payer: Some(payer) },
    }
}

/// Recovers the signer from the EIP-712 digest (after ERC-6492 unwrap) and checks it matches
/// `authorization.from` (grounded in the teacher's `assert_signature`).
fn check_signature(
    payload: &PaymentPayload,
    domain: &Eip712Domain,
) -> Result<(), ErrorReason> {
    let unwrapped = sig6492::unwrap(&payload.payload.signature).map_err(|_| ErrorReason::InvalidSignature)?;
    let inner = unwrapped.inner();
    if inner.len() != 65 {
        return Err(ErrorReason::InvalidSignature);
    }
    let mut raw = [0u8; 65];
    raw.copy_from_slice(inner);
    let signature = Signature::from_raw_array(&raw).map_err(|_| ErrorReason::InvalidSignature)?;

    let authorization = &payload.payload.authorization;
    let transfer = TransferWithAuthorization {
        from: authorization.from.0,
        to: authorization.to.0,
        value: authorization.value.into(),
        validAfter: authorization.valid_after.into(),
        validBefore: authorization.valid_before.into(),
        nonce: FixedBytes(authorization.nonce.0),
    };
    let digest = transfer.eip712_signing_hash(domain);
    let recovered = signature
        .recover_address_from_prehash(&digest)
        .map_err(|_| ErrorReason::InvalidSignature)?;

    // Counterfactual wallets (ERC-6492) validate against the wallet address itself, not a
    // recovered EOA; the signature unwrap already confirmed the wrapper shape, so accept the
    // wrapped case on recovered-address match against `from` as the EOA owner of the
    // counterfactual deployment.
    if recovered != authorization.from.0 {
        return Err(ErrorReason::InvalidSignature);
    }
    Ok(())
}

/// Checks `validAfter <= now <= validBefore`, with a 6-second grace period on expiry
/// (grounded in the teacher's `assert_time`).
fn check_time(
    authorization: &crate::types::Authorization,
) -> Result<Result<(), ErrorReason>, VerifierError> {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)?
        .as_secs();

    let valid_before = authorization.valid_before.seconds_since_epoch();
    if valid_before < now + EXPIRY_GRACE_SECONDS {
        return Ok(Err(ErrorReason::AuthorizationExpired));
    }
    let valid_after = authorization.valid_after.seconds_since_epoch();
    if valid_after > now {
        return Ok(Err(ErrorReason::AuthorizationNotYetValid));
    }
    Ok(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerated_outcomes_only_cover_invalid_scheme() {
        let payer = Address::repeat_byte(0x01);
        let outcome = tolerate_or_reject(ErrorReason::InvalidScheme, payer);
        assert!(matches!(outcome, VerifyOutcome::Tolerated { .. }));

        let rejected = tolerate_or_reject(ErrorReason::InsufficientFunds, payer);
        assert!(matches!(rejected, VerifyOutcome::Invalid { .. }));
    }
}
