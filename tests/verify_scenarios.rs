//! Scenario-level tests for the Verifier (spec.md §8 scenarios 1, 2, 4, 5), signing a real
//! EIP-712 `transferWithAuthorization` digest with an in-memory `PrivateKeySigner` rather than
//! talking to a chain. No live network access.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, FixedBytes, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol_types::{eip712_domain, SolStruct};

use x402_settle::commitment::{compute_commitment, generate_salt, verify_commitment, CommitmentParams};
use x402_settle::network::{HookRegistry, Network, NetworkConfig, NetworkRegistry, TokenAsset, TokenEip712};
use x402_settle::types::{
    AtomicAmount, Authorization, ErrorReason, EvmAddress, EvmSignature, ExactEvmPayload,
    HookData, Hex32, MaxAmountRequired, MixedAddress, PaymentPayload, PaymentRequirements,
    Scheme, SettlementExtra, SettlementMode, TransferWithAuthorization, X402Version,
};
use x402_settle::verifier::{Verifier, VerifyOutcome};

const CHAIN_ID: u64 = 84532;

fn test_registry() -> Arc<NetworkRegistry> {
    Arc::new(NetworkRegistry::with_configs(vec![NetworkConfig {
        network: Network::BaseSepolia,
        chain_id: CHAIN_ID,
        default_asset: TokenAsset {
            address: Address::repeat_byte(0xAB),
            decimals: 6,
            eip712: TokenEip712 {
                name: "USDC".into(),
                version: "2".into(),
            },
        },
        supported_assets: Vec::new(),
        native_token_symbol: "ETH",
        min_gas_limit_override: None,
        hooks: HookRegistry::default(),
    }]))
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

struct Scenario {
    signer: PrivateKeySigner,
    router: Address,
    token: Address,
    value: U256,
    valid_after: u64,
    valid_before: u64,
    salt: FixedBytes<32>,
    pay_to: Address,
    facilitator_fee: U256,
    hook: Address,
    hook_data: HookData,
}

impl Scenario {
    fn happy_path() -> Self {
        Scenario {
            signer: PrivateKeySigner::random(),
            router: Address::repeat_byte(0xEE),
            token: Address::repeat_byte(0xAB),
            value: U256::from(1_000_000u64),
            valid_after: now() - 10,
            valid_before: now() + 3600,
            salt: generate_salt(),
            pay_to: Address::repeat_byte(0x11),
            facilitator_fee: U256::from(10_000u64),
            hook: Address::ZERO,
            hook_data: HookData::default(),
        }
    }

    /// The commitment binds `(router, token, from, value, validAfter, validBefore, salt, payTo,
    /// facilitatorFee, hook, hookData)`, not the EIP-3009 nonce's signature preimage: the payer
    /// never signs the commitment directly, the facilitator derives it.
    fn commitment_params(&self) -> CommitmentParams {
        CommitmentParams {
            chain_id: CHAIN_ID,
            router: self.router,
            token: self.token,
            from: self.signer.address(),
            value: self.value,
            valid_after: self.valid_after,
            valid_before: self.valid_before,
            salt: self.salt,
            pay_to: self.pay_to,
            facilitator_fee: self.facilitator_fee,
            hook: self.hook,
            hook_data: self.hook_data.clone(),
        }
    }

    /// Signs the EIP-3009 `transferWithAuthorization` digest with `nonce` set to this
    /// scenario's commitment, exactly as a payer's wallet would (spec §4.1).
    fn sign_payload(&self, token_eip712: &TokenEip712) -> PaymentPayload {
        let nonce = compute_commitment(&self.commitment_params());

        let domain = eip712_domain! {
            name: token_eip712.name.clone(),
            version: token_eip712.version.clone(),
            chain_id: CHAIN_ID,
            verifying_contract: self.token,
        };
        let transfer = TransferWithAuthorization {
            from: self.signer.address(),
            to: self.router,
            value: self.value,
            validAfter: U256::from(self.valid_after),
            validBefore: U256::from(self.valid_before),
            nonce,
        };
        let digest = transfer.eip712_signing_hash(&domain);
        let signature = self.signer.sign_hash_sync(&digest).expect("sign");

        PaymentPayload {
            x402_version: X402Version::V1,
            scheme: Scheme::Exact,
            network: Network::BaseSepolia,
            payload: ExactEvmPayload {
                signature: EvmSignature(signature.as_bytes().to_vec()),
                authorization: Authorization {
                    from: EvmAddress(self.signer.address()),
                    to: EvmAddress(self.router),
                    value: AtomicAmount(self.value),
                    valid_after: x402_settle::timestamp::UnixTimestamp(self.valid_after),
                    valid_before: x402_settle::timestamp::UnixTimestamp(self.valid_before),
                    nonce: Hex32(nonce.0),
                },
                settlement_mode: SettlementMode::Direct,
                salt: Hex32(self.salt.0),
                pay_to: EvmAddress(self.pay_to),
                facilitator_fee: AtomicAmount(self.facilitator_fee),
                hook: EvmAddress(self.hook),
                hook_data: self.hook_data.clone(),
            },
        }
    }

    fn requirements(&self, max_amount_required: U256) -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: Network::BaseSepolia,
            max_amount_required: MaxAmountRequired(max_amount_required),
            resource: "https://merchant.example/resource".parse().unwrap(),
            description: "test resource".to_string(),
            mime_type: "application/json".to_string(),
            output_schema: None,
            pay_to: MixedAddress(format!("{:#x}", self.router)),
            max_timeout_seconds: 300,
            asset: MixedAddress(format!("{:#x}", self.token)),
            extra: SettlementExtra {
                settlement_router: EvmAddress(self.router),
                salt: Hex32(self.salt.0),
                pay_to: EvmAddress(self.pay_to),
                facilitator_fee: AtomicAmount(self.facilitator_fee),
                hook: EvmAddress(self.hook),
                hook_data: self.hook_data.clone(),
            },
        }
    }
}

/// Scenario 1: happy path — signature valid, amounts match, verify reports `isValid = true`.
#[tokio::test]
async fn happy_path_verifies() {
    let registry = test_registry();
    let verifier = Verifier::new(registry.clone(), None);
    let scenario = Scenario::happy_path();
    let payload = scenario.sign_payload(&registry.get(Network::BaseSepolia).unwrap().default_asset.eip712);
    let requirements = scenario.requirements(scenario.value);

    let outcome = verifier.verify(&payload, &requirements).await.unwrap();
    assert_eq!(outcome, VerifyOutcome::Valid { payer: scenario.signer.address() });
}

/// Scenario 2: a merchant (or middleware) substitutes `payTo` in `PaymentRequirements` after the
/// payer signed. The EIP-712 signature itself never covered `payTo` — only the nonce does, via
/// the commitment — so `verify` still passes; the tamper only becomes visible when the
/// commitment is recomputed and compared against the signed nonce (the Settlement Engine's
/// CommitmentChecked step, spec §4.9), which is exercised directly here.
#[tokio::test]
async fn commitment_tamper_passes_verify_but_fails_commitment_check() {
    let registry = test_registry();
    let verifier = Verifier::new(registry.clone(), None);
    let scenario = Scenario::happy_path();
    let payload = scenario.sign_payload(&registry.get(Network::BaseSepolia).unwrap().default_asset.eip712);

    let outcome = verifier.verify(&payload, &scenario.requirements(scenario.value)).await.unwrap();
    assert!(outcome.is_valid(), "signature-level verification is unaffected by a payTo swap");

    let mut tampered_params = scenario.commitment_params();
    tampered_params.pay_to = Address::repeat_byte(0x99);
    let signed_nonce = FixedBytes(payload.payload.authorization.nonce.0);
    assert!(
        !verify_commitment(signed_nonce, &tampered_params),
        "commitment recomputed over the tampered payTo must not match the signed nonce"
    );
}

/// Scenario 4: an authorization whose `validBefore` has already passed (beyond the 6-second
/// grace period) is rejected with `authorization_expired`.
#[tokio::test]
async fn expired_authorization_is_rejected() {
    let registry = test_registry();
    let verifier = Verifier::new(registry.clone(), None);
    let mut scenario = Scenario::happy_path();
    scenario.valid_before = now() - 60;
    let payload = scenario.sign_payload(&registry.get(Network::BaseSepolia).unwrap().default_asset.eip712);

    let outcome = verifier.verify(&payload, &scenario.requirements(scenario.value)).await.unwrap();
    assert_eq!(
        outcome,
        VerifyOutcome::Invalid {
            reason: ErrorReason::AuthorizationExpired,
            payer: Some(scenario.signer.address()),
        }
    );
}

/// Scenario 5: the payer's signed `value` is below what the merchant requires. This is the
/// authorization-level short circuit (spec §4.8 step before the on-chain balance check), so it
/// needs no `BalanceChecker` at all.
#[tokio::test]
async fn insufficient_signed_value_is_rejected_before_balance_check() {
    let registry = test_registry();
    let verifier = Verifier::new(registry.clone(), None);
    let mut scenario = Scenario::happy_path();
    scenario.value = U256::from(500_000u64);
    let payload = scenario.sign_payload(&registry.get(Network::BaseSepolia).unwrap().default_asset.eip712);

    let outcome = verifier
        .verify(&payload, &scenario.requirements(U256::from(1_000_000u64)))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        VerifyOutcome::Invalid {
            reason: ErrorReason::InsufficientFunds,
            payer: Some(scenario.signer.address()),
        }
    );
}

/// spec §9 "do not swallow other invalid reasons": a scheme mismatch is tolerated (pass-through),
/// but every other invalid reason must still surface as `Invalid`, not silently accepted.
#[tokio::test]
async fn scheme_mismatch_is_tolerated_not_rejected() {
    let registry = test_registry();
    let verifier = Verifier::new(registry.clone(), None);
    let scenario = Scenario::happy_path();
    let payload = scenario.sign_payload(&registry.get(Network::BaseSepolia).unwrap().default_asset.eip712);

    let mut requirements = scenario.requirements(scenario.value);
    requirements.network = Network::Base; // registry only knows BaseSepolia in this test fixture

    let outcome = verifier.verify(&payload, &requirements).await.unwrap();
    assert!(matches!(outcome, VerifyOutcome::Tolerated { reason: ErrorReason::InvalidScheme, .. }));
}
