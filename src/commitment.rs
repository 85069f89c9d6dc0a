//! Commitment Codec (C1): the canonical hash that binds every settlement parameter into the
//! EIP-3009 authorization `nonce`.
//!
//! This is the sole cryptographic barrier against a facilitator (or a merchant's middleware)
//! substituting settlement parameters after the payer has signed. The tag string, field order,
//! and the fact that `hookData` is pre-hashed before inclusion are part of the wire contract —
//! changing any of them is a protocol break, not a refactor.

use alloy::primitives::{keccak256, Address, B256, U256};
use rand::RngCore;

use crate::types::HookData;

/// Domain-separation tag mixed into every commitment. Prevents a hash collision with an
/// unrelated protocol that also packs `(chainId, address, address, ...)`.
pub const PROTOCOL_TAG: &[u8] = b"x402-settle.commitment.v1";

/// The full set of settlement parameters a commitment binds together (spec §3/§4.1).
#[derive(Debug, Clone)]
pub struct CommitmentParams {
    pub chain_id: u64,
    pub router: Address,
    pub token: Address,
    pub from: Address,
    pub value: U256,
    pub valid_after: u64,
    pub valid_before: u64,
    pub salt: B256,
    pub pay_to: Address,
    pub facilitator_fee: U256,
    pub hook: Address,
    pub hook_data: HookData,
}

/// Compute `keccak256(encodePacked(PROTOCOL_TAG, chainId, router, token, from, value,
/// validAfter, validBefore, salt, payTo, facilitatorFee, hook, keccak256(hookData)))`.
///
/// Field order and the pre-hashing of `hookData` are fixed by the wire contract: any
/// reordering or omission here silently breaks every existing signed authorization.
pub fn compute_commitment(params: &CommitmentParams) -> B256 {
    let hook_data_hash = keccak256(&params.hook_data.0);

    let mut buf = Vec::with_capacity(
        PROTOCOL_TAG.len() + 32 + 20 + 20 + 20 + 32 + 32 + 32 + 32 + 20 + 32 + 20 + 32,
    );
    buf.extend_from_slice(PROTOCOL_TAG);
    buf.extend_from_slice(&U256::from(params.chain_id).to_be_bytes::<32>());
    buf.extend_from_slice(params.router.as_slice());
    buf.extend_from_slice(params.token.as_slice());
    buf.extend_from_slice(params.from.as_slice());
    buf.extend_from_slice(&params.value.to_be_bytes::<32>());
    buf.extend_from_slice(&U256::from(params.valid_after).to_be_bytes::<32>());
    buf.extend_from_slice(&U256::from(params.valid_before).to_be_bytes::<32>());
    buf.extend_from_slice(params.salt.as_slice());
    buf.extend_from_slice(params.pay_to.as_slice());
    buf.extend_from_slice(&params.facilitator_fee.to_be_bytes::<32>());
    buf.extend_from_slice(params.hook.as_slice());
    buf.extend_from_slice(hook_data_hash.as_slice());

    keccak256(&buf)
}

/// Generate 32 cryptographically random bytes for a payer's commitment salt.
pub fn generate_salt() -> B256 {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    B256::from(bytes)
}

/// Recompute the commitment from `params` and compare, case-insensitively on addresses (they
/// are already normalized `Address` values so this is a byte-equality check), to `nonce`.
///
/// This is the CommitmentChecked step of the Settlement Engine (spec §4.9): the sole
/// cryptographic barrier to facilitator parameter tampering.
pub fn verify_commitment(nonce: B256, params: &CommitmentParams) -> bool {
    compute_commitment(params) == nonce
}

/// Compute the idempotency identifier `keccak256(from‖token‖nonce)` (spec §3 "ContextKey"),
/// mirroring the on-chain router's own `calculateContextKey`. Used to pre-check `isSettled`
/// before ever leasing a signer, so a replayed request never needs an on-chain round trip.
pub fn compute_context_key(from: Address, token: Address, nonce: B256) -> B256 {
    let mut buf = Vec::with_capacity(20 + 20 + 32);
    buf.extend_from_slice(from.as_slice());
    buf.extend_from_slice(token.as_slice());
    buf.extend_from_slice(nonce.as_slice());
    keccak256(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> CommitmentParams {
        CommitmentParams {
            chain_id: 84532,
            router: Address::repeat_byte(0x11),
            token: Address::repeat_byte(0x22),
            from: Address::repeat_byte(0x33),
            value: U256::from(1_000_000u64),
            valid_after: 1_700_000_000,
            valid_before: 1_700_003_600,
            salt: B256::repeat_byte(0x44),
            pay_to: Address::repeat_byte(0x55),
            facilitator_fee: U256::from(10_000u64),
            hook: Address::repeat_byte(0x66),
            hook_data: HookData(vec![0xde, 0xad, 0xbe, 0xef]),
        }
    }

    #[test]
    fn commitment_is_deterministic() {
        let params = sample_params();
        assert_eq!(compute_commitment(&params), compute_commitment(&params));
    }

    #[test]
    fn commitment_binds_every_field() {
        let base = sample_params();
        let base_commitment = compute_commitment(&base);

        let mut tampered = sample_params();
        tampered.pay_to = Address::repeat_byte(0x99);
        assert_ne!(compute_commitment(&tampered), base_commitment);

        let mut tampered_fee = sample_params();
        tampered_fee.facilitator_fee = U256::from(1u64);
        assert_ne!(compute_commitment(&tampered_fee), base_commitment);

        let mut tampered_hook_data = sample_params();
        tampered_hook_data.hook_data = HookData(vec![0x00]);
        assert_ne!(compute_commitment(&tampered_hook_data), base_commitment);
    }

    #[test]
    fn verify_commitment_matches_recomputation() {
        let params = sample_params();
        let nonce = compute_commitment(&params);
        assert!(verify_commitment(nonce, &params));

        let wrong_nonce = B256::repeat_byte(0xff);
        assert!(!verify_commitment(wrong_nonce, &params));
    }

    #[test]
    fn generate_salt_produces_distinct_values() {
        let a = generate_salt();
        let b = generate_salt();
        assert_ne!(a, b);
    }

    #[test]
    fn context_key_is_deterministic_and_field_sensitive() {
        let from = Address::repeat_byte(0x01);
        let token = Address::repeat_byte(0x02);
        let nonce = B256::repeat_byte(0x03);

        let key = compute_context_key(from, token, nonce);
        assert_eq!(key, compute_context_key(from, token, nonce));

        let other_nonce = B256::repeat_byte(0x04);
        assert_ne!(key, compute_context_key(from, token, other_nonce));
    }
}
