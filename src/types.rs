//! Wire types for the settlement protocol: `PaymentPayload`, `PaymentRequirements`, the
//! settlement-specific `extra` struct, and the `/verify` `/settle` response envelopes.
//!
//! Field-level newtypes (`EvmAddress`, `HexEncodedNonce`, `EvmSignature`, ...) carry their own
//! serde impls so malformed wire input is rejected at deserialization rather than deep inside
//! the Verifier or Settlement Engine.

use alloy::hex::FromHex;
use alloy::primitives::{Address, AddressError, U256};
use alloy::{hex, sol};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use url::Url;

use crate::network::Network;
use crate::timestamp::UnixTimestamp;

pub const EVM_MAX_ATOMIC_UNITS: usize = 18;

/// Protocol version. Currently only version 1 is supported.
#[derive(Debug, Copy, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum X402Version {
    #[serde(rename = "1")]
    V1,
}

#[derive(Debug)]
pub struct X402VersionError(pub u8);

impl Display for X402VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unsupported x402Version: {}", self.0)
    }
}

impl std::error::Error for X402VersionError {}

impl TryFrom<u8> for X402Version {
    type Error = X402VersionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(X402Version::V1),
            _ => Err(X402VersionError(value)),
        }
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        X402Version::try_from(num).map_err(Error::custom)
    }
}

/// Payment scheme. Only "exact" is supported: the transferred amount must match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scheme::Exact => "exact",
        };
        write!(f, "{}", s)
    }
}

/// A settlement mode requested by the merchant. `Direct` is the only mode the router
/// understands today; the enum exists so a future mode is a data change, not a wire break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMode {
    Direct,
}

impl Default for SettlementMode {
    fn default() -> Self {
        SettlementMode::Direct
    }
}

/// A 65-byte ECDSA signature, possibly ERC-6492-wrapped for a pre-deploy smart account.
/// Serialized as a `0x`-prefixed hex string. Unlike a plain EIP-3009 signature this is NOT
/// fixed-length on the wire: [`crate::sig6492`] strips a variable-length ERC-6492 suffix before
/// the inner 65-byte signature is recovered, so deserialization only checks "even-length hex".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmSignature(pub Vec<u8>);

impl<'de> Deserialize<'de> for EvmSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static SIG_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x([0-9a-fA-F]{2})+$").expect("invalid signature regex"));

        if !SIG_REGEX.is_match(&s) {
            return Err(Error::custom(
                "invalid EVM signature format: must be 0x-prefixed hex",
            ));
        }

        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| Error::custom("failed to decode EVM signature hex string"))?;

        if bytes.len() < 65 {
            return Err(Error::custom("signature must be at least 65 bytes"));
        }

        Ok(EvmSignature(bytes))
    }
}

impl Serialize for EvmSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let hex_string = format!("0x{}", hex::encode(&self.0));
        serializer.serialize_str(&hex_string)
    }
}

/// Wrapper around `alloy::primitives::Address` with display/serde support.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmAddress(pub Address);

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<EvmAddress> for Address {
    fn from(address: EvmAddress) -> Self {
        address.0
    }
}

impl From<Address> for EvmAddress {
    fn from(address: Address) -> Self {
        EvmAddress(address)
    }
}

impl From<EvmAddress> for MixedAddress {
    fn from(address: EvmAddress) -> Self {
        MixedAddress(format!("{}", address))
    }
}

/// A 32-byte value, hex-encoded with `0x` prefix: 64 hex characters.
///
/// Used both for the EIP-3009 `nonce` (which doubles as the settlement commitment, see
/// [`crate::commitment`]) and for the payer-contributed `salt`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Hex32(pub [u8; 32]);

impl<'de> Deserialize<'de> for Hex32 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static HEX32_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid hex32 regex"));

        if !HEX32_REGEX.is_match(&s) {
            return Err(Error::custom("invalid 32-byte hex format"));
        }

        let bytes = hex::decode(&s[2..]).map_err(|_| Error::custom("invalid hex"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::custom("expected exactly 32 bytes"))?;

        Ok(Hex32(array))
    }
}

impl Serialize for Hex32 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let hex_string = format!("0x{}", hex::encode(self.0));
        serializer.serialize_str(&hex_string)
    }
}

impl Display for Hex32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<Hex32> for alloy::primitives::B256 {
    fn from(value: Hex32) -> Self {
        alloy::primitives::B256::from(value.0)
    }
}

/// An EIP-3009 `nonce`. On this protocol, `nonce == commitment` (spec §4.1): the nonce is not a
/// counter, it is the canonical hash binding every settlement parameter.
pub type HexEncodedNonce = Hex32;

/// The payer-contributed salt that seeds commitment uniqueness (spec §4.1).
pub type Salt = Hex32;

/// A token amount in base units, wire-encoded as a decimal string to avoid precision loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AtomicAmount(pub U256);

impl<'de> Deserialize<'de> for AtomicAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        if s.len() > EVM_MAX_ATOMIC_UNITS + 20 {
            return Err(Error::custom("value too long"));
        }

        let value = U256::from_str_radix(&s, 10)
            .map_err(|_| Error::custom("value is not a valid non-negative decimal integer"))?;

        Ok(AtomicAmount(value))
    }
}

impl From<AtomicAmount> for U256 {
    fn from(value: AtomicAmount) -> Self {
        value.0
    }
}

impl Display for AtomicAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The EIP-3009 authorization primitive (spec §3): `{from, to, value, validAfter, validBefore,
/// nonce}`. Invariant enforced by the Verifier, not this type: `validAfter <= now <=
/// validBefore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: AtomicAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
}

/// Settlement-specific fields carried alongside the EIP-3009 authorization: the payer's salt,
/// the final recipient, the facilitator fee the merchant is willing to pay, and the hook to
/// invoke. These, together with `authorization`, are what the commitment binds (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    pub signature: EvmSignature,
    pub authorization: Authorization,
    #[serde(default)]
    pub settlement_mode: SettlementMode,
    pub salt: Salt,
    pub pay_to: EvmAddress,
    pub facilitator_fee: AtomicAmount,
    pub hook: EvmAddress,
    pub hook_data: HookData,
}

/// Arbitrary hook calldata, wire-encoded as `0x`-prefixed hex of any length (including empty).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HookData(pub Vec<u8>);

impl<'de> Deserialize<'de> for HookData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let trimmed = s.strip_prefix("0x").unwrap_or(&s);
        if trimmed.is_empty() {
            return Ok(HookData(Vec::new()));
        }
        let bytes = hex::decode(trimmed).map_err(|_| Error::custom("invalid hex in hookData"))?;
        Ok(HookData(bytes))
    }
}

impl Serialize for HookData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(&self.0)))
    }
}

/// A signed request to settle funds on-chain: scheme, network, and the signed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    #[allow(dead_code)]
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    pub payload: ExactEvmPayload,
}

/// The maximum token amount the merchant requires, wire-encoded as a decimal string.
pub type MaxAmountRequired = AtomicAmount;

/// Either an EVM address (`0x...`) or an off-chain identifier. Validated by format, not
/// resolved to an on-chain address until a settlement path needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MixedAddress(pub String);

impl TryInto<Address> for MixedAddress {
    type Error = AddressError;

    fn try_into(self) -> Result<Address, Self::Error> {
        Address::from_hex(self.0)
    }
}

impl TryInto<EvmAddress> for MixedAddress {
    type Error = AddressError;
    fn try_into(self) -> Result<EvmAddress, Self::Error> {
        let address: Address = self.try_into()?;
        Ok(EvmAddress(address))
    }
}

impl Display for MixedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for MixedAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static MIXED_ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^(0x[a-fA-F0-9]{40}|[A-Za-z0-9][A-Za-z0-9-]{0,34}[A-Za-z0-9])$")
                .expect("invalid MixedAddress regex")
        });

        if MIXED_ADDRESS_REGEX.is_match(&s) {
            Ok(MixedAddress(s))
        } else {
            Err(Error::custom("invalid MixedAddress format"))
        }
    }
}

/// A 32-byte EVM transaction hash, `0x`-prefixed hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHash(pub [u8; 32]);

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        static TX_HASH_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid regex"));

        if !TX_HASH_REGEX.is_match(&s) {
            return Err(Error::custom("invalid transaction hash format"));
        }

        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| Error::custom("invalid hex in transaction hash"))?;

        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::custom("transaction hash must be exactly 32 bytes"))?;

        Ok(TransactionHash(array))
    }
}

impl Serialize for TransactionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let hex_string = format!("0x{}", hex::encode(self.0));
        serializer.serialize_str(&hex_string)
    }
}

impl Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<alloy::primitives::TxHash> for TransactionHash {
    fn from(value: alloy::primitives::TxHash) -> Self {
        TransactionHash(value.0)
    }
}

/// The `extra` object of [`PaymentRequirements`]: settlement parameters the merchant advertises
/// and which the Settlement Engine's CommitmentChecked step must match against what the payer
/// actually signed (spec §3, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementExtra {
    pub settlement_router: EvmAddress,
    pub salt: Salt,
    pub pay_to: EvmAddress,
    pub facilitator_fee: AtomicAmount,
    pub hook: EvmAddress,
    pub hook_data: HookData,
}

/// Merchant-advertised contract for an acceptable payment (spec §3).
#[derive(Debug, Serialize, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: Network,
    pub max_amount_required: MaxAmountRequired,
    pub resource: Url,
    pub description: String,
    pub mime_type: String,
    pub output_schema: Option<serde_json::Value>,
    /// The router address funds are directed to on-chain. Distinct from `extra.pay_to`, the
    /// final recipient the router forwards to after the hook runs.
    pub pay_to: MixedAddress,
    pub max_timeout_seconds: u64,
    pub asset: MixedAddress,
    pub extra: SettlementExtra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

impl Display for VerifyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VerifyRequest(payment_payload={:?}, payment_requirements={:?})",
            self.payment_payload, self.payment_requirements
        )
    }
}

pub type SettleRequest = VerifyRequest;

/// Machine-readable error reasons surfaced verbatim to clients (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    InvalidSignature,
    AuthorizationExpired,
    AuthorizationNotYetValid,
    InvalidRecipient,
    InsufficientFunds,
    InvalidScheme,
    InvalidCommitment,
    AlreadySettled,
    SettlementRouterNotConfigured,
    InvalidTransactionState,
    UnexpectedSettleError,
}

/// Gas and profitability accounting produced post-receipt (spec §3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasMetrics {
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub actual_gas_cost_native: f64,
    pub actual_gas_cost_usd: f64,
    pub facilitator_fee: u128,
    pub facilitator_fee_usd: f64,
    pub profit_usd: f64,
    pub profit_margin_percent: f64,
    pub profitable: bool,
}

/// Returned after attempting to settle a payment on-chain (spec §6).
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
    pub payer: MixedAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionHash>,
    pub network: Network,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_metrics: Option<GasMetrics>,
}

/// Returned after verifying a `PaymentPayload` against `PaymentRequirements` (spec §6).
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<ErrorReason>,
    pub payer: MixedAddress,
}

/// A `(scheme, network)` tuple the facilitator will accept, as returned by `GET /supported`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKind {
    pub scheme: Scheme,
    pub network: Network,
}

/// Unstructured error response for unexpected or fatal server errors (500s).
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

sol!(
    /// EIP-712 typed-data struct matching EIP-3009 `transferWithAuthorization`, used to
    /// reconstruct the signing hash during verification. Does not carry the settlement
    /// parameters (`salt`, `payTo`, `facilitatorFee`, `hook`, `hookData`) — those bind through
    /// the commitment in `nonce`, not through the EIP-712 struct itself (spec §4.1).
    #[derive(Serialize, Deserialize)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
);
