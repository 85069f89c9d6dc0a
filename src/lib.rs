//! Settlement facilitator for an EIP-3009 micropayment protocol.
//!
//! This crate implements the server side of a micropayment protocol layered on top of
//! [EIP-3009](https://eips.ethereum.org/EIPS/eip-3009) `transferWithAuthorization`: a payer signs
//! an authorization once, and a facilitator (this process) verifies it and submits it on-chain
//! through a `SettlementRouter` contract, which atomically moves funds and, optionally, invokes a
//! merchant-supplied hook.
//!
//! # Modules
//!
//! - [`types`] — wire types: `PaymentPayload`, `PaymentRequirements`, response envelopes.
//! - [`network`] — the Network Registry: per-chain constants (chain id, default asset, EIP-712
//!   domain).
//! - [`commitment`] — computes and verifies the commitment hash bound into the EIP-3009 `nonce`,
//!   the sole cryptographic barrier against parameter tampering.
//! - [`sig6492`] — unwraps ERC-6492 counterfactual-wallet signature wrappers.
//! - [`verifier`] — the canonical authorization checks shared by `/verify` and the settlement
//!   pipeline's `Verified` step.
//! - [`price_oracle`] / [`gas_oracle`] — cached USD price and gas price lookups.
//! - [`fee_engine`] — computes the minimum facilitator fee and effective gas limit for a
//!   settlement.
//! - [`balance`] — cached ERC-20 balance checks.
//! - [`signer_pool`] — exclusive per-key signer leasing with failure quarantine.
//! - [`settlement`] — the state machine driving a verified payment from submission to receipt.
//! - [`metrics`] — the transition/failure audit sink, with a Prometheus-backed implementation.
//! - [`config`] — environment-driven startup configuration.
//! - [`provider_cache`] — builds per-network RPC providers and signer pools from [`config`].
//! - [`handlers`] — the HTTP surface (`/verify`, `/settle`, `/supported`, `/health`, `/metrics`).
//! - [`sig_down`] — graceful shutdown on SIGTERM/SIGINT.
//! - [`telemetry`] — tracing/OpenTelemetry bootstrap (gated behind the `telemetry` feature).
//! - [`timestamp`] — the wire-format Unix timestamp newtype shared by [`types`].

pub mod balance;
pub mod commitment;
pub mod config;
pub mod fee_engine;
pub mod gas_oracle;
pub mod handlers;
pub mod metrics;
pub mod network;
pub mod price_oracle;
pub mod provider_cache;
pub mod settlement;
pub mod sig6492;
pub mod sig_down;
pub mod signer_pool;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod timestamp;
pub mod types;
pub mod verifier;
