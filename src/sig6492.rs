//! ERC-6492 signature unwrapping for counterfactual (pre-deploy) smart-contract wallets.
//!
//! A payer whose smart wallet has not been deployed yet cannot satisfy EIP-1271 (there is no
//! code at their address to call). [ERC-6492](https://eips.ethereum.org/EIPS/eip-6492) works
//! around this by appending a fixed magic suffix to the signature; everything before the suffix
//! ABI-decodes to `(address factory, bytes factoryCalldata, bytes innerSig)`. The Verifier and
//! Settlement Engine both need to find the inner signature before recovery/ABI submission, so
//! this lives as its own module rather than inlined in either.

use alloy::hex;
use alloy::primitives::{Address, Bytes};
use alloy::sol;

use crate::types::EvmSignature;

/// The fixed 32-byte magic suffix defined by ERC-6492. Any signature ending with this constant
/// is treated as 6492-wrapped; the preceding bytes decode as `(factory, factoryCalldata,
/// innerSig)`.
pub const EIP6492_MAGIC_SUFFIX: [u8; 32] =
    hex!("6492649264926492649264926492649264926492649264926492649264926492");

sol! {
    /// Matches the tuple `(address factory, bytes factoryCalldata, bytes innerSig)`.
    #[derive(Debug)]
    struct Sig6492 {
        address factory;
        bytes   factoryCalldata;
        bytes   innerSig;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Sig6492Error {
    #[error("failed to decode ERC-6492 signature prefix: {0}")]
    Decode(String),
}

/// A signature normalized out of its possible ERC-6492 wrapper.
#[derive(Debug, Clone)]
pub enum UnwrappedSignature {
    /// The signature carried no 6492 wrapper; `inner` is the original bytes unchanged.
    Plain { inner: Bytes },
    /// The signature was 6492-wrapped for a counterfactual wallet not yet deployed.
    Wrapped {
        factory: Address,
        factory_calldata: Bytes,
        inner: Bytes,
    },
}

impl UnwrappedSignature {
    /// The inner signature bytes to pass on to ERC-1271 validation or to the router's ABI.
    pub fn inner(&self) -> &Bytes {
        match self {
            UnwrappedSignature::Plain { inner } => inner,
            UnwrappedSignature::Wrapped { inner, .. } => inner,
        }
    }

    pub fn is_wrapped(&self) -> bool {
        matches!(self, UnwrappedSignature::Wrapped { .. })
    }
}

/// Detect and strip an ERC-6492 wrapper from raw signature bytes.
pub fn unwrap(signature: &EvmSignature) -> Result<UnwrappedSignature, Sig6492Error> {
    let bytes = &signature.0;
    let is_wrapped = bytes.len() >= 32 && bytes[bytes.len() - 32..] == EIP6492_MAGIC_SUFFIX;

    if !is_wrapped {
        return Ok(UnwrappedSignature::Plain {
            inner: Bytes::copy_from_slice(bytes),
        });
    }

    let body = &bytes[..bytes.len() - 32];
    let sig6492 = Sig6492::abi_decode_params(body)
        .map_err(|e| Sig6492Error::Decode(format!("{e}")))?;

    Ok(UnwrappedSignature::Wrapped {
        factory: sig6492.factory,
        factory_calldata: sig6492.factoryCalldata,
        inner: sig6492.innerSig,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_signature_passes_through() {
        let sig = EvmSignature(vec![0xab; 65]);
        let unwrapped = unwrap(&sig).expect("decode");
        assert!(!unwrapped.is_wrapped());
        assert_eq!(unwrapped.inner().len(), 65);
    }

    #[test]
    fn short_bytes_are_never_mistaken_for_wrapped() {
        let sig = EvmSignature(vec![0x01; 10]);
        let unwrapped = unwrap(&sig).expect("decode");
        assert!(!unwrapped.is_wrapped());
    }
}
