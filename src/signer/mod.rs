//! Digest signer abstraction
//!
//! A signer exposes an address and can sign a 32-byte digest without handing
//! out key material. Backends:
//! - `LocalSigner`: in-process private key
//! - `KmsSigner`: cloud KMS key behind a [`KmsBackend`]
//! - `HardwareWalletSigner`: device behind a [`HardwareDevice`]
//! - `FordefiSigner`: Fordefi MPC custody (black-box signatures)
//!
//! Backends that only return `(r, s)` resolve the recovery parity with
//! [`recover_parity`].

mod fordefi;
mod hardware;
mod kms;
mod local;

pub use fordefi::FordefiSigner;
pub use hardware::{HardwareDevice, HardwareWalletSigner, DEFAULT_DERIVATION_PATH};
pub use kms::{KmsBackend, KmsSigner};
pub use local::LocalSigner;

use crate::error::{Error, Result};
use alloy::primitives::{uint, Address, Signature, B256, U256};
use std::sync::Arc;

/// secp256k1 curve order
const SECP256K1_N: U256 =
    uint!(0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141_U256);

/// Signs 32-byte digests on behalf of one address
pub trait DigestSigner: Send + Sync {
    /// The signer's EVM address
    fn address(&self) -> Address;

    /// Sign a prehashed message; the signature carries its recovery parity
    fn sign_digest(
        &self,
        digest: B256,
    ) -> impl std::future::Future<Output = Result<Signature>> + Send;
}

impl<S: DigestSigner> DigestSigner for Arc<S> {
    fn address(&self) -> Address {
        (**self).address()
    }

    fn sign_digest(
        &self,
        digest: B256,
    ) -> impl std::future::Future<Output = Result<Signature>> + Send {
        (**self).sign_digest(digest)
    }
}

/// Move `s` into the lower half of the curve order
pub fn normalize_s(s: U256) -> U256 {
    if s > SECP256K1_N >> 1 {
        SECP256K1_N - s
    } else {
        s
    }
}

/// Find the recovery parity for `(r, s)` that recovers `expected`
///
/// Both parities are tried after normalizing `s`; a signature that recovers
/// to neither is rejected.
pub fn recover_parity(r: U256, s: U256, digest: &B256, expected: Address) -> Result<Signature> {
    let s = normalize_s(s);
    for parity in [false, true] {
        let sig = Signature::new(r, s, parity);
        if sig.recover_address_from_prehash(digest).ok() == Some(expected) {
            return Ok(sig);
        }
    }
    Err(Error::signing(format!("could not determine v for signer {expected}")))
}
