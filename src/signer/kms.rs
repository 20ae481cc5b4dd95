//! Cloud KMS signer
//!
//! The KMS client itself is supplied by the caller through [`KmsBackend`]; this
//! module turns its DER outputs into an address and recoverable signatures.

use super::{recover_parity, DigestSigner};
use crate::error::{Error, Result};
use alloy::primitives::{Address, Signature, B256, U256};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::pkcs8::DecodePublicKey;

/// Key operations exposed by a cloud KMS for one secp256k1 key
pub trait KmsBackend: Send + Sync {
    /// DER-encoded SubjectPublicKeyInfo of the key
    fn public_key(&self) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;

    /// DER-encoded ECDSA signature over `digest` (ECDSA_SHA_256, message type DIGEST)
    fn sign_digest(
        &self,
        digest: B256,
    ) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
}

/// Signer backed by a KMS-held key
pub struct KmsSigner<B> {
    backend: B,
    address: Address,
}

impl<B: KmsBackend> KmsSigner<B> {
    /// Fetch the public key once and derive the signer address
    pub async fn new(backend: B) -> Result<Self> {
        let der = backend.public_key().await?;
        let address = address_from_spki_der(&der)?;
        tracing::info!(%address, "KMS signer ready");
        Ok(Self { backend, address })
    }

    /// The wrapped backend
    pub const fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: KmsBackend> DigestSigner for KmsSigner<B> {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_digest(&self, digest: B256) -> Result<Signature> {
        let der = self.backend.sign_digest(digest).await?;
        let sig = k256::ecdsa::Signature::from_der(&der)
            .map_err(|e| Error::signing(format!("invalid DER signature from KMS: {e}")))?;
        let (r, s) = sig.split_bytes();
        recover_parity(U256::from_be_slice(&r), U256::from_be_slice(&s), &digest, self.address)
    }
}

/// Derive an EVM address from a DER SubjectPublicKeyInfo
pub(crate) fn address_from_spki_der(der: &[u8]) -> Result<Address> {
    let key = k256::PublicKey::from_public_key_der(der)
        .map_err(|e| Error::signing(format!("invalid KMS public key: {e}")))?;
    Ok(address_from_public_key(&key))
}

/// EVM address of a secp256k1 public key
pub(crate) fn address_from_public_key(key: &k256::PublicKey) -> Address {
    let point = key.to_encoded_point(false);
    Address::from_raw_public_key(&point.as_bytes()[1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::keccak256;
    use k256::ecdsa::{signature::hazmat::PrehashSigner, SigningKey};
    use k256::pkcs8::EncodePublicKey;

    struct FakeKms {
        key: SigningKey,
        high_s: bool,
    }

    impl KmsBackend for FakeKms {
        async fn public_key(&self) -> Result<Vec<u8>> {
            Ok(self.key.verifying_key().to_public_key_der().unwrap().as_bytes().to_vec())
        }

        async fn sign_digest(&self, digest: B256) -> Result<Vec<u8>> {
            let sig: k256::ecdsa::Signature = self.key.sign_prehash(digest.as_slice()).unwrap();
            let sig = if self.high_s {
                // KMS does not normalize s; emulate that.
                let (r, s) = sig.split_bytes();
                let high = crate::signer::SECP256K1_N - U256::from_be_slice(&s);
                k256::ecdsa::Signature::from_scalars(r, high.to_be_bytes::<32>()).unwrap()
            } else {
                sig
            };
            Ok(sig.to_der().as_bytes().to_vec())
        }
    }

    fn expected_address(key: &SigningKey) -> Address {
        address_from_public_key(&k256::PublicKey::from(key.verifying_key()))
    }

    #[tokio::test]
    async fn signs_and_recovers() {
        for (seed, high_s) in [(b"kms-a", false), (b"kms-b", true)] {
            let key = SigningKey::from_slice(keccak256(seed).as_slice()).unwrap();
            let expected = expected_address(&key);
            let signer = KmsSigner::new(FakeKms { key, high_s }).await.unwrap();
            assert_eq!(signer.address(), expected);

            let digest = keccak256(b"commit");
            let sig = signer.sign_digest(digest).await.unwrap();
            assert_eq!(sig.recover_address_from_prehash(&digest).unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn rejects_malformed_public_key() {
        struct Broken;
        impl KmsBackend for Broken {
            async fn public_key(&self) -> Result<Vec<u8>> {
                Ok(vec![0x30, 0x01, 0x00])
            }
            async fn sign_digest(&self, _digest: B256) -> Result<Vec<u8>> {
                unreachable!()
            }
        }
        assert!(matches!(KmsSigner::new(Broken).await, Err(Error::Signing(_))));
    }
}
