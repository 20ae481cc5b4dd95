//! Local private key signer

use super::DigestSigner;
use crate::error::{Error, Result};
use alloy::primitives::{Address, Signature, B256};
use alloy::signers::{local::PrivateKeySigner, SignerSync};

/// Signer backed by an in-process secp256k1 private key
#[derive(Clone)]
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner").field("address", &self.inner.address()).finish()
    }
}

impl LocalSigner {
    /// Create a signer from a hex-encoded private key (with or without 0x prefix)
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let signer = LocalSigner::from_private_key("0x...")?;
    /// ```
    pub fn from_private_key(private_key: impl AsRef<str>) -> Result<Self> {
        let key = private_key.as_ref().trim();
        let key = key.strip_prefix("0x").unwrap_or(key);

        let inner: PrivateKeySigner = key
            .parse()
            .map_err(|e| Error::Config(format!("failed to parse private key: {e}")))?;

        Ok(Self { inner })
    }

    /// Signer for a freshly generated key
    pub fn random() -> Self {
        Self { inner: PrivateKeySigner::random() }
    }
}

impl From<PrivateKeySigner> for LocalSigner {
    fn from(inner: PrivateKeySigner) -> Self {
        Self { inner }
    }
}

impl DigestSigner for LocalSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_digest(&self, digest: B256) -> Result<Signature> {
        self.inner.sign_hash_sync(&digest).map_err(Error::signing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, keccak256};

    // Well-known anvil account 0
    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn parses_with_and_without_prefix() {
        let expected = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
        assert_eq!(LocalSigner::from_private_key(KEY).unwrap().address(), expected);
        assert_eq!(LocalSigner::from_private_key(&KEY[2..]).unwrap().address(), expected);
    }

    #[test]
    fn rejects_garbage_key() {
        assert!(matches!(LocalSigner::from_private_key("0xnope"), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn signature_recovers_to_address() {
        let signer = LocalSigner::random();
        let digest = keccak256(b"hello");
        let sig = signer.sign_digest(digest).await.unwrap();
        assert_eq!(sig.recover_address_from_prehash(&digest).unwrap(), signer.address());
    }
}
