//! Hardware wallet signer

use super::{recover_parity, DigestSigner};
use crate::error::Result;
use alloy::primitives::{Address, Signature, B256, U256};

/// First account on the standard Ethereum derivation path
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";

/// Digest signing operations of a connected hardware wallet
pub trait HardwareDevice: Send + Sync {
    /// Address of the key at `path`
    fn address(&self, path: &str) -> impl std::future::Future<Output = Result<Address>> + Send;

    /// Raw `(r, s)` signature over `digest` with the key at `path`
    fn sign_digest(
        &self,
        path: &str,
        digest: B256,
    ) -> impl std::future::Future<Output = Result<(U256, U256)>> + Send;
}

/// Signer backed by one key on a hardware wallet
pub struct HardwareWalletSigner<D> {
    device: D,
    path: String,
    address: Address,
}

impl<D: HardwareDevice> HardwareWalletSigner<D> {
    /// Use the key at the default derivation path
    pub async fn new(device: D) -> Result<Self> {
        Self::with_path(device, DEFAULT_DERIVATION_PATH).await
    }

    /// Use the key at `path`
    pub async fn with_path(device: D, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let address = device.address(&path).await?;
        tracing::info!(%address, %path, "hardware wallet signer ready");
        Ok(Self { device, path, address })
    }

    /// Derivation path of the signing key
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl<D: HardwareDevice> DigestSigner for HardwareWalletSigner<D> {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_digest(&self, digest: B256) -> Result<Signature> {
        let (r, s) = self.device.sign_digest(&self.path, digest).await?;
        recover_parity(r, s, &digest, self.address)
    }
}
