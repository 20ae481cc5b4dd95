//! Local transaction signing for outgoing `eth_sendTransaction` calls
//!
//! Transactions whose `from` is the signer's address are completed with chain
//! defaults, signed locally and sent as raw transactions. Anything else passes
//! through untouched, so several signers can share one endpoint.

use crate::error::{Error, Result};
use crate::rpc::{RpcTransport, NO_PARAMS};
use crate::signer::DigestSigner;
use alloy::consensus::{SignableTransaction, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Bytes, TxHash, U256, U64};
use alloy::rpc::types::TransactionRequest;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

/// What to send after the adapter has looked at a transaction
#[derive(Debug, Clone)]
pub enum Outgoing {
    /// Signed locally; send via `eth_sendRawTransaction`
    Raw {
        /// EIP-2718 encoded signed transaction
        raw: Bytes,
        /// Hash of the signed transaction
        hash: TxHash,
    },
    /// Not ours to sign; send via `eth_sendTransaction` unchanged
    Passthrough(TransactionRequest),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestBlock {
    #[serde(default)]
    base_fee_per_gas: Option<U256>,
}

/// Signs transactions sent from the signer's address
pub struct SigningAdapter<S> {
    signer: Arc<S>,
}

impl<S> Clone for SigningAdapter<S> {
    fn clone(&self) -> Self {
        Self { signer: Arc::clone(&self.signer) }
    }
}

impl<S: DigestSigner> SigningAdapter<S> {
    /// Wrap a shared signer
    pub const fn new(signer: Arc<S>) -> Self {
        Self { signer }
    }

    /// The shared signer
    pub const fn signer(&self) -> &Arc<S> {
        &self.signer
    }

    /// Whether the transaction declares this signer as its sender
    pub fn matches(&self, tx: &TransactionRequest) -> bool {
        tx.from == Some(self.signer.address())
    }

    /// Sign the transaction if it is ours, otherwise pass it through
    #[instrument(skip_all)]
    pub async fn prepare(&self, tx: TransactionRequest, rpc: &RpcTransport) -> Result<Outgoing> {
        if !self.matches(&tx) {
            debug!(from = ?tx.from, "sender is not the local signer; passing through");
            return Ok(Outgoing::Passthrough(tx));
        }

        let tx = self.fill_defaults(tx, rpc).await?;
        let (raw, hash) = self.sign(tx).await?;
        Ok(Outgoing::Raw { raw, hash })
    }

    /// Fill nonce, chain id, gas and fee fields the caller left unset
    pub async fn fill_defaults(
        &self,
        mut tx: TransactionRequest,
        rpc: &RpcTransport,
    ) -> Result<TransactionRequest> {
        let from = self.signer.address();

        if tx.nonce.is_none() {
            let nonce: U64 = rpc.request("eth_getTransactionCount", (from, "pending")).await?;
            tx.nonce = Some(nonce.saturating_to());
        }
        if tx.chain_id.is_none() {
            let chain_id: U64 = rpc.request("eth_chainId", NO_PARAMS).await?;
            tx.chain_id = Some(chain_id.saturating_to());
        }
        if tx.value.is_none() {
            tx.value = Some(U256::ZERO);
        }

        if let Some(max_fee) = tx.max_fee_per_gas {
            if tx.max_priority_fee_per_gas.is_none() {
                let priority: U256 = rpc.request("eth_maxPriorityFeePerGas", NO_PARAMS).await?;
                // The tip can never exceed the caller's fee cap.
                tx.max_priority_fee_per_gas = Some(priority.saturating_to::<u128>().min(max_fee));
            }
        } else if tx.gas_price.is_none() {
            let block: LatestBlock = rpc.request("eth_getBlockByNumber", ("latest", false)).await?;
            match block.base_fee_per_gas {
                Some(base_fee) => {
                    let priority = match tx.max_priority_fee_per_gas {
                        Some(priority) => priority,
                        None => {
                            let priority: U256 =
                                rpc.request("eth_maxPriorityFeePerGas", NO_PARAMS).await?;
                            priority.saturating_to()
                        }
                    };
                    tx.max_priority_fee_per_gas = Some(priority);
                    let base_fee = base_fee.saturating_to::<u128>();
                    tx.max_fee_per_gas = Some(base_fee.saturating_mul(2).saturating_add(priority));
                }
                None => {
                    let gas_price: U256 = rpc.request("eth_gasPrice", NO_PARAMS).await?;
                    tx.gas_price = Some(gas_price.saturating_to());
                }
            }
        }

        if tx.gas.is_none() {
            let gas: U64 = rpc.request("eth_estimateGas", (&tx,)).await?;
            tx.gas = Some(gas.saturating_to());
        }

        Ok(tx)
    }

    /// Canonicalize, sign and encode a fully specified transaction
    ///
    /// The signature must recover to the signer's address.
    pub async fn sign(&self, tx: TransactionRequest) -> Result<(Bytes, TxHash)> {
        let expected = self.signer.address();
        let typed = tx
            .build_typed_tx()
            .map_err(|_| Error::signing("transaction is missing required fields for signing"))?;

        let digest = typed.signature_hash();
        let sig = self.signer.sign_digest(digest).await?;

        let recovered = sig.recover_address_from_prehash(&digest).map_err(Error::signing)?;
        if recovered != expected {
            return Err(Error::signing(format!(
                "signature recovers to {recovered}, expected {expected}"
            )));
        }

        let envelope: TxEnvelope = typed.into_signed(sig).into();
        let hash = *envelope.tx_hash();
        debug!(%hash, "signed transaction");
        Ok((Bytes::from(envelope.encoded_2718()), hash))
    }
}
