//! EulithClient - main entry point for the SDK

use crate::atomic::{AtomicSession, BatchHandle};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::rpc::{RpcTransport, NO_PARAMS};
use crate::signer::DigestSigner;
use crate::signing::{Outgoing, SigningAdapter};
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, TxHash, U256, U64};
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use alloy::sol_types::SolCall;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// How long to wait for a transaction to be mined
#[derive(Debug, Clone, Copy)]
pub struct ReceiptPolling {
    /// Delay between receipt lookups
    pub interval: Duration,
    /// Lookups before giving up
    pub attempts: u32,
}

impl Default for ReceiptPolling {
    fn default() -> Self {
        Self { interval: Duration::from_secs(2), attempts: 60 }
    }
}

/// A toolkit contract registered with the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ToolkitContract {
    /// Account allowed to drive the contract
    pub authorized_address: Address,
    /// Deployed contract
    pub contract_address: Address,
}

#[derive(Deserialize)]
struct ToolkitContracts {
    contracts: Vec<ToolkitContract>,
}

#[derive(Serialize)]
struct NewContractRequest {
    authorized_address: Address,
}

#[derive(Deserialize)]
struct NewContract {
    new_contract_tx_hash: TxHash,
    contract_address: Address,
}

/// Main client for the Eulith service
pub struct EulithClient<S: DigestSigner> {
    pub(crate) rpc: Arc<RpcTransport>,
    signing: SigningAdapter<S>,
    atomic: AtomicSession,
    config: ClientConfig,
    receipts: ReceiptPolling,
}

impl<S: DigestSigner> std::fmt::Debug for EulithClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EulithClient")
            .field("address", &self.address())
            .field("config", &self.config)
            .field("atomic", &self.atomic.state())
            .finish_non_exhaustive()
    }
}

impl<S: DigestSigner> EulithClient<S> {
    /// Connect to the service and acquire the first access token
    ///
    /// Every request is tagged with the signer's address (`auth_address`).
    pub async fn new(config: ClientConfig, signer: S) -> Result<Self> {
        let signer = Arc::new(signer);
        let rpc = RpcTransport::connect(&config)
            .await?
            .with_fixed_param("auth_address", signer.address().to_checksum(None));
        let rpc = Arc::new(rpc);

        info!(address = %signer.address(), endpoint = %config.url, "connected to Eulith");

        Ok(Self {
            atomic: AtomicSession::new(Arc::clone(&rpc)),
            signing: SigningAdapter::new(signer),
            rpc,
            config,
            receipts: ReceiptPolling::default(),
        })
    }

    /// Override receipt polling for [`EulithClient::wait_for_receipt`]
    pub fn with_receipt_polling(mut self, receipts: ReceiptPolling) -> Self {
        self.receipts = receipts;
        self
    }

    /// Get the signer's address
    pub fn address(&self) -> Address {
        self.signing.signer().address()
    }

    /// The signer
    pub fn signer(&self) -> &S {
        self.signing.signer()
    }

    /// Client configuration
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Underlying JSON-RPC transport
    pub fn transport(&self) -> &RpcTransport {
        &self.rpc
    }

    /// Send an arbitrary JSON-RPC request
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        self.rpc.request(method, params).await
    }

    /// Release the client
    pub fn close(self) {
        if let Some(batch) = self.atomic.current_batch() {
            warn!(%batch, "closing client with an uncommitted atomic transaction");
        }
        info!(address = %self.address(), "closed Eulith client");
    }

    // ========== Chain Reads ==========

    /// Chain id of the connected network
    pub async fn chain_id(&self) -> Result<u64> {
        let id: U64 = self.rpc.request("eth_chainId", NO_PARAMS).await?;
        Ok(id.saturating_to())
    }

    /// Native balance of an account
    pub async fn get_balance(&self, account: Address) -> Result<U256> {
        self.rpc.request("eth_getBalance", (account, "latest")).await
    }

    /// Pending transaction count of an account
    pub async fn get_transaction_count(&self, account: Address) -> Result<u64> {
        let count: U64 = self.rpc.request("eth_getTransactionCount", (account, "pending")).await?;
        Ok(count.saturating_to())
    }

    /// Execute a call without creating a transaction
    pub async fn call(&self, tx: &TransactionRequest) -> Result<Bytes> {
        self.rpc.request("eth_call", (tx, "latest")).await
    }

    /// Call a view function and decode its return value
    pub async fn call_contract<C: SolCall + Send>(&self, to: Address, call: C) -> Result<C::Return> {
        let tx = TransactionRequest::default().with_to(to).with_input(call.abi_encode());
        let data = self.call(&tx).await?;
        C::abi_decode_returns(&data)
            .map_err(|e| Error::rpc(format!("failed to decode {} result: {e}", C::SIGNATURE)))
    }

    /// Receipt of a mined transaction
    pub async fn get_transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>> {
        self.rpc.request("eth_getTransactionReceipt", (tx_hash,)).await
    }

    // ========== Sending ==========

    /// Send a transaction
    ///
    /// Transactions from the signer's address are signed locally and sent raw;
    /// any other sender passes through to `eth_sendTransaction` unchanged.
    #[instrument(skip_all)]
    pub async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash> {
        match self.signing.prepare(tx, &self.rpc).await? {
            Outgoing::Raw { raw, hash } => {
                let sent = self.send_raw_transaction(raw).await?;
                if sent != hash {
                    warn!(expected = %hash, returned = %sent, "service returned a different transaction hash");
                }
                Ok(sent)
            }
            Outgoing::Passthrough(tx) => self.rpc.request("eth_sendTransaction", (tx,)).await,
        }
    }

    /// Broadcast an already signed transaction
    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash> {
        self.rpc.request("eth_sendRawTransaction", (raw,)).await
    }

    /// Poll until the transaction is mined
    pub async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt> {
        for attempt in 1..=self.receipts.attempts {
            if let Some(receipt) = self.get_transaction_receipt(tx_hash).await? {
                return Ok(receipt);
            }
            if attempt < self.receipts.attempts {
                tokio::time::sleep(self.receipts.interval).await;
            }
        }

        Err(Error::Timeout(format!("transaction receipt not found: {tx_hash}")))
    }

    /// Send transactions one after another, waiting for each to be mined
    pub async fn send_multi_transaction(
        &self,
        txs: impl IntoIterator<Item = TransactionRequest>,
    ) -> Result<Vec<TransactionReceipt>> {
        let mut receipts = Vec::new();
        for tx in txs {
            let hash = self.send_transaction(tx).await?;
            receipts.push(self.wait_for_receipt(hash).await?);
        }
        Ok(receipts)
    }

    /// Add several transactions to an atomic batch, in order
    pub async fn submit_multi_transaction(
        &self,
        batch: &BatchHandle,
        txs: impl IntoIterator<Item = TransactionRequest>,
    ) -> Result<()> {
        for tx in txs {
            self.atomic.submit(batch, tx).await?;
        }
        Ok(())
    }

    // ========== Access Token ==========

    /// Exchange the refresh credential for a new access token now
    pub async fn refresh_api_token(&self) -> Result<()> {
        self.rpc.auth().refresh().await
    }

    /// Refresh the access token if it is close to expiry
    ///
    /// Requests already do this on their own; this is for callers that want
    /// to refresh ahead of a latency-sensitive call.
    pub async fn ensure_valid_api_token(&self) -> Result<bool> {
        self.rpc.auth().refresh_if_needed().await
    }

    // ========== Atomic Transactions ==========

    /// The atomic session of this client
    pub const fn atomic(&self) -> &AtomicSession {
        &self.atomic
    }

    /// Start an atomic batch for the signer's account
    pub fn start_atomic_transaction(&self, on_behalf_of: Option<Address>) -> Result<BatchHandle> {
        self.atomic.start(self.address(), on_behalf_of)
    }

    /// Commit a batch, returning the composed transaction for the caller to send
    pub async fn commit_atomic_transaction(&self, batch: BatchHandle) -> Result<TransactionRequest> {
        self.atomic.commit(batch).await
    }

    /// Discard a batch
    pub async fn rollback_atomic_transaction(&self, batch: BatchHandle) -> Result<()> {
        self.atomic.rollback(batch).await
    }

    // ========== Toolkit Contract ==========

    /// Toolkit contract authorized for `account`, if one exists
    pub async fn get_toolkit_contract_address(&self, account: Address) -> Result<Option<Address>> {
        let list: ToolkitContracts =
            self.rpc.request("eulith_get_contracts", serde_json::Map::new()).await?;
        Ok(list
            .contracts
            .into_iter()
            .find(|c| c.authorized_address == account)
            .map(|c| c.contract_address))
    }

    /// Deploy a toolkit contract for `account` and wait for the deployment
    #[instrument(skip(self))]
    pub async fn create_toolkit_contract(&self, account: Address) -> Result<Address> {
        let created: NewContract = self
            .rpc
            .request("eulith_new_contract", (NewContractRequest { authorized_address: account },))
            .await?;
        self.wait_for_receipt(created.new_contract_tx_hash).await?;
        info!(contract = %created.contract_address, "created toolkit contract");
        Ok(created.contract_address)
    }

    /// Existing toolkit contract for `account`, deploying one if needed
    pub async fn ensure_toolkit_contract(&self, account: Address) -> Result<Address> {
        match self.get_toolkit_contract_address(account).await? {
            Some(address) => Ok(address),
            None => self.create_toolkit_contract(account).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn toolkit_contracts_match_any_case() {
        let list: ToolkitContracts = serde_json::from_str(
            r#"{"contracts": [{
                "authorized_address": "0x47256a41027e94d1141dd06f05dcb3dde0421551",
                "contract_address": "0xFc11E697f23E5CbBeD3c59aC249955da57e57672"
            }]}"#,
        )
        .unwrap();
        assert_eq!(
            list.contracts[0].authorized_address,
            address!("47256A41027e94d1141Dd06f05DcB3ddE0421551")
        );
    }

    #[test]
    fn default_receipt_polling() {
        let polling = ReceiptPolling::default();
        assert_eq!(polling.interval, Duration::from_secs(2));
        assert_eq!(polling.attempts, 60);
    }
}
