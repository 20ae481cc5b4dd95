//! Eulith SDK for Rust
//!
//! A Rust client for the Eulith Ethereum RPC and DeFi execution service.
//!
//! # Features
//!
//! - Standard JSON-RPC with automatic access token refresh
//! - Local signing of outgoing transactions (local key, KMS, hardware wallet, Fordefi MPC)
//! - Atomic transactions: batch several calls into one on-chain transaction
//! - ERC20 helpers, aggregated swap quotes, shorts, flash loans and Uniswap v3
//! - Streaming pool prices over WebSocket
//!
//! # Example
//!
//! ```rust,ignore
//! use eulith_sdk::{ClientConfig, Erc20Token, EulithClient, LocalSigner, TokenSymbol};
//! use alloy::network::TransactionBuilder;
//!
//! #[tokio::main]
//! async fn main() -> eyre::Result<()> {
//!     let config = ClientConfig::from_env()?;
//!     let signer = LocalSigner::from_private_key(std::env::var("PRIVATE_KEY")?)?;
//!     let client = EulithClient::new(config, signer).await?;
//!
//!     let usdc = client.lookup_token(TokenSymbol::Usdc).await?;
//!     let recipient = "0xFc11E697f23E5CbBeD3c59aC249955da57e57672".parse()?;
//!
//!     // Two transfers that land in one transaction
//!     let batch = client.start_atomic_transaction(None)?;
//!     for amount in [1.0, 2.0] {
//!         let tx = usdc.transfer_float(recipient, amount).with_from(client.address());
//!         client.atomic().submit(&batch, tx).await?;
//!     }
//!     let combined = client.commit_atomic_transaction(batch).await?;
//!
//!     let hash = client.send_transaction(combined.with_from(client.address())).await?;
//!     client.wait_for_receipt(hash).await?;
//!     Ok(())
//! }
//! ```

pub mod atomic;
pub mod auth;
pub mod client;
pub mod config;
pub mod contracts;
pub mod defi;
pub mod erc20;
pub mod error;
pub mod rpc;
pub mod signer;
pub mod signing;
pub mod stream;
pub mod swap;

// Re-export main types for convenience
pub use atomic::{AtomicSession, AtomicState, BatchHandle};
pub use auth::{AccessToken, AuthManager};
pub use client::{EulithClient, ReceiptPolling, ToolkitContract};
pub use config::ClientConfig;
pub use defi::{
    AaveV2LoanToken, AaveV2StartLoanRequest, FlashLoanRequest, FlashRequest, PoolLookupRequest,
    ShortOffRequest, ShortOnRequest, SwapOptions, UniV3Pool, UniV3Quote, UniV3StartLoanRequest,
    UniV3StartSwapRequest, UniV3SwapQuoteRequest, UniswapPoolFee,
};
pub use erc20::{Erc20Token, TokenSymbol, Weth};
pub use error::{Error, Result, RpcError};
pub use rpc::RpcTransport;
pub use signer::{
    DigestSigner, FordefiSigner, HardwareDevice, HardwareWalletSigner, KmsBackend, KmsSigner,
    LocalSigner,
};
pub use signing::{Outgoing, SigningAdapter};
pub use stream::{PriceStream, PriceUpdate, Subscription, SubscriptionRequest};
pub use swap::{LiquiditySource, SwapProvider, SwapQuote, SwapRequest};
