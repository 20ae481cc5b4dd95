//! Aggregated swap quotes

use crate::client::EulithClient;
use crate::erc20::Erc20Token;
use crate::error::Result;
use crate::signer::DigestSigner;
use alloy::primitives::Address;
use alloy::rpc::types::TransactionRequest;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Aggregator used to route a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapProvider {
    /// 0x
    ZeroEx,
    /// 1inch
    OneInch,
}

/// Venue a swap may be restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum LiquiditySource {
    UniswapV1,
    UniswapV2,
    UniswapV3,
    BalancerV1,
    BalancerV2,
    CurveV1,
    CurveV2,
    Compound,
    Pancake,
    AaveV1,
    AaveV2,
    DodoV1,
    DodoV2,
    Sushi,
    Kyber,
    BancorV1,
    BancorV3,
    Lido,
    MakerPsm,
    Mstable,
    Saddle,
    Shell,
    Shiba,
    Synapse,
    Synthetix,
}

/// Parameters of `eulith_swap`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapRequest {
    /// Token sold
    pub sell_token: Address,
    /// Token bought
    pub buy_token: Address,
    /// Amount sold, in whole tokens
    pub sell_amount: f64,
    /// Receiver of the bought tokens (defaults to the sender)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Address>,
    /// Aggregator to route through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_through: Option<SwapProvider>,
    /// Accepted slippage as a fraction (0.01 = 1%)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slippage_tolerance: Option<f64>,
    /// Venue restriction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidity_source: Option<LiquiditySource>,
}

impl SwapRequest {
    /// Sell `sell_amount` whole `sell` tokens for `buy`
    pub fn new(sell: &Erc20Token, buy: &Erc20Token, sell_amount: f64) -> Self {
        Self {
            sell_token: sell.address(),
            buy_token: buy.address(),
            sell_amount,
            recipient: None,
            route_through: None,
            slippage_tolerance: None,
            liquidity_source: None,
        }
    }

    /// Send the bought tokens elsewhere
    pub fn with_recipient(mut self, recipient: Address) -> Self {
        self.recipient = Some(recipient);
        self
    }

    /// Route through a specific aggregator
    pub fn with_route_through(mut self, provider: SwapProvider) -> Self {
        self.route_through = Some(provider);
        self
    }

    /// Set the accepted slippage
    pub fn with_slippage_tolerance(mut self, tolerance: f64) -> Self {
        self.slippage_tolerance = Some(tolerance);
        self
    }

    /// Restrict the swap to one venue
    pub fn with_liquidity_source(mut self, source: LiquiditySource) -> Self {
        self.liquidity_source = Some(source);
        self
    }
}

/// Quote returned by `eulith_swap`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwapQuote {
    /// Price of the buy token in sell tokens
    #[serde(default)]
    pub price: f64,
    /// Transactions that execute the swap, in order
    #[serde(default)]
    pub txs: Vec<TransactionRequest>,
}

impl<S: DigestSigner> EulithClient<S> {
    /// Quote a swap and get the transactions that execute it
    ///
    /// The transactions are not sent; pass them to
    /// [`EulithClient::send_multi_transaction`] or submit them to a batch.
    pub async fn get_swap_quote(&self, request: &SwapRequest) -> Result<SwapQuote> {
        let quote: SwapQuote = self.rpc.request("eulith_swap", (request,)).await?;
        debug!(price = quote.price, txs = quote.txs.len(), "swap quote");
        Ok(quote)
    }
}
