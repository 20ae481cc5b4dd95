//! Leveraged shorts, flash loans and Uniswap v3 swaps
//!
//! Operations that move funds (`short_on`, `short_off`, loans, swap starts and
//! `finish_inner`) are only meaningful inside an atomic batch and take a
//! [`BatchHandle`]. Quotes and pool lookups are plain reads.
//!
//! Fees come back from the service as hex-encoded integers in millionths and
//! are returned as fractions (`0.001` = 0.1%).

use crate::atomic::BatchHandle;
use crate::client::EulithClient;
use crate::contracts::IUniswapV3Pool;
use crate::error::{Error, Result};
use crate::rpc::NO_PARAMS;
use crate::signer::DigestSigner;
use alloy::primitives::Address;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Integer fees are expressed in millionths
pub const FEE_DIVISOR: f64 = 1_000_000.0;

/// Convert an integer fee to a fraction
pub fn fee_fraction(raw: u128) -> f64 {
    raw as f64 / FEE_DIVISOR
}

/// Parse a hex-encoded integer, with or without `0x`
pub fn parse_hex_int(value: &str) -> Result<u128> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u128::from_str_radix(digits, 16)
        .map_err(|e| Error::rpc(format!("expected a hex integer, got {value:?}: {e}")))
}

// ========== Short ==========

/// Open a leveraged short
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShortOnRequest {
    /// Token posted as collateral
    pub collateral_token: Address,
    /// Token shorted
    pub short_token: Address,
    /// Collateral amount in whole tokens
    pub collateral_amount: f64,
}

/// Close (part of) a short
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShortOffRequest {
    /// Token posted as collateral
    pub collateral_token: Address,
    /// Token shorted
    pub short_token: Address,
    /// Amount of the short to repay, in whole tokens
    pub repay_short_amount: f64,
    /// Unwind side selector; the service default is `true`
    pub true_for_unwind_a: bool,
}

impl ShortOffRequest {
    /// Repay `repay_short_amount` of the short
    pub fn new(collateral_token: Address, short_token: Address, repay_short_amount: f64) -> Self {
        Self { collateral_token, short_token, repay_short_amount, true_for_unwind_a: true }
    }
}

#[derive(Deserialize)]
struct ShortOnResult {
    #[serde(default)]
    leverage: f64,
}

#[derive(Deserialize)]
struct ShortOffResult {
    #[serde(default)]
    released_collateral: f64,
}

// ========== Uniswap v3 ==========

/// Fee tier of a Uniswap v3 pool, in millionths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum UniswapPoolFee {
    /// 0.05%
    FiveBips,
    /// 0.3%
    ThirtyBips,
    /// 1%
    OneHundredBips,
}

impl UniswapPoolFee {
    /// Tier in millionths
    pub const fn raw(&self) -> u32 {
        match self {
            Self::FiveBips => 500,
            Self::ThirtyBips => 3000,
            Self::OneHundredBips => 10000,
        }
    }

    /// Tier as a fraction
    pub fn fraction(&self) -> f64 {
        fee_fraction(u128::from(self.raw()))
    }
}

impl From<UniswapPoolFee> for u32 {
    fn from(fee: UniswapPoolFee) -> Self {
        fee.raw()
    }
}

impl TryFrom<u32> for UniswapPoolFee {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self> {
        match raw {
            500 => Ok(Self::FiveBips),
            3000 => Ok(Self::ThirtyBips),
            10000 => Ok(Self::OneHundredBips),
            other => Err(Error::rpc(format!("unknown uniswap pool fee: {other}"))),
        }
    }
}

/// Borrow one or two tokens from a Uniswap v3 pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniV3StartLoanRequest {
    /// First borrowed token
    pub borrow_token_a: Address,
    /// Amount of the first token, in whole tokens
    pub borrow_amount_a: f64,
    /// Optional second borrowed token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub borrow_token_b: Option<Address>,
    /// Amount of the second token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub borrow_amount_b: Option<f64>,
    /// Account the repayment is pulled from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay_transfer_from: Option<Address>,
    /// Receiver of the borrowed tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Address>,
}

impl UniV3StartLoanRequest {
    /// Borrow `amount` whole tokens of `token`
    pub fn new(token: Address, amount: f64) -> Self {
        Self {
            borrow_token_a: token,
            borrow_amount_a: amount,
            borrow_token_b: None,
            borrow_amount_b: None,
            pay_transfer_from: None,
            recipient: None,
        }
    }
}

/// One token of an Aave v2 flash loan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AaveV2LoanToken {
    /// Borrowed token
    pub token_address: Address,
    /// Amount in whole tokens
    pub amount: f64,
}

/// Borrow from Aave v2
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AaveV2StartLoanRequest {
    /// Borrowed tokens
    pub tokens: Vec<AaveV2LoanToken>,
}

/// Flash loan from either venue
#[derive(Debug, Clone, PartialEq)]
pub enum FlashLoanRequest {
    /// Uniswap v3
    UniswapV3(UniV3StartLoanRequest),
    /// Aave v2
    AaveV2(AaveV2StartLoanRequest),
}

/// Quote a swap on the best Uniswap v3 pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniV3SwapQuoteRequest {
    /// Token sold
    pub sell_token: Address,
    /// Token bought
    pub buy_token: Address,
    /// Exact input amount, or exact output amount when `true_for_amount_in` is false
    pub amount: f64,
    /// Whether `amount` is the input side
    pub true_for_amount_in: bool,
    /// Restrict to one fee tier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<UniswapPoolFee>,
}

/// Start a swap on a Uniswap v3 pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniV3StartSwapRequest {
    /// Token sold
    pub sell_token: Address,
    /// Positive for an exact sell amount, negative for an exact buy amount
    pub amount: f64,
    /// Pool to swap on
    pub pool_address: Address,
    /// Revert instead of partially filling
    pub fill_or_kill: bool,
    /// Price limit as returned by the quote
    pub sqrt_limit_price: String,
    /// Receiver of the bought tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Address>,
    /// Account the sold tokens are pulled from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay_transfer_from: Option<Address>,
}

/// How a quote is turned into a swap request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOptions {
    /// Revert instead of partially filling
    pub fill_or_kill: bool,
    /// Receiver of the bought tokens
    pub recipient: Option<Address>,
    /// Account the sold tokens are pulled from
    pub pay_transfer_from: Option<Address>,
}

impl Default for SwapOptions {
    fn default() -> Self {
        Self { fill_or_kill: true, recipient: None, pay_transfer_from: None }
    }
}

#[derive(Debug, Deserialize)]
struct RawUniV3Quote {
    price: f64,
    sell_token: Address,
    amount: f64,
    pool_address: Address,
    sqrt_limit_price: String,
    fee: UniswapPoolFee,
    true_for_amount_in: bool,
}

/// Best-price Uniswap v3 quote with the request that executes it
#[derive(Debug, Clone, PartialEq)]
pub struct UniV3Quote {
    /// Quoted price
    pub price: f64,
    /// Fee tier of the chosen pool
    pub fee: UniswapPoolFee,
    /// Ready-to-start swap
    pub swap_request: UniV3StartSwapRequest,
}

impl RawUniV3Quote {
    fn into_quote(self, options: SwapOptions) -> UniV3Quote {
        // Exact-output swaps are requested with a negative amount.
        let amount = if self.true_for_amount_in { self.amount } else { -self.amount };
        UniV3Quote {
            price: self.price,
            fee: self.fee,
            swap_request: UniV3StartSwapRequest {
                sell_token: self.sell_token,
                amount,
                pool_address: self.pool_address,
                fill_or_kill: options.fill_or_kill,
                sqrt_limit_price: self.sqrt_limit_price,
                recipient: options.recipient,
                pay_transfer_from: options.pay_transfer_from,
            },
        }
    }
}

/// Look up a pool by its tokens and fee tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolLookupRequest {
    /// One token of the pair
    pub token_a: Address,
    /// The other token
    pub token_b: Address,
    /// Fee tier
    pub fee: UniswapPoolFee,
}

/// A Uniswap v3 pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct UniV3Pool {
    /// Pool contract
    #[serde(rename = "pool_address")]
    pub address: Address,
    /// Fee tier
    pub fee: UniswapPoolFee,
    /// `token0` of the pool
    pub token_zero: Address,
    /// `token1` of the pool
    pub token_one: Address,
}

impl UniV3Pool {
    /// The pool's other token, if `token` belongs to the pool
    pub fn counterpart(&self, token: Address) -> Option<Address> {
        if token == self.token_zero {
            Some(self.token_one)
        } else if token == self.token_one {
            Some(self.token_zero)
        } else {
            None
        }
    }
}

/// Take one token now and pay with another when the batch finishes
#[derive(Debug, Clone, PartialEq)]
pub struct FlashRequest {
    /// Token received
    pub take: Address,
    /// Token paid back
    pub pay: Address,
    /// Amount taken, in whole tokens
    pub take_amount: f64,
    /// Receiver of the taken tokens
    pub recipient: Option<Address>,
    /// Account the payment is pulled from
    pub pay_transfer_from: Option<Address>,
}

impl<S: DigestSigner> EulithClient<S> {
    async fn batch_call<P, R>(&self, batch: &BatchHandle, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        self.atomic().call(batch, method, params).await
    }

    async fn batch_fee<P: Serialize + Send>(&self, batch: &BatchHandle, method: &str, params: P) -> Result<f64> {
        let raw: String = self.batch_call(batch, method, params).await?;
        Ok(fee_fraction(parse_hex_int(&raw)?))
    }

    /// Open a leveraged short; returns the resulting leverage
    #[instrument(skip_all, fields(batch = %batch.id()))]
    pub async fn short_on(&self, batch: &BatchHandle, request: &ShortOnRequest) -> Result<f64> {
        let result: ShortOnResult = self.batch_call(batch, "eulith_short_on", (request,)).await?;
        debug!(leverage = result.leverage, "short opened");
        Ok(result.leverage)
    }

    /// Close a short; returns the released collateral
    #[instrument(skip_all, fields(batch = %batch.id()))]
    pub async fn short_off(&self, batch: &BatchHandle, request: &ShortOffRequest) -> Result<f64> {
        let result: ShortOffResult = self.batch_call(batch, "eulith_short_off", (request,)).await?;
        debug!(released = result.released_collateral, "short closed");
        Ok(result.released_collateral)
    }

    /// Start a flash loan; returns its fee as a fraction
    pub async fn start_flash_loan(&self, batch: &BatchHandle, request: &FlashLoanRequest) -> Result<f64> {
        match request {
            FlashLoanRequest::UniswapV3(loan) => {
                self.batch_fee(batch, "eulith_start_uniswapv3_loan", (loan,)).await
            }
            FlashLoanRequest::AaveV2(loan) => {
                self.batch_fee(batch, "eulith_start_aavev2_loan", (loan,)).await
            }
        }
    }

    /// Start a Uniswap v3 swap; returns its fee as a fraction
    pub async fn start_uni_swap(&self, batch: &BatchHandle, request: &UniV3StartSwapRequest) -> Result<f64> {
        self.batch_fee(batch, "eulith_start_uniswapv3_swap", (request,)).await
    }

    /// Close the innermost loan or swap; returns the amount owed
    pub async fn finish_inner(&self, batch: &BatchHandle) -> Result<u128> {
        let raw: String = self.batch_call(batch, "eulith_finish_inner", NO_PARAMS).await?;
        parse_hex_int(&raw)
    }

    /// Repay the innermost flash; alias of [`EulithClient::finish_inner`]
    pub async fn pay_flash(&self, batch: &BatchHandle) -> Result<u128> {
        self.finish_inner(batch).await
    }

    /// Quote a Uniswap v3 swap across pools
    pub async fn get_univ3_quote(
        &self,
        request: &UniV3SwapQuoteRequest,
        options: SwapOptions,
    ) -> Result<UniV3Quote> {
        let raw: RawUniV3Quote = self.rpc.request("eulith_uniswapv3_quote", (request,)).await?;
        Ok(raw.into_quote(options))
    }

    /// Quote a swap of `amount` `sell_token` on a specific pool
    pub async fn get_pool_quote(
        &self,
        pool: &UniV3Pool,
        sell_token: Address,
        amount: f64,
        true_for_amount_in: bool,
        options: SwapOptions,
    ) -> Result<UniV3Quote> {
        let buy_token = pool.counterpart(sell_token).ok_or_else(|| {
            Error::rpc(
                "cannot start swap on pool with no matching sell token, \
                 please make sure you're requesting to swap with one of the pool's tokens",
            )
        })?;
        let request = UniV3SwapQuoteRequest {
            sell_token,
            buy_token,
            amount,
            true_for_amount_in,
            fee: Some(pool.fee),
        };
        self.get_univ3_quote(&request, options).await
    }

    /// Find the pool for a pair and fee tier
    pub async fn get_univ3_pool(&self, request: &PoolLookupRequest) -> Result<UniV3Pool> {
        let pools: Vec<UniV3Pool> =
            self.rpc.request("eulith_uniswapv3_pool_lookup", (request,)).await?;
        match pools.as_slice() {
            [pool] => Ok(*pool),
            other => Err(Error::rpc(format!(
                "uniswap v3 pool lookup came back with an unexpected response: {} pools",
                other.len()
            ))),
        }
    }

    /// Read a pool's tokens and fee tier from chain
    pub async fn univ3_pool_at(&self, address: Address) -> Result<UniV3Pool> {
        let token_zero = self.call_contract(address, IUniswapV3Pool::token0Call {}).await?;
        let token_one = self.call_contract(address, IUniswapV3Pool::token1Call {}).await?;
        let fee = self.call_contract(address, IUniswapV3Pool::feeCall {}).await?;
        let fee = UniswapPoolFee::try_from(fee.to::<u32>())?;
        Ok(UniV3Pool { address, fee, token_zero, token_one })
    }

    /// Take `take_amount` of `take`, to be paid in `pay` when the batch unwinds
    ///
    /// Same-token flashes are Uniswap v3 loans priced at 1.0; otherwise the
    /// best pool is quoted for the exact output and a swap is started on it.
    /// Returns `(price, fee)`.
    #[instrument(skip_all, fields(batch = %batch.id()))]
    pub async fn start_flash(&self, batch: &BatchHandle, request: &FlashRequest) -> Result<(f64, f64)> {
        if request.take == request.pay {
            let loan = UniV3StartLoanRequest {
                pay_transfer_from: request.pay_transfer_from,
                recipient: request.recipient,
                ..UniV3StartLoanRequest::new(request.take, request.take_amount)
            };
            let fee = self.start_flash_loan(batch, &FlashLoanRequest::UniswapV3(loan)).await?;
            return Ok((1.0, fee));
        }

        let quote_request = UniV3SwapQuoteRequest {
            sell_token: request.pay,
            buy_token: request.take,
            amount: request.take_amount,
            true_for_amount_in: false,
            fee: None,
        };
        let options = SwapOptions {
            fill_or_kill: true,
            recipient: request.recipient,
            pay_transfer_from: request.pay_transfer_from,
        };
        let raw: RawUniV3Quote = self
            .batch_call(batch, "eulith_uniswapv3_quote", (&quote_request,))
            .await?;
        let quote = raw.into_quote(options);
        let fee = self.start_uni_swap(batch, &quote.swap_request).await?;
        Ok((quote.price, fee))
    }
}
