//! ERC20 token helpers
//!
//! Tokens are resolved by symbol through the service (`eulith_erc_lookup`) or
//! read from chain by address. Transaction builders return an unsigned
//! [`TransactionRequest`] addressed to the token; set `from` (and any gas
//! overrides) before sending it or submitting it to a batch.

use crate::client::EulithClient;
use crate::contracts::{IERC20, IWETH};
use crate::error::{Error, Result};
use crate::signer::DigestSigner;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Gas limit for WETH wrap/unwrap; estimates are unreliable for these
pub const WETH_GAS_LIMIT: u64 = 60_000;

/// WETH has 18 decimals
pub const WETH_DECIMALS: u8 = 18;

/// Scale a whole-token amount to base units
pub fn to_base_units(amount: f64, decimals: u8) -> U256 {
    let scaled = amount * 10f64.powi(i32::from(decimals));
    // `as` saturates: negative and NaN become zero.
    U256::from(scaled as u128)
}

/// Unscale base units to a whole-token amount
pub fn from_base_units(value: U256, decimals: u8) -> f64 {
    value.saturating_to::<u128>() as f64 / 10f64.powi(i32::from(decimals))
}

macro_rules! token_symbols {
    ($($variant:ident => $wire:literal),+ $(,)?) => {
        /// Token symbols the service can resolve
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum TokenSymbol {
            $(
                #[serde(rename = $wire)]
                #[allow(missing_docs)]
                $variant,
            )+
        }

        impl TokenSymbol {
            /// Every known symbol
            pub const ALL: &'static [TokenSymbol] = &[$(TokenSymbol::$variant),+];

            /// Symbol as sent on the wire
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(TokenSymbol::$variant => $wire,)+
                }
            }
        }
    };
}

token_symbols! {
    Usdt => "USDT",
    Bnb => "BNB",
    Usdc => "USDC",
    Busd => "BUSD",
    Matic => "MATIC",
    StEth => "stETH",
    Weth => "WETH",
    Ldo => "LDO",
    Crv => "CRV",
    Cvx => "CVX",
    Bal => "BAL",
    Badger => "BADGER",
    OneInch => "1INCH",
    Uni => "UNI",
    Link => "LINK",
    Ape => "APE",
    Gmt => "GMT",
    Wbtc => "WBTC",
    Lusd => "LUSD",
    Frax => "FRAX",
    CbEth => "cbETH",
    Gala => "GALA",
    Hex => "HEX",
    Rpl => "RPL",
    Dydx => "DYDX",
    Bone => "BONE",
    Looks => "LOOKS",
    AgEur => "agEUR",
    OSqth => "oSQTH",
    WstEth => "wstETH",
    Albt => "ALBT",
}

impl fmt::Display for TokenSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenSymbol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|symbol| symbol.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown token symbol: {s}")))
    }
}

#[derive(Serialize)]
struct TokenLookupRequest {
    symbol: TokenSymbol,
}

#[derive(Debug, Deserialize)]
struct TokenLookup {
    contract_address: Address,
    decimals: u8,
}

/// An ERC20 token with its decimals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Erc20Token {
    address: Address,
    decimals: u8,
    symbol: String,
}

impl Erc20Token {
    /// Token with known metadata
    pub fn new(address: Address, decimals: u8, symbol: impl Into<String>) -> Self {
        Self { address, decimals, symbol: symbol.into() }
    }

    /// Contract address
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Decimals used for float conversions
    pub const fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Token symbol
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Whole-token amount in base units
    pub fn to_base_units(&self, amount: f64) -> U256 {
        to_base_units(amount, self.decimals)
    }

    /// Base units as a whole-token amount
    pub fn from_base_units(&self, value: U256) -> f64 {
        from_base_units(value, self.decimals)
    }

    fn call_tx(&self, input: Vec<u8>) -> TransactionRequest {
        TransactionRequest::default().with_to(self.address).with_input(input)
    }

    /// `transfer(to, amount)`
    pub fn transfer(&self, to: Address, amount: U256) -> TransactionRequest {
        self.call_tx(IERC20::transferCall { to, amount }.abi_encode())
    }

    /// `transfer` of a whole-token amount
    pub fn transfer_float(&self, to: Address, amount: f64) -> TransactionRequest {
        self.transfer(to, self.to_base_units(amount))
    }

    /// `transferFrom(from, to, amount)`
    pub fn transfer_from(&self, from: Address, to: Address, amount: U256) -> TransactionRequest {
        self.call_tx(IERC20::transferFromCall { from, to, amount }.abi_encode())
    }

    /// `transferFrom` of a whole-token amount
    pub fn transfer_from_float(&self, from: Address, to: Address, amount: f64) -> TransactionRequest {
        self.transfer_from(from, to, self.to_base_units(amount))
    }

    /// `approve(spender, amount)`
    pub fn approve(&self, spender: Address, amount: U256) -> TransactionRequest {
        self.call_tx(IERC20::approveCall { spender, amount }.abi_encode())
    }

    /// `approve` of a whole-token amount
    pub fn approve_float(&self, spender: Address, amount: f64) -> TransactionRequest {
        self.approve(spender, self.to_base_units(amount))
    }
}

/// Wrapped ether, which can also be minted from native ether
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Weth {
    token: Erc20Token,
}

impl Weth {
    /// WETH at `address`
    pub fn new(address: Address) -> Self {
        Self { token: Erc20Token::new(address, WETH_DECIMALS, "WETH") }
    }

    /// The ERC20 side of WETH
    pub const fn token(&self) -> &Erc20Token {
        &self.token
    }

    /// Contract address
    pub const fn address(&self) -> Address {
        self.token.address
    }

    /// Wrap `wei` of native ether
    pub fn deposit_wei(&self, wei: U256) -> TransactionRequest {
        self.token
            .call_tx(IWETH::depositCall {}.abi_encode())
            .with_value(wei)
            .with_gas_limit(WETH_GAS_LIMIT)
    }

    /// Wrap a whole-ether amount
    pub fn deposit_eth(&self, eth: f64) -> TransactionRequest {
        self.deposit_wei(to_base_units(eth, WETH_DECIMALS))
    }

    /// Unwrap a whole-ether amount; requires a sufficient WETH balance
    pub fn withdraw_eth(&self, eth: f64) -> TransactionRequest {
        let wad = to_base_units(eth, WETH_DECIMALS);
        self.token
            .call_tx(IWETH::withdrawCall { wad }.abi_encode())
            .with_gas_limit(WETH_GAS_LIMIT)
    }
}

impl<S: DigestSigner> EulithClient<S> {
    /// Resolve a token by symbol
    pub async fn lookup_token(&self, symbol: TokenSymbol) -> Result<Erc20Token> {
        let found: Vec<TokenLookup> = self
            .rpc
            .request("eulith_erc_lookup", (TokenLookupRequest { symbol },))
            .await?;

        match found.as_slice() {
            [token] => Ok(Erc20Token::new(token.contract_address, token.decimals, symbol.as_str())),
            _ => Err(Error::rpc(format!(
                "unexpected response for {symbol} lookup, token isn't recognized"
            ))),
        }
    }

    /// Resolve WETH on the connected network
    pub async fn get_weth(&self) -> Result<Weth> {
        let token = self.lookup_token(TokenSymbol::Weth).await?;
        Ok(Weth::new(token.address()))
    }

    /// Read a token's decimals and symbol from chain
    pub async fn erc20_at(&self, address: Address) -> Result<Erc20Token> {
        let decimals = self.call_contract(address, IERC20::decimalsCall {}).await?;
        let symbol = self.call_contract(address, IERC20::symbolCall {}).await?;
        Ok(Erc20Token::new(address, decimals, symbol))
    }

    /// Token balance of `account` in base units
    pub async fn balance_of(&self, token: &Erc20Token, account: Address) -> Result<U256> {
        self.call_contract(token.address(), IERC20::balanceOfCall { account }).await
    }

    /// Token balance of `account` in whole tokens
    pub async fn balance_of_float(&self, token: &Erc20Token, account: Address) -> Result<f64> {
        Ok(token.from_base_units(self.balance_of(token, account).await?))
    }

    /// Allowance granted by `owner` to `spender` in base units
    pub async fn allowance(&self, token: &Erc20Token, owner: Address, spender: Address) -> Result<U256> {
        self.call_contract(token.address(), IERC20::allowanceCall { owner, spender }).await
    }

    /// Allowance granted by `owner` to `spender` in whole tokens
    pub async fn allowance_float(&self, token: &Erc20Token, owner: Address, spender: Address) -> Result<f64> {
        Ok(token.from_base_units(self.allowance(token, owner, spender).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
    const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    const RECIPIENT: Address = address!("Fc11E697f23E5CbBeD3c59aC249955da57e57672");

    #[test]
    fn test_scale_amounts() {
        // 100 USDC = 100_000_000 (6 decimals)
        assert_eq!(to_base_units(100.0, 6), U256::from(100_000_000u64));
        assert_eq!(to_base_units(0.5, 6), U256::from(500_000u64));
        assert_eq!(to_base_units(-1.0, 6), U256::ZERO);
        assert_eq!(from_base_units(U256::from(1_500_000u64), 6), 1.5);
    }

    #[test]
    fn symbols_use_wire_strings() {
        assert_eq!(serde_json::to_string(&TokenSymbol::OneInch).unwrap(), r#""1INCH""#);
        assert_eq!(serde_json::to_string(&TokenSymbol::StEth).unwrap(), r#""stETH""#);
        assert_eq!("agEUR".parse::<TokenSymbol>().unwrap(), TokenSymbol::AgEur);
        assert!("DOGE".parse::<TokenSymbol>().is_err());
        assert_eq!(TokenSymbol::ALL.len(), 31);
    }

    #[test]
    fn transfer_float_encodes_call() {
        let usdc = Erc20Token::new(USDC, 6, "USDC");
        let tx = usdc.transfer_float(RECIPIENT, 2.5);

        assert_eq!(tx.to, Some(USDC.into()));
        let input = tx.input.input().unwrap();
        let call = IERC20::transferCall::abi_decode(input).unwrap();
        assert_eq!(call.to, RECIPIENT);
        assert_eq!(call.amount, U256::from(2_500_000u64));
    }

    #[test]
    fn weth_wrap_uses_fixed_gas() {
        let weth = Weth::new(WETH);
        let tx = weth.deposit_eth(0.5);
        assert_eq!(tx.value, Some(U256::from(500_000_000_000_000_000u64)));
        assert_eq!(tx.gas, Some(WETH_GAS_LIMIT));
        assert_eq!(tx.input.input().unwrap().as_ref(), IWETH::depositCall::SELECTOR.as_slice());

        let tx = weth.withdraw_eth(1.0);
        let call = IWETH::withdrawCall::abi_decode(tx.input.input().unwrap()).unwrap();
        assert_eq!(call.wad, U256::from(10u64).pow(U256::from(18u64)));
        assert_eq!(tx.gas, Some(WETH_GAS_LIMIT));
    }
}
