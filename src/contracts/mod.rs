//! Solidity bindings used by the token and venue helpers

pub mod erc20;
pub mod uniswap;

pub use erc20::*;
pub use uniswap::*;
