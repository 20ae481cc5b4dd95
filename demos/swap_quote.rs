//! Quote a WETH -> USDC swap and execute it
//!
//! Run with: cargo run --example swap_quote
//!
//! Requires EULITH_REFRESH_TOKEN and PRIVATE_KEY environment variables.
//! Set EXECUTE=1 to send the swap transactions.

use alloy::network::TransactionBuilder;
use eulith_sdk::{ClientConfig, EulithClient, LocalSigner, SwapRequest, TokenSymbol};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let signer = LocalSigner::from_private_key(std::env::var("PRIVATE_KEY")?)?;
    let client = EulithClient::new(ClientConfig::from_env()?, signer).await?;
    let wallet = client.address();

    let weth = client.get_weth().await?;
    let usdc = client.lookup_token(TokenSymbol::Usdc).await?;

    let sell_amount = 0.001;
    let request = SwapRequest::new(weth.token(), &usdc, sell_amount)
        .with_slippage_tolerance(0.01);
    let quote = client.get_swap_quote(&request).await?;
    println!("1 USDC costs {} WETH ({} transactions)", quote.price, quote.txs.len());

    if std::env::var("EXECUTE").as_deref() != Ok("1") {
        return Ok(());
    }

    // Wrap the ETH we are about to sell, then run the swap
    let mut txs = vec![weth.deposit_eth(sell_amount).with_from(wallet)];
    txs.extend(quote.txs.into_iter().map(|tx| tx.with_from(wallet)));

    let receipts = client.send_multi_transaction(txs).await?;
    for receipt in receipts {
        println!("{} (success: {})", receipt.transaction_hash, receipt.status());
    }
    println!("USDC balance: {}", client.balance_of_float(&usdc, wallet).await?);

    client.close();
    Ok(())
}
