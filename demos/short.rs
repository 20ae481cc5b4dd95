//! Open a leveraged WETH short against USDC collateral
//!
//! Run with: cargo run --example short
//!
//! Requires EULITH_REFRESH_TOKEN and PRIVATE_KEY environment variables

use alloy::network::TransactionBuilder;
use eulith_sdk::{ClientConfig, EulithClient, LocalSigner, ShortOnRequest, TokenSymbol};
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

    let toolkit = client.ensure_toolkit_contract(wallet).await?;
    let usdc = client.lookup_token(TokenSymbol::Usdc).await?;
    let weth = client.lookup_token(TokenSymbol::Weth).await?;

    let collateral = 5.0;
    if client.balance_of_float(&usdc, toolkit).await? < collateral * 1.05 {
        println!("Funding the toolkit contract...");
        let fund = usdc
            .transfer_float(toolkit, collateral * 1.05)
            .with_from(wallet)
            .with_gas_limit(100_000);
        let hash = client.send_transaction(fund).await?;
        client.wait_for_receipt(hash).await?;
    }

    let batch = client.start_atomic_transaction(None)?;
    let request = ShortOnRequest {
        collateral_token: usdc.address(),
        short_token: weth.address(),
        collateral_amount: collateral,
    };
    let leverage = match client.short_on(&batch, &request).await {
        Ok(leverage) => leverage,
        Err(err) => {
            client.rollback_atomic_transaction(batch).await?;
            return Err(err.into());
        }
    };
    println!("Short leverage: {leverage}");

    let tx = client
        .commit_atomic_transaction(batch)
        .await?
        .with_from(wallet)
        .with_gas_limit(1_000_000);
    let hash = client.send_transaction(tx).await?;
    client.wait_for_receipt(hash).await?;
    println!("Short tx hash: {hash}");

    client.close();
    Ok(())
}
