//! Stream WETH/USDC prices from the 0.05% Uniswap v3 pool
//!
//! Run with: cargo run --example price_stream
//!
//! Requires EULITH_REFRESH_TOKEN and PRIVATE_KEY environment variables

use eulith_sdk::{
    ClientConfig, EulithClient, LocalSigner, PoolLookupRequest, SubscriptionRequest, TokenSymbol,
    UniswapPoolFee,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let signer = LocalSigner::from_private_key(std::env::var("PRIVATE_KEY")?)?;
    let client = EulithClient::new(ClientConfig::from_env()?, signer).await?;

    let weth = client.lookup_token(TokenSymbol::Weth).await?;
    let usdc = client.lookup_token(TokenSymbol::Usdc).await?;
    let pool = client
        .get_univ3_pool(&PoolLookupRequest {
            token_a: weth.address(),
            token_b: usdc.address(),
            fee: UniswapPoolFee::FiveBips,
        })
        .await?;
    println!("Pool {} ({} / {})", pool.address, pool.token_zero, pool.token_one);

    let stream = client.price_stream().await?;
    let mut prices = stream
        .subscribe(&SubscriptionRequest::uni_v3_pool_price(pool.address))
        .await?;

    println!("block_number,price");
    for _ in 0..20 {
        let Some(update) = prices.next().await else { break };
        println!("{},{}", update.block_number.unwrap_or_default(), update.price);
    }

    stream.unsubscribe(prices).await?;
    stream.close().await?;
    Ok(())
}
