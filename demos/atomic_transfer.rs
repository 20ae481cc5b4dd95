//! Two ETH transfers executed as one atomic transaction
//!
//! Run with: cargo run --example atomic_transfer
//!
//! Requires EULITH_REFRESH_TOKEN and PRIVATE_KEY environment variables

use alloy::network::TransactionBuilder;
use alloy::primitives::{address, utils::format_ether, U256};
use alloy::rpc::types::TransactionRequest;
use eulith_sdk::{ClientConfig, EulithClient, LocalSigner};
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
    println!("Toolkit contract: {toolkit}");

    let amount = U256::from(100_000_000_000_000u64); // 0.0001 ETH each
    let recipients = [
        address!("Fc11E697f23E5CbBeD3c59aC249955da57e57672"),
        address!("47256A41027e94d1141Dd06f05DcB3ddE0421551"),
    ];

    let needed = amount * U256::from(recipients.len()) + U256::from(2_000_000_000_000_000u64);
    let balance = client.get_balance(wallet).await?;
    if balance < needed {
        eyre::bail!("insufficient balance: fund {wallet} with at least {} ETH", format_ether(needed));
    }

    let batch = client.start_atomic_transaction(None)?;
    for to in recipients {
        let tx = TransactionRequest::default().with_from(wallet).with_to(to).with_value(amount);
        client.atomic().submit(&batch, tx).await?;
    }
    let combined = client.commit_atomic_transaction(batch).await?;

    println!("Sending atomic transaction and waiting for receipt...");
    let tx_hash = client.send_transaction(combined.with_from(wallet)).await?;
    let receipt = client.wait_for_receipt(tx_hash).await?;
    println!("Mined in block {:?}: {tx_hash}", receipt.block_number);

    client.close();
    Ok(())
}
