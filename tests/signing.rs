mod common;

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::network::TransactionBuilder;
use alloy::primitives::{address, Address, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use common::{script_fee_market, MockService};
use serde_json::json;

const RECIPIENT: Address = address!("Fc11E697f23E5CbBeD3c59aC249955da57e57672");

fn sent_raw(mock: &MockService) -> TxEnvelope {
    let calls = mock.calls_to("eth_sendRawTransaction");
    assert_eq!(calls.len(), 1);
    let raw: Bytes = serde_json::from_value(calls[0].params[0].clone()).unwrap();
    TxEnvelope::decode_2718(&mut raw.as_ref()).unwrap()
}

fn signer_of(envelope: &TxEnvelope) -> Address {
    match envelope {
        TxEnvelope::Eip1559(signed) => {
            signed.signature().recover_address_from_prehash(&signed.signature_hash()).unwrap()
        }
        TxEnvelope::Legacy(signed) => {
            signed.signature().recover_address_from_prehash(&signed.signature_hash()).unwrap()
        }
        other => panic!("unexpected envelope: {other:?}"),
    }
}

#[tokio::test]
async fn own_transactions_are_signed_and_sent_raw() {
    let mock = MockService::start().await;
    script_fee_market(&mock);
    mock.on_result("eth_sendRawTransaction", json!(format!("0x{}", "cd".repeat(32))));
    let client = mock.client().await;

    let tx = TransactionRequest::default()
        .with_from(client.address())
        .with_to(RECIPIENT)
        .with_value(U256::from(1_000u64));
    client.send_transaction(tx).await.unwrap();

    let envelope = sent_raw(&mock);
    assert_eq!(signer_of(&envelope), client.address());
    assert_eq!(envelope.nonce(), 5);
    assert_eq!(envelope.chain_id(), Some(1));
    assert_eq!(envelope.gas_limit(), 21_000);
    assert_eq!(envelope.max_fee_per_gas(), 3_000_000_000);
    assert_eq!(envelope.max_priority_fee_per_gas(), Some(1_000_000_000));
    assert_eq!(envelope.value(), U256::from(1_000u64));
    assert!(mock.calls_to("eth_sendTransaction").is_empty());
}

#[tokio::test]
async fn caller_values_are_kept() {
    let mock = MockService::start().await;
    mock.on_result("eth_sendRawTransaction", json!(format!("0x{}", "cd".repeat(32))));
    let client = mock.client().await;

    let tx = TransactionRequest::default()
        .with_from(client.address())
        .with_to(RECIPIENT)
        .with_nonce(42)
        .with_chain_id(137)
        .with_value(U256::ZERO)
        .with_gas_limit(60_000)
        .with_gas_price(30_000_000_000);
    client.send_transaction(tx).await.unwrap();

    assert_eq!(mock.methods(), vec!["eth_sendRawTransaction".to_string()]);
    let envelope = sent_raw(&mock);
    assert!(matches!(envelope, TxEnvelope::Legacy(_)));
    assert_eq!(envelope.nonce(), 42);
    assert_eq!(envelope.chain_id(), Some(137));
    assert_eq!(envelope.gas_limit(), 60_000);
    assert_eq!(signer_of(&envelope), client.address());
}

#[tokio::test]
async fn pre_london_chain_gets_a_legacy_gas_price() {
    let mock = MockService::start().await;
    mock.on_result("eth_getTransactionCount", json!("0x0"))
        .on_result("eth_chainId", json!("0x38"))
        .on_result("eth_getBlockByNumber", json!({ "number": "0x10" }))
        .on_result("eth_gasPrice", json!("0x12a05f200"))
        .on_result("eth_estimateGas", json!("0x5208"))
        .on_result("eth_sendRawTransaction", json!(format!("0x{}", "cd".repeat(32))));
    let client = mock.client().await;

    let tx = TransactionRequest::default().with_from(client.address()).with_to(RECIPIENT);
    client.send_transaction(tx).await.unwrap();

    let envelope = sent_raw(&mock);
    assert!(matches!(envelope, TxEnvelope::Legacy(_)));
    assert_eq!(envelope.gas_price(), Some(5_000_000_000));
    assert_eq!(envelope.chain_id(), Some(56));
    assert!(mock.calls_to("eth_maxPriorityFeePerGas").is_empty());
}

#[tokio::test]
async fn other_senders_pass_through_untouched() {
    let mock = MockService::start().await;
    mock.on_result("eth_sendTransaction", json!(format!("0x{}", "ef".repeat(32))));
    let client = mock.client().await;

    let other = address!("47256A41027e94d1141Dd06f05DcB3ddE0421551");
    let tx = TransactionRequest::default().with_from(other).with_to(RECIPIENT).with_value(U256::from(7u64));
    client.send_transaction(tx).await.unwrap();

    assert_eq!(mock.methods(), vec!["eth_sendTransaction".to_string()]);
    let params = &mock.calls_to("eth_sendTransaction")[0].params[0];
    assert_eq!(params["from"], json!(other));
    assert_eq!(params["value"], "0x7");
    assert!(params.get("nonce").is_none());
}

#[tokio::test]
async fn fee_cap_alone_gets_a_priority_fee() {
    let mock = MockService::start().await;
    script_fee_market(&mock);
    mock.on_result("eth_sendRawTransaction", json!(format!("0x{}", "cd".repeat(32))));
    let client = mock.client().await;

    let tx = TransactionRequest::default()
        .with_from(client.address())
        .with_to(RECIPIENT)
        .with_max_fee_per_gas(50_000_000_000);
    client.send_transaction(tx).await.unwrap();

    let envelope = sent_raw(&mock);
    assert!(matches!(envelope, TxEnvelope::Eip1559(_)));
    assert_eq!(envelope.max_fee_per_gas(), 50_000_000_000);
    assert_eq!(envelope.max_priority_fee_per_gas(), Some(1_000_000_000));
    assert_eq!(signer_of(&envelope), client.address());
    assert!(mock.calls_to("eth_getBlockByNumber").is_empty());
}

#[tokio::test]
async fn priority_fee_is_capped_by_the_fee_cap() {
    let mock = MockService::start().await;
    script_fee_market(&mock);
    mock.on_result("eth_sendRawTransaction", json!(format!("0x{}", "cd".repeat(32))));
    let client = mock.client().await;

    // Below the scripted 1 gwei tip
    let tx = TransactionRequest::default()
        .with_from(client.address())
        .with_to(RECIPIENT)
        .with_max_fee_per_gas(500_000_000);
    client.send_transaction(tx).await.unwrap();

    let envelope = sent_raw(&mock);
    assert_eq!(envelope.max_fee_per_gas(), 500_000_000);
    assert_eq!(envelope.max_priority_fee_per_gas(), Some(500_000_000));
}
