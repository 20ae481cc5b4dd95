//! In-process mock of the Eulith HTTP service
//!
//! Serves the token exchange at `/v0/api/access` and JSON-RPC at `/v0`,
//! records every RPC request and answers from per-method scripts. A script
//! with several replies is consumed in order; the last reply repeats.

#![allow(dead_code)]

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use eulith_sdk::{ClientConfig, EulithClient, LocalSigner, ReceiptPolling};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Anvil's first dev account
pub const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub params: Value,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
    pub test_header: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Reply {
    Result(Value),
    Error(Value),
    Http(u16, String),
}

#[derive(Default)]
struct Inner {
    calls: Mutex<Vec<Recorded>>,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    tokens: Mutex<VecDeque<Reply>>,
    token_requests: AtomicUsize,
}

#[derive(Clone)]
pub struct MockService {
    pub url: String,
    inner: Arc<Inner>,
}

pub fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

impl MockService {
    pub async fn start() -> Self {
        let inner = Arc::new(Inner::default());
        let app = Router::new()
            .route("/v0", post(rpc))
            .route("/v0/api/access", get(access))
            .with_state(Arc::clone(&inner));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { url: format!("http://{addr}/v0"), inner }
    }

    /// Script replies for a method
    pub fn on(&self, method: &str, replies: impl IntoIterator<Item = Reply>) -> &Self {
        self.inner
            .scripts
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .extend(replies);
        self
    }

    pub fn on_result(&self, method: &str, result: Value) -> &Self {
        self.on(method, [Reply::Result(result)])
    }

    /// Script token exchange replies; unscripted exchanges return a day-long token
    pub fn on_token(&self, replies: impl IntoIterator<Item = Reply>) -> &Self {
        self.inner.tokens.lock().unwrap().extend(replies);
        self
    }

    pub fn token_requests(&self) -> usize {
        self.inner.token_requests.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Recorded> {
        self.calls().into_iter().filter(|c| c.method == method).collect()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.method).collect()
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(&self.url, "refresh-credential")
    }

    pub async fn client(&self) -> EulithClient<LocalSigner> {
        self.client_with(self.config()).await
    }

    pub async fn client_with(&self, config: ClientConfig) -> EulithClient<LocalSigner> {
        let signer = LocalSigner::from_private_key(DEV_KEY).unwrap();
        EulithClient::new(config, signer)
            .await
            .unwrap()
            .with_receipt_polling(ReceiptPolling { interval: Duration::from_millis(10), attempts: 5 })
    }
}

fn next_reply(queue: Option<&mut VecDeque<Reply>>) -> Option<Reply> {
    let queue = queue?;
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

async fn access(State(inner): State<Arc<Inner>>, headers: HeaderMap) -> Response {
    let n = inner.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
    assert_eq!(
        headers.get("authorization").and_then(|v| v.to_str().ok()),
        Some("Bearer refresh-credential")
    );

    let reply = inner.tokens.lock().unwrap().pop_front();
    match reply {
        Some(Reply::Result(body)) => Json(body).into_response(),
        Some(Reply::Http(status, body)) => {
            (StatusCode::from_u16(status).unwrap(), body).into_response()
        }
        Some(Reply::Error(body)) => (StatusCode::BAD_REQUEST, Json(body)).into_response(),
        None => Json(json!({ "token": format!("access-{n}"), "exp": now() + 86_400 })).into_response(),
    }
}

async fn rpc(
    State(inner): State<Arc<Inner>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    let method = body["method"].as_str().unwrap_or_default().to_string();
    let id = body["id"].clone();

    inner.calls.lock().unwrap().push(Recorded {
        method: method.clone(),
        params: body["params"].clone(),
        query,
        authorization: header("authorization"),
        test_header: header("x-test"),
    });

    let reply = next_reply(inner.scripts.lock().unwrap().get_mut(&method));
    match reply {
        Some(Reply::Result(result)) => Json(json!({ "jsonrpc": "2.0", "id": id, "result": result })).into_response(),
        Some(Reply::Error(error)) => Json(json!({ "jsonrpc": "2.0", "id": id, "error": error })).into_response(),
        Some(Reply::Http(status, body)) => (StatusCode::from_u16(status).unwrap(), body).into_response(),
        None => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": format!("method not found: {method}") }
        }))
        .into_response(),
    }
}

/// A minimal successful receipt for `hash`
pub fn receipt(hash: &str, from: &str) -> Value {
    json!({
        "type": "0x2",
        "status": "0x1",
        "cumulativeGasUsed": "0x5208",
        "logs": [],
        "logsBloom": format!("0x{}", "00".repeat(256)),
        "transactionHash": hash,
        "transactionIndex": "0x0",
        "blockHash": format!("0x{}", "11".repeat(32)),
        "blockNumber": "0x10",
        "gasUsed": "0x5208",
        "effectiveGasPrice": "0x3b9aca00",
        "from": from,
        "to": "0xfc11e697f23e5cbbed3c59ac249955da57e57672",
        "contractAddress": null
    })
}

/// Chain reads the signing path needs for an EIP-1559 transaction
pub fn script_fee_market(mock: &MockService) {
    mock.on_result("eth_getTransactionCount", json!("0x5"))
        .on_result("eth_chainId", json!("0x1"))
        .on_result("eth_getBlockByNumber", json!({ "number": "0x10", "baseFeePerGas": "0x3b9aca00" }))
        .on_result("eth_maxPriorityFeePerGas", json!("0x3b9aca00"))
        .on_result("eth_estimateGas", json!("0x5208"));
}
