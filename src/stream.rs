//! Streaming price updates over WebSocket
//!
//! One connection carries any number of subscriptions. A single reader task
//! owns the socket's read half and routes every frame: replies go to the
//! request waiting on their `id`, notifications go to the channel of their
//! subscription id. A subscription's route is installed by the reader when it
//! sees the `eth_subscribe` reply, so no notification that follows the reply
//! can be missed.

use crate::client::EulithClient;
use crate::error::{Error, Result, RpcError};
use crate::rpc::JsonRpcRequest;
use crate::signer::DigestSigner;
use alloy::primitives::Address;
use futures::stream::{SplitSink, Stream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// What a subscription listens to
///
/// [`Subscription::next`] and its [`Stream`] impl only yield payloads that
/// carry a `price`. Other feeds (e.g. pending transactions) are read with
/// [`Subscription::next_raw`] or [`Subscription::into_raw`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionRequest {
    /// Stream kind
    pub subscription_type: String,
    /// Kind-specific arguments
    pub args: Value,
}

impl SubscriptionRequest {
    /// Any stream kind the service offers
    pub fn new(subscription_type: impl Into<String>, args: Value) -> Self {
        Self { subscription_type: subscription_type.into(), args }
    }

    /// Price updates of a Uniswap v3 pool
    pub fn uni_v3_pool_price(pool: Address) -> Self {
        Self {
            subscription_type: "uni_v3_pool_price".to_string(),
            args: serde_json::json!({ "pool_address": pool }),
        }
    }
}

/// One price notification
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    /// Pool price
    pub price: f64,
    /// Block the price was observed in
    pub block_number: Option<u64>,
    /// Full notification payload
    pub raw: Value,
}

impl PriceUpdate {
    /// Read a notification payload; `None` if it carries no price
    pub fn from_payload(raw: Value) -> Option<Self> {
        let price = raw.get("price").and_then(number)?;
        let block_number = raw.get("block_number").and_then(integer);
        Some(Self { price, block_number, raw })
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn integer(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        },
        _ => None,
    }
}

fn subscription_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

enum Pending {
    Call(oneshot::Sender<Result<Value>>),
    Subscribe {
        reply: oneshot::Sender<Result<String>>,
        updates: mpsc::UnboundedSender<Value>,
    },
}

#[derive(Default)]
struct Router {
    pending: HashMap<u64, Pending>,
    routes: HashMap<String, mpsc::UnboundedSender<Value>>,
    closed: bool,
}

impl Router {
    fn dispatch(&mut self, frame: &str) {
        let message: Value = match serde_json::from_str(frame) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "ignoring malformed price stream frame");
                return;
            }
        };

        if let Some(id) = message.get("id").and_then(Value::as_u64) {
            self.reply(id, message);
            return;
        }

        match notification(&message) {
            Some((sub, payload)) => match self.routes.get(&sub) {
                Some(route) => {
                    if route.send(payload).is_err() {
                        debug!(subscription = %sub, "subscriber went away");
                        self.routes.remove(&sub);
                    }
                }
                None => debug!(subscription = %sub, "dropping update for unknown subscription"),
            },
            None => debug!(%frame, "ignoring unrecognized price stream frame"),
        }
    }

    fn reply(&mut self, id: u64, mut message: Value) {
        let Some(pending) = self.pending.remove(&id) else {
            debug!(id, "reply to unknown request");
            return;
        };

        let outcome = match message.get_mut("error").map(Value::take) {
            Some(err) if !err.is_null() => Err(Error::Rpc(
                serde_json::from_value::<RpcError>(err.clone())
                    .unwrap_or_else(|_| RpcError::from_message(err.to_string())),
            )),
            _ => Ok(message.get_mut("result").map(Value::take).unwrap_or(Value::Null)),
        };

        match pending {
            Pending::Call(reply) => {
                let _ = reply.send(outcome);
            }
            Pending::Subscribe { reply, updates } => {
                let outcome = outcome.map(|id| subscription_key(&id));
                if let Ok(sub) = &outcome {
                    self.routes.insert(sub.clone(), updates);
                }
                let _ = reply.send(outcome);
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.routes.clear();
        for (_, pending) in self.pending.drain() {
            let err = || Error::rpc("price stream closed");
            match pending {
                Pending::Call(reply) => {
                    let _ = reply.send(Err(err()));
                }
                Pending::Subscribe { reply, .. } => {
                    let _ = reply.send(Err(err()));
                }
            }
        }
    }
}

/// Subscription id and payload of a notification frame
fn notification(message: &Value) -> Option<(String, Value)> {
    if message.get("method").and_then(Value::as_str) == Some("eth_subscription") {
        let params = message.get("params")?;
        let sub = subscription_key(params.get("subscription")?);
        return Some((sub, params.get("result").cloned().unwrap_or(Value::Null)));
    }

    // Older servers push `{"result": {"subscription": id, "data": {...}}}`.
    let result = message.get("result")?;
    let sub = subscription_key(result.get("subscription")?);
    Some((sub, result.get("data").cloned().unwrap_or(Value::Null)))
}

/// A live subscription
///
/// Yields updates until the subscription is cancelled or the connection
/// closes. Implements [`Stream`].
#[derive(Debug)]
pub struct Subscription {
    id: String,
    updates: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    /// Server-assigned subscription id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next raw notification payload
    pub async fn next_raw(&mut self) -> Option<Value> {
        self.updates.recv().await
    }

    /// Every notification payload as a stream, priced or not
    pub fn into_raw(self) -> impl Stream<Item = Value> + Send + Unpin {
        Box::pin(futures::stream::unfold(self.updates, |mut updates| async move {
            updates.recv().await.map(|raw| (raw, updates))
        }))
    }

    /// Next price update; payloads without a price are skipped
    pub async fn next(&mut self) -> Option<PriceUpdate> {
        loop {
            let raw = self.updates.recv().await?;
            match PriceUpdate::from_payload(raw) {
                Some(update) => return Some(update),
                None => debug!(subscription = %self.id, "notification without a price"),
            }
        }
    }
}

impl Stream for Subscription {
    type Item = PriceUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.updates.poll_recv(cx) {
                Poll::Ready(Some(raw)) => {
                    if let Some(update) = PriceUpdate::from_payload(raw) {
                        return Poll::Ready(Some(update));
                    }
                }
                other => return other.map(|_| None),
            }
        }
    }
}

/// WebSocket connection carrying price subscriptions
pub struct PriceStream {
    sink: tokio::sync::Mutex<WsSink>,
    router: Arc<Mutex<Router>>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for PriceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceStream").finish_non_exhaustive()
    }
}

impl PriceStream {
    /// Open a connection authenticated with a bearer token
    pub async fn connect(ws_url: &Url, token: &str) -> Result<Self> {
        let mut request = ws_url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::Config(format!("invalid access token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, _) = tokio_tungstenite::connect_async(request).await?;
        let (sink, mut source) = ws.split();
        info!(url = %ws_url, "price stream connected");

        let router = Arc::new(Mutex::new(Router::default()));
        let reader = tokio::spawn({
            let router = Arc::clone(&router);
            async move {
                while let Some(frame) = source.next().await {
                    match frame {
                        Ok(Message::Text(text)) => lock(&router).dispatch(text.as_str()),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(%err, "price stream read failed");
                            break;
                        }
                    }
                }
                info!("price stream closed");
                lock(&router).close();
            }
        });

        Ok(Self {
            sink: tokio::sync::Mutex::new(sink),
            router,
            next_id: AtomicU64::new(1),
            reader,
        })
    }

    async fn send<P: Serialize>(&self, method: &str, params: P, pending: Pending) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        {
            let mut router = lock(&self.router);
            if router.closed {
                return Err(Error::rpc("price stream closed"));
            }
            router.pending.insert(id, pending);
        }

        if let Err(err) = self.sink.lock().await.send(Message::Text(frame.into())).await {
            lock(&self.router).pending.remove(&id);
            return Err(err.into());
        }
        Ok(())
    }

    /// Start a subscription and wait for the server to acknowledge it
    pub async fn subscribe(&self, request: &SubscriptionRequest) -> Result<Subscription> {
        let (reply, acked) = oneshot::channel();
        let (updates, receiver) = mpsc::unbounded_channel();

        self.send("eth_subscribe", (request,), Pending::Subscribe { reply, updates }).await?;
        let id = acked.await.map_err(|_| Error::rpc("price stream closed"))??;

        debug!(subscription = %id, kind = %request.subscription_type, "subscribed");
        Ok(Subscription { id, updates: receiver })
    }

    /// Cancel a subscription; returns the server's acknowledgement
    pub async fn unsubscribe(&self, subscription: Subscription) -> Result<bool> {
        lock(&self.router).routes.remove(&subscription.id);

        let (reply, acked) = oneshot::channel();
        self.send("eth_unsubscribe", (&subscription.id,), Pending::Call(reply)).await?;
        let result = acked.await.map_err(|_| Error::rpc("price stream closed"))??;
        Ok(result.as_bool().unwrap_or(false))
    }

    /// Close the connection
    pub async fn close(self) -> Result<()> {
        self.sink.lock().await.close().await?;
        Ok(())
    }
}

impl Drop for PriceStream {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn lock(router: &Mutex<Router>) -> std::sync::MutexGuard<'_, Router> {
    router.lock().unwrap_or_else(|e| e.into_inner())
}

/// WebSocket endpoint matching an HTTP service endpoint
pub fn websocket_url(endpoint: &Url) -> Result<Url> {
    let mut url = endpoint.clone();
    let scheme = match endpoint.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(Error::Config(format!("unsupported endpoint scheme: {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Config(format!("cannot derive websocket url from {endpoint}")))?;
    Ok(url)
}

impl<S: DigestSigner> EulithClient<S> {
    /// Open a price stream on this client's endpoint with its current token
    pub async fn price_stream(&self) -> Result<PriceStream> {
        self.ensure_valid_api_token().await?;
        let url = websocket_url(self.transport().endpoint())?;
        PriceStream::connect(&url, &self.transport().auth().bearer()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn routes_notifications_after_ack() {
        let mut router = Router::default();
        let (reply, mut acked) = oneshot::channel();
        let (updates, mut receiver) = mpsc::unbounded_channel();
        router.pending.insert(1, Pending::Subscribe { reply, updates });

        router.dispatch(r#"{"jsonrpc":"2.0","id":1,"result":"0xabc"}"#);
        router.dispatch(
            r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"0xabc","result":{"price":1850.25,"block_number":17000000}}}"#,
        );
        router.dispatch(r#"{"result":{"subscription":"0xabc","data":{"price":"1851.0","block_number":"0x1036640"}}}"#);
        router.dispatch(r#"{"method":"eth_subscription","params":{"subscription":"0xdef","result":{"price":1}}}"#);

        assert_eq!(acked.try_recv().unwrap().unwrap(), "0xabc");

        let first = PriceUpdate::from_payload(receiver.try_recv().unwrap()).unwrap();
        assert_eq!(first.price, 1850.25);
        assert_eq!(first.block_number, Some(17_000_000));

        let second = PriceUpdate::from_payload(receiver.try_recv().unwrap()).unwrap();
        assert_eq!(second.price, 1851.0);
        assert_eq!(second.block_number, Some(17_000_000));

        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn error_reply_fails_subscribe() {
        let mut router = Router::default();
        let (reply, mut acked) = oneshot::channel();
        let (updates, _receiver) = mpsc::unbounded_channel();
        router.pending.insert(7, Pending::Subscribe { reply, updates });

        router.dispatch(r#"{"id":7,"error":{"code":-32602,"message":"unknown pool"}}"#);

        let err = acked.try_recv().unwrap().unwrap_err();
        assert_eq!(err.as_rpc().unwrap().message, "unknown pool");
        assert!(router.routes.is_empty());
    }

    #[test]
    fn close_fails_pending_requests() {
        let mut router = Router::default();
        let (reply, mut acked) = oneshot::channel();
        router.pending.insert(2, Pending::Call(reply));
        router.close();
        assert!(acked.try_recv().unwrap().is_err());
        assert!(router.closed);
    }

    #[tokio::test]
    async fn unpriced_payloads_stay_readable_raw() {
        let (updates, receiver) = mpsc::unbounded_channel();
        let subscription = Subscription { id: "0xtx".to_string(), updates: receiver };
        let pending_tx = json!({ "from": "0x47256a41027e94d1141dd06f05dcb3dde0421551", "value": "0x1" });
        updates.send(pending_tx.clone()).unwrap();
        updates.send(json!({ "price": 2.0 })).unwrap();
        drop(updates);

        let raw: Vec<Value> = subscription.into_raw().collect().await;
        assert_eq!(raw, vec![pending_tx, json!({ "price": 2.0 })]);
    }

    #[test]
    fn generic_request_shape() {
        let request = SubscriptionRequest::new("pending_transactions", json!({}));
        let value = serde_json::to_value(request).unwrap();
        assert_eq!(value["subscription_type"], "pending_transactions");
    }

    #[test]
    fn websocket_url_follows_scheme() {
        let url = Url::parse("https://eth-main.eulithrpc.com/v0?auth_address=0x1").unwrap();
        assert_eq!(websocket_url(&url).unwrap().as_str(), "wss://eth-main.eulithrpc.com/v0?auth_address=0x1");
        let url = Url::parse("http://localhost:7777/v0").unwrap();
        assert_eq!(websocket_url(&url).unwrap().scheme(), "ws");
    }

    #[test]
    fn pool_price_request_shape() {
        let pool = Address::repeat_byte(0x88);
        let value = serde_json::to_value(SubscriptionRequest::uni_v3_pool_price(pool)).unwrap();
        assert_eq!(value["subscription_type"], "uni_v3_pool_price");
        assert_eq!(value["args"]["pool_address"], json!(pool));
    }
}
