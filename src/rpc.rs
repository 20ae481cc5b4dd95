//! JSON-RPC 2.0 transport over HTTPS
//!
//! Every request goes through [`RpcTransport::request_annotated`], which runs
//! the token refresh hook, appends query annotations to the endpoint and maps
//! the response envelope into [`Result`].

use crate::auth::AuthManager;
use crate::config::ClientConfig;
use crate::error::{Error, Result, RpcError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};
use url::Url;

/// Message used when a failed response carries no `error` field
const UNKNOWN_FAILURE: &str = "request failed for unknown reason";

/// Empty positional parameter list (`[]`)
pub const NO_PARAMS: [(); 0] = [];

/// Query parameter annotations attached to a single request
pub type Annotations = [(&'static str, String)];

/// JSON-RPC request body
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

impl<'a, P> JsonRpcRequest<'a, P> {
    /// Build a request with the given id
    pub fn new(id: u64, method: &'a str, params: P) -> Self {
        Self { jsonrpc: "2.0", id, method, params }
    }
}

/// JSON-RPC response body
#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    /// Successful result, if any
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Structured error, if any
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    /// Decode the result, surfacing a non-empty `error` verbatim
    pub fn into_result<R: DeserializeOwned>(self) -> Result<R> {
        if let Some(err) = self.error {
            // The service sometimes sends `"error": ""` alongside a result.
            if err.code.is_some() || !err.message.is_empty() {
                return Err(Error::Rpc(err));
            }
        }
        let result = self.result.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(result)?)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: RpcError,
}

/// Merge query parameters into a URL, replacing keys that are already present
pub fn add_params_to_url(url: &Url, params: &Annotations) -> Url {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    for (key, value) in params {
        match pairs.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value.clone(),
            None => pairs.push((key.to_string(), value.clone())),
        }
    }

    let mut url = url.clone();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url
}

/// HTTP JSON-RPC transport bound to one service endpoint
#[derive(Debug)]
pub struct RpcTransport {
    http: reqwest::Client,
    endpoint: Url,
    auth: AuthManager,
    test_traffic: bool,
    next_id: AtomicU64,
}

impl RpcTransport {
    /// Build the HTTP client and acquire the initial access token
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let mut endpoint = config.endpoint()?;
        let auth = AuthManager::connect(
            http.clone(),
            endpoint.clone(),
            config.refresh_token.clone(),
            config.refresh_margin,
        )
        .await?;

        if config.private {
            endpoint = add_params_to_url(&endpoint, &[("private", "true".to_string())]);
        }

        Ok(Self::from_parts(http, endpoint, auth, config.is_local()))
    }

    /// Assemble a transport from an existing client and auth manager
    pub fn from_parts(http: reqwest::Client, endpoint: Url, auth: AuthManager, test_traffic: bool) -> Self {
        Self { http, endpoint, auth, test_traffic, next_id: AtomicU64::new(1) }
    }

    /// Add a query parameter sent with every request
    pub fn with_fixed_param(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.endpoint = add_params_to_url(&self.endpoint, &[(key, value.into())]);
        self
    }

    /// Endpoint including fixed query parameters
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Token manager consulted before each request
    pub const fn auth(&self) -> &AuthManager {
        &self.auth
    }

    /// Underlying HTTP client
    pub const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Send a request without annotations
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        self.request_annotated(method, params, &[]).await
    }

    /// Send a request with per-call query annotations (e.g. batch context)
    pub async fn request_annotated<P, R>(
        &self,
        method: &str,
        params: P,
        annotations: &Annotations,
    ) -> Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        self.auth.refresh_if_needed().await?;

        let url = add_params_to_url(&self.endpoint, annotations);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, annotated = !annotations.is_empty(), "rpc request");

        let mut req = self
            .http
            .post(url)
            .bearer_auth(self.auth.bearer())
            .json(&JsonRpcRequest::new(id, method, params));
        if self.test_traffic {
            req = req.header("X-Test", "true");
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        if !status.is_success() {
            let err = serde_json::from_slice::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| RpcError {
                    code: None,
                    message: UNKNOWN_FAILURE.to_string(),
                    data: Some(serde_json::json!({ "status": status.as_u16() })),
                });
            warn!(method, status = status.as_u16(), %err, "rpc request failed");
            return Err(Error::Rpc(err));
        }

        let envelope: JsonRpcResponse = serde_json::from_slice(&body)?;
        envelope.into_result()
    }
}
