//! Error types for the Eulith SDK
//!
//! Every fallible operation returns [`Result`]. Nothing in this crate retries;
//! errors carry the server's message verbatim where one was available.

use serde::Deserialize;
use std::fmt;

/// Result type for SDK operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the SDK
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Network failure, timeout or unreadable response body
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The refresh credential was rejected during token exchange
    #[error("auth error: status {status}, message: {message}")]
    Auth {
        /// HTTP status returned by the token endpoint
        status: u16,
        /// Response body
        message: String,
    },

    /// The service returned a structured error
    #[error("RPC error: {0}")]
    Rpc(RpcError),

    /// A signature could not be produced or does not recover to the signer
    #[error("signing error: {0}")]
    Signing(String),

    /// An atomic-session operation was invoked from the wrong state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A polled condition (e.g. a transaction receipt) did not occur in time
    #[error("timed out: {0}")]
    Timeout(String),

    /// Missing or malformed configuration
    #[error("config error: {0}")]
    Config(String),

    /// Response did not match the expected shape
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Malformed URL
    #[error(transparent)]
    Url(#[from] url::ParseError),

    /// WebSocket failure on the price stream
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Shorthand for an [`Error::Rpc`] carrying only a message
    pub fn rpc(message: impl Into<String>) -> Self {
        Self::Rpc(RpcError::from_message(message))
    }

    /// Shorthand for [`Error::Signing`]
    pub fn signing(message: impl fmt::Display) -> Self {
        Self::Signing(message.to_string())
    }

    /// The RPC error payload, if this is an [`Error::Rpc`]
    pub fn as_rpc(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(err) => Some(err),
            _ => None,
        }
    }
}

/// Structured error payload returned by the service
///
/// The service sends either a JSON-RPC error object or a bare string; both
/// decode into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    /// JSON-RPC error code, when the service sent one
    pub code: Option<i64>,
    /// Human readable message, unchanged from the response
    pub message: String,
    /// Additional payload, e.g. the policy rule that rejected a batched call
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Error with only a message
    pub fn from_message(message: impl Into<String>) -> Self {
        Self { code: None, message: message.into(), data: None }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl<'de> Deserialize<'de> for RpcError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Message(String),
            Object {
                #[serde(default)]
                code: Option<i64>,
                message: String,
                #[serde(default)]
                data: Option<serde_json::Value>,
            },
            Other(serde_json::Value),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Message(message) => Self::from_message(message),
            Repr::Object { code, message, data } => Self { code, message, data },
            Repr::Other(value) => Self::from_message(value.to_string()),
        })
    }
}
