//! Client configuration for the Eulith SDK

use crate::error::{Error, Result};
use std::time::Duration;
use url::Url;

/// Ethereum mainnet endpoint
pub const ETH_MAINNET_URL: &str = "https://eth-main.eulithrpc.com/v0";
/// Polygon mainnet endpoint
pub const POLYGON_MAINNET_URL: &str = "https://poly-main.eulithrpc.com/v0";
/// Arbitrum One endpoint
pub const ARBITRUM_MAINNET_URL: &str = "https://arb-main.eulithrpc.com/v0";

/// Default timeout applied to every HTTP request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Tokens with less remaining lifetime than this are refreshed before use
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(6 * 60 * 60);

/// Configuration for an [`EulithClient`](crate::EulithClient)
#[derive(Clone)]
pub struct ClientConfig {
    /// Service endpoint, e.g. `https://eth-main.eulithrpc.com/v0`
    pub url: String,
    /// Long-lived refresh credential exchanged for access tokens
    pub refresh_token: String,
    /// Timeout for every HTTP request
    pub request_timeout: Duration,
    /// Refresh the access token once its remaining lifetime drops below this
    pub refresh_margin: Duration,
    /// Route transactions privately (`private=true`)
    pub private: bool,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("refresh_token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("refresh_margin", &self.refresh_margin)
            .field("private", &self.private)
            .finish()
    }
}

impl ClientConfig {
    /// Create a configuration for an endpoint and refresh credential
    pub fn new(url: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            refresh_token: refresh_token.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            private: false,
        }
    }

    /// Ethereum mainnet configuration
    pub fn mainnet(refresh_token: impl Into<String>) -> Self {
        Self::new(ETH_MAINNET_URL, refresh_token)
    }

    /// Polygon mainnet configuration
    pub fn polygon(refresh_token: impl Into<String>) -> Self {
        Self::new(POLYGON_MAINNET_URL, refresh_token)
    }

    /// Arbitrum One configuration
    pub fn arbitrum(refresh_token: impl Into<String>) -> Self {
        Self::new(ARBITRUM_MAINNET_URL, refresh_token)
    }

    /// Load configuration from the environment (and a `.env` file, if present)
    ///
    /// Reads `EULITH_REFRESH_TOKEN` (required) and `EULITH_URL` (defaults to
    /// Ethereum mainnet).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let refresh_token = std::env::var("EULITH_REFRESH_TOKEN")
            .map_err(|_| Error::Config("EULITH_REFRESH_TOKEN must be set".into()))?;
        let url = std::env::var("EULITH_URL").unwrap_or_else(|_| ETH_MAINNET_URL.to_string());

        let config = Self::new(url, refresh_token);
        config.endpoint()?;
        Ok(config)
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the token refresh margin
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Enable private transaction routing
    pub fn with_private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    /// Parsed endpoint URL
    pub fn endpoint(&self) -> Result<Url> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(Error::Config(format!("unsupported endpoint scheme: {other}"))),
        }
    }

    /// Whether requests should be marked as test traffic (`X-Test: true`)
    pub fn is_local(&self) -> bool {
        self.endpoint()
            .ok()
            .and_then(|url| url.host_str().map(is_local_host))
            .unwrap_or(false)
    }
}

fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::mainnet("refresh");
        assert_eq!(config.url, ETH_MAINNET_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.refresh_margin, Duration::from_secs(21600));
        assert!(!config.private);
        assert!(!config.is_local());
    }

    #[test]
    fn local_endpoints_are_test_traffic() {
        assert!(ClientConfig::new("http://localhost:7777/v0", "r").is_local());
        assert!(ClientConfig::new("http://127.0.0.1:7777/v0", "r").is_local());
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let config = ClientConfig::new("wss://eth-main.eulithrpc.com/v0", "r");
        assert!(matches!(config.endpoint(), Err(Error::Config(_))));
    }

    #[test]
    fn debug_hides_refresh_token() {
        let config = ClientConfig::mainnet("super-secret");
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}
