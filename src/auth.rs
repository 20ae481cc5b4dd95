//! Access token acquisition and refresh
//!
//! The service authenticates every request with a short-lived bearer token that
//! is obtained by exchanging a long-lived refresh credential. [`AuthManager`]
//! owns the current token and is consulted by the transport before every
//! outbound request, so callers never refresh by hand.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

/// Path of the token exchange, relative to the service endpoint
const ACCESS_PATH: &str = "v0/api/access";

/// Source of the current unix time in seconds
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    })
}

/// Short-lived bearer token
#[derive(Clone, Deserialize)]
pub struct AccessToken {
    /// Bearer token value
    pub token: String,
    /// Expiry as a unix timestamp (seconds)
    #[serde(rename = "exp")]
    pub expires_at: u64,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    /// Remaining lifetime at `now` (zero once expired)
    pub fn expires_in(&self, now: u64) -> Duration {
        Duration::from_secs(self.expires_at.saturating_sub(now))
    }

    /// Whether the remaining lifetime at `now` is below `margin`
    pub fn is_near_expiry(&self, now: u64, margin: Duration) -> bool {
        self.expires_in(now) < margin
    }
}

/// Exchange a refresh credential for an access token
///
/// Issues `GET <endpoint>/v0/api/access` authenticated with the refresh
/// credential. A 4xx response means the credential was rejected.
pub async fn acquire_token(
    http: &reqwest::Client,
    endpoint: &Url,
    refresh_token: &str,
) -> Result<AccessToken> {
    let url = endpoint.join(ACCESS_PATH)?;

    let resp = http
        .get(url)
        .bearer_auth(refresh_token)
        .header("Content-Type", "application/json")
        .send()
        .await?;

    let status = resp.status();
    if status.is_client_error() {
        let message = resp.text().await.unwrap_or_default();
        return Err(Error::Auth { status: status.as_u16(), message });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::rpc(format!("status: {}, message: {}", status.as_u16(), body)));
    }

    let body = resp.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Holds the active access token and refreshes it when it nears expiry
pub struct AuthManager {
    http: reqwest::Client,
    endpoint: Url,
    refresh_token: String,
    token: RwLock<AccessToken>,
    margin: Duration,
    clock: Clock,
    // Serializes refreshes so concurrent callers trigger a single exchange.
    refreshing: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("endpoint", &self.endpoint.as_str())
            .field("margin", &self.margin)
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    /// Acquire an initial token and build the manager
    pub async fn connect(
        http: reqwest::Client,
        endpoint: Url,
        refresh_token: impl Into<String>,
        margin: Duration,
    ) -> Result<Self> {
        Self::connect_with_clock(http, endpoint, refresh_token, margin, system_clock()).await
    }

    /// Like [`AuthManager::connect`], with an explicit time source
    pub async fn connect_with_clock(
        http: reqwest::Client,
        endpoint: Url,
        refresh_token: impl Into<String>,
        margin: Duration,
        clock: Clock,
    ) -> Result<Self> {
        let refresh_token = refresh_token.into();
        let token = acquire_token(&http, &endpoint, &refresh_token).await?;
        tracing::info!(expires_at = token.expires_at, "acquired access token");

        Ok(Self {
            http,
            endpoint,
            refresh_token,
            token: RwLock::new(token),
            margin,
            clock,
            refreshing: tokio::sync::Mutex::new(()),
        })
    }

    /// Current bearer token value
    pub fn bearer(&self) -> String {
        self.read_token().token
    }

    /// Snapshot of the current token
    pub fn token(&self) -> AccessToken {
        self.read_token()
    }

    /// Whether the current token's remaining lifetime is below the margin
    pub fn is_near_expiry(&self) -> bool {
        self.read_token().is_near_expiry((self.clock)(), self.margin)
    }

    /// Exchange the refresh credential for a new token, unconditionally
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.refreshing.lock().await;
        self.refresh_locked().await
    }

    /// Refresh the token when it is near expiry; returns whether it did
    pub async fn refresh_if_needed(&self) -> Result<bool> {
        if !self.is_near_expiry() {
            return Ok(false);
        }

        let _guard = self.refreshing.lock().await;
        // Another caller may have refreshed while we waited.
        if !self.is_near_expiry() {
            return Ok(false);
        }
        self.refresh_locked().await?;
        Ok(true)
    }

    async fn refresh_locked(&self) -> Result<()> {
        let token = acquire_token(&self.http, &self.endpoint, &self.refresh_token).await?;
        tracing::info!(expires_at = token.expires_at, "refreshed access token");
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = token;
        Ok(())
    }

    fn read_token(&self) -> AccessToken {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
