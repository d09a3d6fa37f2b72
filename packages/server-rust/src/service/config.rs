use std::time::Duration;

/// Runtime configuration for the invocation layer.
///
/// Controls timeouts, concurrency limits, collaborator endpoints and token
/// issuance. Built directly in tests and from CLI flags by `relay-probe`.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Identifier of this node, attached to request spans.
    pub node_id: String,
    /// Timeout for a single live remote call in milliseconds. Expiry counts
    /// as a transport failure and triggers the fallback.
    pub live_call_timeout_ms: u64,
    /// Lifetime of a request scope in milliseconds. Expiry tears the whole
    /// request context down.
    pub request_timeout_ms: u64,
    /// Maximum number of concurrent invocations before load shedding.
    pub max_concurrent_invocations: u32,
    /// Base URL of the inventory service backing the stock contract.
    pub inventory_base_url: String,
    /// Base URL of the identity provider API.
    pub identity_base_url: String,
    /// `User-Agent` sent to the identity provider.
    pub user_agent: String,
    /// HMAC secret used to sign locally issued bearer tokens.
    pub token_secret: String,
    /// Access token lifetime in seconds.
    pub access_token_ttl_secs: u64,
    /// Refresh token lifetime in seconds.
    pub refresh_token_ttl_secs: u64,
}

impl RelayConfig {
    #[must_use]
    pub fn live_call_timeout(&self) -> Duration {
        Duration::from_millis(self.live_call_timeout_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            live_call_timeout_ms: 2_000,
            request_timeout_ms: 30_000,
            max_concurrent_invocations: 1000,
            inventory_base_url: "http://localhost:8082".to_string(),
            identity_base_url: "https://api.github.com".to_string(),
            user_agent: "relay".to_string(),
            token_secret: "pleaseChangeThisSecretForANewOne".to_string(),
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 86_400,
        }
    }
}
