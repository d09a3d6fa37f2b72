//! HTTP client for a GitHub-style identity provider.

use std::time::Duration;

use async_trait::async_trait;
use http::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use relay_core::{IdentityProvider, ProviderError, ProviderIdentity};
use reqwest::Url;

use super::{join_segments, parse_base_url};

const GITHUB_V3_JSON: &str = "application/vnd.github.v3+json";

/// Fetches `GET {base}/user` with the caller-supplied `Authorization` header.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    base_url: Url,
    user_agent: String,
}

impl HttpIdentityProvider {
    /// # Errors
    ///
    /// Fails if `base_url` is not a usable base URL or the HTTP client cannot
    /// be built.
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: parse_base_url(base_url)?,
            user_agent: user_agent.to_string(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn fetch_identity(&self, auth_header: &str) -> Result<ProviderIdentity, ProviderError> {
        let response = self
            .http
            .get(join_segments(&self.base_url, &["user"]))
            .header(AUTHORIZATION, auth_header)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, GITHUB_V3_JSON)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;
        serde_json::from_str(&body).map_err(|err| ProviderError::Malformed(err.to_string()))
    }
}
