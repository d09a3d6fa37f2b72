//! Identity exchange: turns an external provider's access token into a local
//! authentication result.

use relay_core::{
    reject_reasons, Authentication, AuthenticationResult, IdentityProvider, ACCESS_TOKEN_KEY,
};
use tracing::{debug, warn};

/// How a given provider expects its token to be presented, and which role
/// its users receive locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderProfile {
    pub name: &'static str,
    /// Prefix of the `Authorization` header value, including the separator.
    pub scheme_prefix: &'static str,
    /// Role attached to every principal authenticated through this provider.
    pub role: &'static str,
}

impl ProviderProfile {
    pub const GITHUB: Self = Self {
        name: "github",
        scheme_prefix: "token ",
        role: "ROLE_GITHUB",
    };
}

/// Exchanges provider tokens for local authentication results.
///
/// A failed lookup is never retried here; the client decides on retries.
#[derive(Debug, Clone)]
pub struct IdentityExchange<C> {
    client: C,
    profile: ProviderProfile,
}

impl<C: IdentityProvider> IdentityExchange<C> {
    /// Exchange against a GitHub-style provider.
    #[must_use]
    pub fn new(client: C) -> Self {
        Self::with_profile(client, ProviderProfile::GITHUB)
    }

    #[must_use]
    pub fn with_profile(client: C, profile: ProviderProfile) -> Self {
        Self { client, profile }
    }

    #[must_use]
    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    /// Look up the canonical identity behind `provider_token`.
    ///
    /// On success the result carries the provider login as principal, the
    /// profile role, and `provider_token` under `access_token`. Any failure
    /// yields `Rejected{"identity provider error"}`.
    pub async fn exchange(&self, provider_token: &str) -> AuthenticationResult {
        let auth_header = format!("{}{}", self.profile.scheme_prefix, provider_token);

        match self.client.fetch_identity(&auth_header).await {
            Ok(identity) if !identity.login.is_empty() => {
                debug!(
                    provider = self.profile.name,
                    principal = %identity.login,
                    "identity exchanged"
                );
                AuthenticationResult::Authenticated(
                    Authentication::new(identity.login)
                        .with_roles([self.profile.role])
                        .with_attribute(ACCESS_TOKEN_KEY, provider_token),
                )
            }
            Ok(_) => {
                warn!(provider = self.profile.name, "identity provider returned an empty login");
                AuthenticationResult::rejected(reject_reasons::IDENTITY_PROVIDER_ERROR)
            }
            Err(err) => {
                warn!(provider = self.profile.name, error = %err, "identity lookup failed");
                AuthenticationResult::rejected(reject_reasons::IDENTITY_PROVIDER_ERROR)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use relay_core::{ProviderError, ProviderIdentity};

    use super::*;

    /// Provider stub returning a scripted answer and recording headers.
    struct StubProvider {
        answer: Result<ProviderIdentity, ProviderError>,
        headers: Mutex<Vec<String>>,
        calls: AtomicU32,
    }

    impl StubProvider {
        fn new(answer: Result<ProviderIdentity, ProviderError>) -> Self {
            Self {
                answer,
                headers: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for StubProvider {
        async fn fetch_identity(
            &self,
            auth_header: &str,
        ) -> Result<ProviderIdentity, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.headers.lock().push(auth_header.to_string());
            self.answer.clone()
        }
    }

    fn octocat() -> ProviderIdentity {
        ProviderIdentity {
            login: "octocat".to_string(),
            name: Some("The Octocat".to_string()),
        }
    }

    #[tokio::test]
    async fn valid_token_yields_authenticated_with_access_token() {
        let exchange = IdentityExchange::new(StubProvider::new(Ok(octocat())));
        let result = exchange.exchange("gho_valid").await;

        let auth = result.authentication().expect("authenticated");
        assert_eq!(auth.principal(), "octocat");
        assert!(auth.has_role("ROLE_GITHUB"));
        assert_eq!(auth.access_token(), Some("gho_valid"));
        assert_eq!(*exchange.client.headers.lock(), vec!["token gho_valid"]);
    }

    #[tokio::test]
    async fn provider_error_yields_rejected_without_retry() {
        let exchange =
            IdentityExchange::new(StubProvider::new(Err(ProviderError::Status { status: 401 })));
        let result = exchange.exchange("gho_revoked").await;

        assert_eq!(
            result,
            AuthenticationResult::rejected(reject_reasons::IDENTITY_PROVIDER_ERROR)
        );
        assert_eq!(exchange.client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_login_is_treated_as_provider_error() {
        let exchange = IdentityExchange::new(StubProvider::new(Ok(ProviderIdentity {
            login: String::new(),
            name: None,
        })));
        let result = exchange.exchange("gho_weird").await;
        assert_eq!(result.reason(), Some(reject_reasons::IDENTITY_PROVIDER_ERROR));
    }

    #[tokio::test]
    async fn custom_profile_controls_prefix_and_role() {
        let profile = ProviderProfile {
            name: "gitlab",
            scheme_prefix: "Bearer ",
            role: "ROLE_GITLAB",
        };
        let exchange = IdentityExchange::with_profile(StubProvider::new(Ok(octocat())), profile);
        let result = exchange.exchange("glpat").await;

        assert!(result.authentication().unwrap().has_role("ROLE_GITLAB"));
        assert_eq!(*exchange.client.headers.lock(), vec!["Bearer glpat"]);
    }
}
