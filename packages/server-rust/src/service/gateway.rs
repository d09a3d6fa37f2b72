//! Request-facing facade tying authentication, token propagation and the
//! resilient invocation pipeline together.
//!
//! A typical request opens a [`RequestScope`](super::context::RequestScope),
//! authenticates through [`RelayGateway::login`] or
//! [`RelayGateway::oauth_callback`], then performs any number of
//! [`RelayGateway::check_stock`] calls, which carry the bound token.

use std::sync::Arc;

use relay_core::{
    AuthenticationResult, CredentialPolicy, IdentityProvider, ObservationKey, ObservationReport,
};
use tower::ServiceExt;
use tracing::{debug, info};

use super::analytics::CounterAggregator;
use super::auth::CredentialAuthenticator;
use super::context::{RequestContext, TokenPropagator};
use super::identity::IdentityExchange;
use super::invocation::{ConfigurationError, Invocation, InvocationError, InvocationOutcome};
use super::middleware::InvocationPipeline;
use super::token::{BearerAccessRefreshToken, RefreshError, TokenError, TokenIssuer};

/// Result of a local login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    /// The authentication result. On success it carries the issued access
    /// token under `access_token`.
    pub result: AuthenticationResult,
    /// Issued token pair; `None` when the credentials were rejected.
    pub tokens: Option<BearerAccessRefreshToken>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Entry points for authenticated, resilient stock lookups.
pub struct RelayGateway<P, C> {
    authenticator: CredentialAuthenticator<P>,
    exchange: IdentityExchange<C>,
    issuer: TokenIssuer,
    propagator: TokenPropagator,
    pipeline: InvocationPipeline,
    aggregator: Arc<CounterAggregator>,
}

impl<P, C> RelayGateway<P, C>
where
    P: CredentialPolicy,
    C: IdentityProvider,
{
    /// `aggregator` must be the one the pipeline's invoker records into.
    #[must_use]
    pub fn new(
        authenticator: CredentialAuthenticator<P>,
        exchange: IdentityExchange<C>,
        issuer: TokenIssuer,
        pipeline: InvocationPipeline,
        aggregator: Arc<CounterAggregator>,
    ) -> Self {
        Self {
            authenticator,
            exchange,
            issuer,
            propagator: TokenPropagator::default(),
            pipeline,
            aggregator,
        }
    }

    /// Authenticate local credentials and, on success, issue a token pair
    /// and bind its access token to `ctx`.
    ///
    /// # Errors
    ///
    /// `Configuration` if `ctx` already has a token or is closed, `Token`
    /// if signing fails. Rejected credentials are not an error.
    pub fn login(
        &self,
        ctx: &RequestContext,
        identity: &str,
        secret: &str,
    ) -> Result<LoginResponse, GatewayError> {
        let result = self.authenticator.authenticate(identity, secret);
        let Some(auth) = result.authentication() else {
            return Ok(LoginResponse {
                result,
                tokens: None,
            });
        };

        let tokens = self.issuer.issue(&result)?;
        let result = AuthenticationResult::Authenticated(
            auth.clone()
                .with_attribute(self.propagator.attribute(), tokens.access_token.as_str()),
        );
        self.propagator.bind_authenticated(ctx, &result)?;
        info!(request_id = %ctx.request_id(), principal = identity, "login succeeded");

        Ok(LoginResponse {
            result,
            tokens: Some(tokens),
        })
    }

    /// Exchange a provider token and bind it to `ctx` when the exchange
    /// succeeds. A rejected exchange leaves `ctx` unauthenticated.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` if `ctx` already has a token or is closed.
    pub async fn oauth_callback(
        &self,
        ctx: &RequestContext,
        provider_token: &str,
    ) -> Result<AuthenticationResult, ConfigurationError> {
        let result = self.exchange.exchange(provider_token).await;
        let bound = self.propagator.bind_authenticated(ctx, &result)?;
        debug!(
            request_id = %ctx.request_id(),
            provider = self.exchange.profile().name,
            bound,
            "provider callback handled"
        );
        Ok(result)
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` for anything but a valid refresh token.
    pub fn refresh(&self, refresh_token: &str) -> Result<BearerAccessRefreshToken, RefreshError> {
        self.issuer.refresh(refresh_token)
    }

    /// Ask the stock service about `key` on behalf of `ctx`.
    ///
    /// # Errors
    ///
    /// See [`InvocationError`].
    pub async fn check_stock(
        &self,
        ctx: &RequestContext,
        key: ObservationKey,
    ) -> Result<InvocationOutcome, InvocationError> {
        self.pipeline
            .clone()
            .oneshot(Invocation::new(ctx.clone(), key))
            .await
    }

    /// Snapshot of successful lookups per key.
    #[must_use]
    pub fn analytics(&self) -> ObservationReport {
        self.aggregator.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
