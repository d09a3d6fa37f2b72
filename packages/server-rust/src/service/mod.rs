//! Resilient invocation framework.
//!
//! 1. **Authentication** (`auth`, `identity`, `token`): local credentials and
//!    provider-token exchange, producing `AuthenticationResult`s
//! 2. **Request context** (`context`): per-request token binding, cancellation
//!    and teardown
//! 3. **Invocation** (`invoker`, `retry`): live call with fallback recovery
//! 4. **Middleware** (`middleware`): Tower layers (metrics, load-shedding)
//! 5. **Analytics** (`analytics`): concurrent per-key counting
//! 6. **Gateway** (`gateway`): request-facing composition of the above

pub mod analytics;
pub mod auth;
pub mod config;
pub mod context;
pub mod gateway;
pub mod identity;
pub mod invocation;
pub mod invoker;
pub mod middleware;
pub mod retry;
pub mod token;

// Re-export key types for convenient access.
pub use analytics::CounterAggregator;
pub use auth::{CredentialAuthenticator, StaticCredentialPolicy};
pub use config::RelayConfig;
pub use context::{with_request_scope, RequestContext, RequestScope, ScopeError, TokenPropagator};
pub use gateway::{GatewayError, LoginResponse, RelayGateway};
pub use identity::{IdentityExchange, ProviderProfile};
pub use invocation::{
    contract_names, ConfigurationError, Invocation, InvocationError, InvocationFuture,
    InvocationOutcome, InvocationStage,
};
pub use invoker::{ResilientInvoker, ResilientInvokerBuilder};
pub use middleware::{build_invocation_pipeline, InvocationPipeline};
pub use retry::{RetryPolicy, RetryingOperation};
pub use token::{BearerAccessRefreshToken, RefreshError, TokenError, TokenIssuer};
