use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ProviderError, TransportError};
use crate::types::{OutboundRequest, ProviderIdentity};

/// A remote operation contract: `id -> boolean-or-absent`.
///
/// Implemented identically by the live network client and by its fallback.
/// `Ok(None)` is a legitimate "absent" answer, not a failure.
#[async_trait]
pub trait RemoteOperation: Send + Sync {
    /// Name of the contract. Live and fallback implementations bound to the
    /// same invoker must report the same name.
    fn contract(&self) -> &'static str;

    /// Perform the operation for `request.id()`, sending the attached
    /// credential if there is one.
    async fn call(&self, request: &OutboundRequest) -> Result<Option<bool>, TransportError>;
}

#[async_trait]
impl<T: RemoteOperation + ?Sized> RemoteOperation for Arc<T> {
    fn contract(&self) -> &'static str {
        (**self).contract()
    }

    async fn call(&self, request: &OutboundRequest) -> Result<Option<bool>, TransportError> {
        (**self).call(request).await
    }
}

/// Client for an external identity provider (e.g. the GitHub user API).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fetch the canonical identity for the given `Authorization` header value.
    async fn fetch_identity(&self, auth_header: &str) -> Result<ProviderIdentity, ProviderError>;
}

#[async_trait]
impl<T: IdentityProvider + ?Sized> IdentityProvider for Arc<T> {
    async fn fetch_identity(&self, auth_header: &str) -> Result<ProviderIdentity, ProviderError> {
        (**self).fetch_identity(auth_header).await
    }
}

/// Policy deciding whether a local identity/secret pair is valid.
pub trait CredentialPolicy: Send + Sync {
    fn matches(&self, identity: &str, secret: &str) -> bool;

    /// Roles granted to `identity` after a successful match. Empty by default.
    fn roles(&self, _identity: &str) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

impl<F> CredentialPolicy for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn matches(&self, identity: &str, secret: &str) -> bool {
        self(identity, secret)
    }
}
