//! Request-scoped context: propagation token ownership and cancellation.
//!
//! A [`RequestContext`] can only be obtained from a [`RequestScope`]. The
//! scope is an RAII guard: dropping it (normal return, error, timeout, or the
//! owning task being aborted) closes the context, which releases the bound
//! token and fires the cancellation signal. Clones of the context held by
//! in-flight work observe the teardown.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_core::{AuthenticationResult, OutboundRequest, PropagationToken, ACCESS_TOKEN_KEY};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use super::invocation::ConfigurationError;

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum TokenSlot {
    Empty,
    Bound(PropagationToken),
    Closed,
}

struct ContextInner {
    request_id: String,
    slot: Mutex<TokenSlot>,
    cancel: CancellationToken,
}

/// Handle to the state of a single inbound request. Cheap to clone.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

impl RequestContext {
    fn new(request_id: String) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                request_id,
                slot: Mutex::new(TokenSlot::Empty),
                cancel: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    /// Bind the propagation token for this request.
    ///
    /// # Errors
    ///
    /// `TokenAlreadyBound` if a token is already bound (the existing token is
    /// kept), `ContextClosed` if the request has been torn down.
    pub fn bind_token(&self, token: PropagationToken) -> Result<(), ConfigurationError> {
        let mut slot = self.inner.slot.lock();
        match &*slot {
            TokenSlot::Empty => {}
            TokenSlot::Bound(_) => {
                return Err(ConfigurationError::TokenAlreadyBound {
                    request_id: self.inner.request_id.clone(),
                })
            }
            TokenSlot::Closed => {
                return Err(ConfigurationError::ContextClosed {
                    request_id: self.inner.request_id.clone(),
                })
            }
        }
        *slot = TokenSlot::Bound(token);
        debug!(request_id = %self.inner.request_id, "propagation token bound");
        Ok(())
    }

    /// The bound token, or `None` if nothing is bound or the request is over.
    #[must_use]
    pub fn current_token(&self) -> Option<PropagationToken> {
        match &*self.inner.slot.lock() {
            TokenSlot::Bound(token) => Some(token.clone()),
            TokenSlot::Empty | TokenSlot::Closed => None,
        }
    }

    /// Whether the request has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(*self.inner.slot.lock(), TokenSlot::Closed)
    }

    /// Request cancellation of all work done on behalf of this request.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once the request is cancelled or torn down.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }

    fn close(&self) {
        let previous = std::mem::replace(&mut *self.inner.slot.lock(), TokenSlot::Closed);
        self.inner.cancel.cancel();
        debug!(
            request_id = %self.inner.request_id,
            token_released = matches!(previous, TokenSlot::Bound(_)),
            "request context closed"
        );
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.inner.request_id)
            .field("slot", &*self.inner.slot.lock())
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RequestScope
// ---------------------------------------------------------------------------

/// Owner of a [`RequestContext`]. Closes the context when dropped.
#[derive(Debug)]
pub struct RequestScope {
    ctx: RequestContext,
}

impl RequestScope {
    /// Open a scope with a fresh UUID v4 request id.
    #[must_use]
    pub fn open() -> Self {
        Self::with_request_id(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            ctx: RequestContext::new(request_id.into()),
        }
    }

    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.ctx.close();
    }
}

/// Why a request scope ended without producing a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("request timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
    #[error("request cancelled")]
    Cancelled,
}

/// Run `handler` inside a fresh request scope bounded by `timeout`.
///
/// The context is torn down when this future completes or is dropped.
///
/// # Errors
///
/// `ScopeError::TimedOut` when `timeout` elapses first, `ScopeError::Cancelled`
/// when the context is cancelled before `handler` completes.
pub async fn with_request_scope<F, Fut, T>(timeout: Duration, handler: F) -> Result<T, ScopeError>
where
    F: FnOnce(RequestContext) -> Fut,
    Fut: Future<Output = T>,
{
    let scope = RequestScope::open();
    let ctx = scope.context().clone();
    let fut = handler(ctx.clone());

    let result = tokio::select! {
        biased;
        () = ctx.cancelled() => Err(ScopeError::Cancelled),
        outcome = tokio::time::timeout(timeout, fut) => outcome.map_err(|_elapsed| {
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            ScopeError::TimedOut { timeout_ms }
        }),
    };

    drop(scope);
    result
}

// ---------------------------------------------------------------------------
// TokenPropagator
// ---------------------------------------------------------------------------

/// Carries the token obtained by authentication onto outbound calls.
#[derive(Debug, Clone)]
pub struct TokenPropagator {
    attribute: &'static str,
}

impl TokenPropagator {
    /// Propagator reading the given authentication attribute.
    #[must_use]
    pub fn new(attribute: &'static str) -> Self {
        Self { attribute }
    }

    /// Authentication attribute holding the token to propagate.
    #[must_use]
    pub fn attribute(&self) -> &'static str {
        self.attribute
    }

    /// # Errors
    ///
    /// See [`RequestContext::bind_token`].
    pub fn bind(
        &self,
        ctx: &RequestContext,
        token: impl Into<PropagationToken>,
    ) -> Result<(), ConfigurationError> {
        ctx.bind_token(token.into())
    }

    #[must_use]
    pub fn current_token(&self, ctx: &RequestContext) -> Option<PropagationToken> {
        ctx.current_token()
    }

    /// Bind the token carried by an authentication result, if it has one.
    ///
    /// Returns `Ok(false)` for rejections and for results without the
    /// token attribute; those requests proceed unauthenticated.
    ///
    /// # Errors
    ///
    /// See [`RequestContext::bind_token`].
    pub fn bind_authenticated(
        &self,
        ctx: &RequestContext,
        result: &AuthenticationResult,
    ) -> Result<bool, ConfigurationError> {
        let Some(token) = result
            .authentication()
            .and_then(|auth| auth.attributes().get(self.attribute))
        else {
            return Ok(false);
        };
        ctx.bind_token(PropagationToken::new(token.as_str()))?;
        Ok(true)
    }

    /// Outbound request for `id` carrying the context's current token.
    #[must_use]
    pub fn outbound(&self, ctx: &RequestContext, id: &str) -> OutboundRequest {
        OutboundRequest::new(id).with_credential(ctx.current_token())
    }
}

impl Default for TokenPropagator {
    fn default() -> Self {
        Self::new(ACCESS_TOKEN_KEY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
