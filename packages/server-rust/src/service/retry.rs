//! Bounded retries as a decorator around a live remote operation.
//!
//! `RetryingOperation` implements the same contract as the operation it
//! wraps, so it slots in as the live side of a resilient invoker. Dropping
//! the call future (cancellation, live timeout) abandons any pending retry.

use std::time::Duration;

use async_trait::async_trait;
use relay_core::{OutboundRequest, RemoteOperation, TransportError};
use tracing::debug;

/// How many attempts to make and how long to wait between them.
///
/// When the retrying operation is the live side of a resilient invoker, the
/// invoker's live timeout bounds the whole sequence of attempts and backoffs.
/// Give each attempt a budget from [`RetryPolicy::attempt_timeout`] so that a
/// timed-out attempt can still be retried within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Per-attempt timeout that lets every attempt and backoff fit in `total`.
    ///
    /// Never shorter than one millisecond.
    #[must_use]
    pub fn attempt_timeout(&self, total: Duration) -> Duration {
        let attempts = self.max_attempts.max(1);
        let backoffs = self.backoff.saturating_mul(attempts - 1);
        (total.saturating_sub(backoffs) / attempts).max(Duration::from_millis(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Retries transient transport failures of the wrapped operation.
#[derive(Debug, Clone)]
pub struct RetryingOperation<O> {
    inner: O,
    policy: RetryPolicy,
}

impl<O> RetryingOperation<O> {
    #[must_use]
    pub fn new(inner: O, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<O: RemoteOperation> RemoteOperation for RetryingOperation<O> {
    fn contract(&self) -> &'static str {
        self.inner.contract()
    }

    async fn call(&self, request: &OutboundRequest) -> Result<Option<bool>, TransportError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.call(request).await {
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    debug!(
                        contract = self.inner.contract(),
                        attempt,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(self.policy.backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
