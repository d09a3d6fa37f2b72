//! Resilient invoker: one live attempt, then a statically bound fallback.
//!
//! Both implementations satisfy the same [`RemoteOperation`] contract, so a
//! mismatched signature cannot compile; mismatched contract names are
//! rejected by [`ResilientInvokerBuilder::build`]. The only branch in the
//! failure path is whether the live call succeeded.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use relay_core::{OutboundRequest, RemoteOperation, TransportError};
use tower::Service;
use tracing::{debug, info, warn};

use super::analytics::CounterAggregator;
use super::context::{RequestContext, TokenPropagator};
use super::invocation::{
    ConfigurationError, Invocation, InvocationError, InvocationFuture, InvocationOutcome,
    InvocationStage,
};

const DEFAULT_LIVE_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// ResilientInvoker
// ---------------------------------------------------------------------------

/// Executes a remote operation with an automatic fallback on failure.
///
/// Successful invocations (live or degraded) are recorded in the shared
/// [`CounterAggregator`] under the invocation key. Cheap to clone.
pub struct ResilientInvoker<L, F> {
    live: Arc<L>,
    fallback: Arc<F>,
    aggregator: Arc<CounterAggregator>,
    propagator: TokenPropagator,
    live_timeout: Duration,
}

impl<L, F> Clone for ResilientInvoker<L, F> {
    fn clone(&self) -> Self {
        Self {
            live: Arc::clone(&self.live),
            fallback: Arc::clone(&self.fallback),
            aggregator: Arc::clone(&self.aggregator),
            propagator: self.propagator.clone(),
            live_timeout: self.live_timeout,
        }
    }
}

impl<L, F> ResilientInvoker<L, F>
where
    L: RemoteOperation + 'static,
    F: RemoteOperation + 'static,
{
    #[must_use]
    pub fn builder() -> ResilientInvokerBuilder<L, F> {
        ResilientInvokerBuilder::new()
    }

    #[must_use]
    pub fn contract(&self) -> &'static str {
        self.live.contract()
    }

    #[must_use]
    pub fn aggregator(&self) -> &Arc<CounterAggregator> {
        &self.aggregator
    }

    /// Run one invocation through the state machine.
    ///
    /// # Errors
    ///
    /// `Cancelled` if the request context is cancelled before an answer is
    /// produced (a fallback never starts after cancellation), and
    /// `FallbackExhausted` if both the live call and the fallback fail.
    pub async fn invoke(
        &self,
        invocation: Invocation,
    ) -> Result<InvocationOutcome, InvocationError> {
        let Invocation { ctx, key } = invocation;
        let contract = self.contract();
        let mut stage = InvocationStage::Idle;

        if ctx.is_cancelled() {
            return Err(InvocationError::Cancelled { stage });
        }

        advance(&mut stage, InvocationStage::Invoking, &ctx, contract);
        let request = self.propagator.outbound(&ctx, key.code());

        let live_error = tokio::select! {
            biased;
            () = ctx.cancelled() => return Err(InvocationError::Cancelled { stage }),
            result = self.call_live(&request) => match result {
                Ok(value) => {
                    advance(&mut stage, InvocationStage::Succeeded, &ctx, contract);
                    self.aggregator.record(&key);
                    return Ok(InvocationOutcome { value, degraded: false });
                }
                Err(err) => err,
            },
        };

        advance(&mut stage, InvocationStage::Failed, &ctx, contract);
        warn!(
            request_id = %ctx.request_id(),
            contract,
            key = %key,
            error = %live_error,
            "live call failed, recovering with fallback"
        );

        if ctx.is_cancelled() {
            return Err(InvocationError::Cancelled { stage });
        }

        advance(&mut stage, InvocationStage::Recovering, &ctx, contract);
        let fallback_result = tokio::select! {
            biased;
            () = ctx.cancelled() => return Err(InvocationError::Cancelled { stage }),
            result = self.fallback.call(&request) => result,
        };

        match fallback_result {
            Ok(value) => {
                advance(&mut stage, InvocationStage::Succeeded, &ctx, contract);
                self.aggregator.record(&key);
                metrics::counter!(
                    "relay_fallback_total",
                    "contract" => contract,
                    "result" => "recovered"
                )
                .increment(1);
                info!(
                    request_id = %ctx.request_id(),
                    contract,
                    key = %key,
                    degraded = true,
                    "answered by fallback"
                );
                Ok(InvocationOutcome {
                    value,
                    degraded: true,
                })
            }
            Err(fallback_error) => {
                let failed_in = stage;
                advance(&mut stage, InvocationStage::FatalFailed, &ctx, contract);
                metrics::counter!(
                    "relay_fallback_total",
                    "contract" => contract,
                    "result" => "exhausted"
                )
                .increment(1);
                warn!(
                    request_id = %ctx.request_id(),
                    contract,
                    key = %key,
                    error = %fallback_error,
                    "fallback failed"
                );
                Err(InvocationError::FallbackExhausted {
                    contract,
                    stage: failed_in,
                    live: live_error,
                    fallback: fallback_error,
                })
            }
        }
    }

    async fn call_live(&self, request: &OutboundRequest) -> Result<Option<bool>, TransportError> {
        match tokio::time::timeout(self.live_timeout, self.live.call(request)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                let timeout_ms = u64::try_from(self.live_timeout.as_millis()).unwrap_or(u64::MAX);
                Err(TransportError::Timeout { timeout_ms })
            }
        }
    }
}

fn advance(
    stage: &mut InvocationStage,
    next: InvocationStage,
    ctx: &RequestContext,
    contract: &'static str,
) {
    debug!(
        request_id = %ctx.request_id(),
        contract,
        from = stage.as_str(),
        to = next.as_str(),
        "invocation stage"
    );
    *stage = next;
}

impl<L, F> Service<Invocation> for ResilientInvoker<L, F>
where
    L: RemoteOperation + 'static,
    F: RemoteOperation + 'static,
{
    type Response = InvocationOutcome;
    type Error = InvocationError;
    type Future = InvocationFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let invoker = self.clone();
        Box::pin(async move { invoker.invoke(invocation).await })
    }
}

// ---------------------------------------------------------------------------
// ResilientInvokerBuilder
// ---------------------------------------------------------------------------

/// Composes a [`ResilientInvoker`] from its live and fallback implementations.
pub struct ResilientInvokerBuilder<L, F> {
    live: Option<L>,
    fallback: Option<F>,
    aggregator: Option<Arc<CounterAggregator>>,
    propagator: TokenPropagator,
    live_timeout: Duration,
}

impl<L, F> ResilientInvokerBuilder<L, F>
where
    L: RemoteOperation + 'static,
    F: RemoteOperation + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: None,
            fallback: None,
            aggregator: None,
            propagator: TokenPropagator::default(),
            live_timeout: DEFAULT_LIVE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn live(mut self, live: L) -> Self {
        self.live = Some(live);
        self
    }

    #[must_use]
    pub fn fallback(mut self, fallback: F) -> Self {
        self.fallback = Some(fallback);
        self
    }

    #[must_use]
    pub fn aggregator(mut self, aggregator: Arc<CounterAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    #[must_use]
    pub fn propagator(mut self, propagator: TokenPropagator) -> Self {
        self.propagator = propagator;
        self
    }

    /// Upper bound for a single live call before it counts as failed.
    #[must_use]
    pub fn live_timeout(mut self, timeout: Duration) -> Self {
        self.live_timeout = timeout;
        self
    }

    /// # Errors
    ///
    /// `MissingComponent` if the live, fallback or aggregator part was not
    /// supplied, `ContractMismatch` if live and fallback name different
    /// contracts.
    pub fn build(self) -> Result<ResilientInvoker<L, F>, ConfigurationError> {
        let live = self
            .live
            .ok_or(ConfigurationError::MissingComponent { part: "live operation" })?;
        let fallback = self
            .fallback
            .ok_or(ConfigurationError::MissingComponent { part: "fallback" })?;
        let aggregator = self
            .aggregator
            .ok_or(ConfigurationError::MissingComponent { part: "aggregator" })?;

        if live.contract() != fallback.contract() {
            return Err(ConfigurationError::ContractMismatch {
                live: live.contract(),
                fallback: fallback.contract(),
            });
        }

        info!(
            contract = live.contract(),
            live_timeout_ms = u64::try_from(self.live_timeout.as_millis()).unwrap_or(u64::MAX),
            "resilient invoker composed"
        );

        Ok(ResilientInvoker {
            live: Arc::new(live),
            fallback: Arc::new(fallback),
            aggregator,
            propagator: self.propagator,
            live_timeout: self.live_timeout,
        })
    }
}

impl<L, F> Default for ResilientInvokerBuilder<L, F>
where
    L: RemoteOperation + 'static,
    F: RemoteOperation + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use relay_core::{ObservationKey, PropagationToken};
    use tower::ServiceExt;

    use super::*;
    use crate::service::context::RequestScope;
    use crate::service::invocation::contract_names;
    use crate::service::retry::{RetryPolicy, RetryingOperation};

    /// What a scripted operation does when called.
    #[derive(Debug, Clone)]
    pub(crate) enum Behavior {
        Answer(Option<bool>),
        Fail(TransportError),
        Hang,
    }

    /// Remote operation stub that counts calls and records credentials.
    pub(crate) struct ScriptedOp {
        contract: &'static str,
        behavior: Behavior,
        pub(crate) calls: AtomicU32,
        pub(crate) credentials: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedOp {
        pub(crate) fn new(behavior: Behavior) -> Arc<Self> {
            Self::named(contract_names::INVENTORY_STOCK, behavior)
        }

        pub(crate) fn named(contract: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                contract,
                behavior,
                calls: AtomicU32::new(0),
                credentials: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteOperation for ScriptedOp {
        fn contract(&self) -> &'static str {
            self.contract
        }

        async fn call(&self, request: &OutboundRequest) -> Result<Option<bool>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.credentials
                .lock()
                .push(request.credential().map(|t| t.as_str().to_string()));
            match &self.behavior {
                Behavior::Answer(value) => Ok(*value),
                Behavior::Fail(err) => Err(err.clone()),
                Behavior::Hang => std::future::pending().await,
            }
        }
    }

    type TestInvoker = ResilientInvoker<Arc<ScriptedOp>, Arc<ScriptedOp>>;

    fn invoker(live: &Arc<ScriptedOp>, fallback: &Arc<ScriptedOp>) -> TestInvoker {
        ResilientInvoker::builder()
            .live(Arc::clone(live))
            .fallback(Arc::clone(fallback))
            .aggregator(Arc::new(CounterAggregator::new()))
            .live_timeout(Duration::from_millis(100))
            .build()
            .unwrap()
    }

    fn key() -> ObservationKey {
        ObservationKey::new("1491950358", "Building Microservices")
    }

    fn refused() -> TransportError {
        TransportError::Connect("connection refused".to_string())
    }

    #[tokio::test]
    async fn failing_live_recovers_with_fallback_value() {
        let live = ScriptedOp::new(Behavior::Fail(refused()));
        let fallback = ScriptedOp::new(Behavior::Answer(None));
        let invoker = invoker(&live, &fallback);
        let scope = RequestScope::open();

        let outcome = invoker
            .invoke(Invocation::new(scope.context().clone(), key()))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            InvocationOutcome {
                value: None,
                degraded: true
            }
        );
        assert_eq!(live.calls(), 1);
        assert_eq!(fallback.calls(), 1);
        assert_eq!(invoker.aggregator().count(&key()), 1);
    }

    #[tokio::test]
    async fn successful_live_never_invokes_fallback() {
        let live = ScriptedOp::new(Behavior::Answer(Some(true)));
        let fallback = ScriptedOp::new(Behavior::Answer(None));
        let invoker = invoker(&live, &fallback);
        let scope = RequestScope::open();

        let outcome = invoker
            .invoke(Invocation::new(scope.context().clone(), key()))
            .await
            .unwrap();

        assert_eq!(outcome.value, Some(true));
        assert!(!outcome.degraded);
        assert_eq!(fallback.calls(), 0);
        assert_eq!(invoker.aggregator().count(&key()), 1);
    }

    #[tokio::test]
    async fn absent_answer_is_not_a_failure() {
        let live = ScriptedOp::new(Behavior::Answer(None));
        let fallback = ScriptedOp::new(Behavior::Answer(Some(false)));
        let invoker = invoker(&live, &fallback);
        let scope = RequestScope::open();

        let outcome = invoker
            .invoke(Invocation::new(scope.context().clone(), key()))
            .await
            .unwrap();

        assert_eq!(outcome.value, None);
        assert!(!outcome.degraded);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn failing_fallback_surfaces_exhaustion_and_is_not_counted() {
        let live = ScriptedOp::new(Behavior::Fail(refused()));
        let fallback = ScriptedOp::new(Behavior::Fail(TransportError::Status { status: 500 }));
        let invoker = invoker(&live, &fallback);
        let scope = RequestScope::open();

        let err = invoker
            .invoke(Invocation::new(scope.context().clone(), key()))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            InvocationError::FallbackExhausted {
                contract: contract_names::INVENTORY_STOCK,
                stage: InvocationStage::Recovering,
                live: refused(),
                fallback: TransportError::Status { status: 500 },
            }
        );
        assert_eq!(invoker.aggregator().count(&key()), 0);
        assert!(invoker.aggregator().is_empty());
    }

    #[tokio::test]
    async fn bound_token_is_attached_to_live_and_fallback_calls() {
        let live = ScriptedOp::new(Behavior::Fail(refused()));
        let fallback = ScriptedOp::new(Behavior::Answer(None));
        let invoker = invoker(&live, &fallback);
        let scope = RequestScope::open();
        scope
            .context()
            .bind_token(PropagationToken::new("jwt-abc"))
            .unwrap();

        invoker
            .invoke(Invocation::new(scope.context().clone(), key()))
            .await
            .unwrap();

        assert_eq!(*live.credentials.lock(), vec![Some("jwt-abc".to_string())]);
        assert_eq!(*fallback.credentials.lock(), vec![Some("jwt-abc".to_string())]);
    }

    #[tokio::test]
    async fn unbound_context_calls_unauthenticated() {
        let live = ScriptedOp::new(Behavior::Answer(Some(true)));
        let fallback = ScriptedOp::new(Behavior::Answer(None));
        let invoker = invoker(&live, &fallback);
        let scope = RequestScope::open();

        invoker
            .invoke(Invocation::new(scope.context().clone(), key()))
            .await
            .unwrap();

        assert_eq!(*live.credentials.lock(), vec![None]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_live_call_times_out_into_fallback() {
        let live = ScriptedOp::new(Behavior::Hang);
        let fallback = ScriptedOp::new(Behavior::Answer(Some(false)));
        let invoker = invoker(&live, &fallback);
        let scope = RequestScope::open();

        let outcome = invoker
            .invoke(Invocation::new(scope.context().clone(), key()))
            .await
            .unwrap();

        assert_eq!(outcome.value, Some(false));
        assert!(outcome.degraded);
    }

    #[tokio::test]
    async fn live_timeout_is_reported_in_milliseconds() {
        let live = ScriptedOp::new(Behavior::Hang);
        let fallback = ScriptedOp::new(Behavior::Fail(refused()));
        let invoker = invoker(&live, &fallback);
        let scope = RequestScope::open();

        let err = invoker
            .invoke(Invocation::new(scope.context().clone(), key()))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            InvocationError::FallbackExhausted {
                contract: contract_names::INVENTORY_STOCK,
                stage: InvocationStage::Recovering,
                live: TransportError::Timeout { timeout_ms: 100 },
                fallback: refused(),
            }
        );
    }

    #[tokio::test]
    async fn cancellation_during_fallback_reports_recovering() {
        let live = ScriptedOp::new(Behavior::Fail(refused()));
        let fallback = ScriptedOp::new(Behavior::Hang);
        let invoker = invoker(&live, &fallback);
        let scope = RequestScope::open();
        let ctx = scope.context().clone();

        let task = tokio::spawn({
            let invoker = invoker.clone();
            let ctx = ctx.clone();
            async move { invoker.invoke(Invocation::new(ctx, key())).await }
        });

        while fallback.calls() == 0 {
            tokio::task::yield_now().await;
        }
        ctx.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            InvocationError::Cancelled {
                stage: InvocationStage::Recovering
            }
        );
        assert_eq!(live.calls(), 1);
        assert!(invoker.aggregator().is_empty());
    }

    #[tokio::test]
    async fn cancellation_during_retry_backoff_skips_fallback() {
        let live = ScriptedOp::new(Behavior::Fail(refused()));
        let fallback = ScriptedOp::new(Behavior::Answer(None));
        let retrying = RetryingOperation::new(
            Arc::clone(&live),
            RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_secs(60),
            },
        );
        let invoker = ResilientInvoker::builder()
            .live(retrying)
            .fallback(Arc::clone(&fallback))
            .aggregator(Arc::new(CounterAggregator::new()))
            .live_timeout(Duration::from_secs(600))
            .build()
            .unwrap();
        let scope = RequestScope::open();
        let ctx = scope.context().clone();

        let task = tokio::spawn({
            let invoker = invoker.clone();
            let ctx = ctx.clone();
            async move { invoker.invoke(Invocation::new(ctx, key())).await }
        });

        while live.calls() == 0 {
            tokio::task::yield_now().await;
        }
        ctx.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            InvocationError::Cancelled {
                stage: InvocationStage::Invoking
            }
        );
        assert_eq!(live.calls(), 1);
        assert_eq!(fallback.calls(), 0);
        assert!(invoker.aggregator().is_empty());
    }

    #[tokio::test]
    async fn cancellation_during_live_call_prevents_fallback() {
        let live = ScriptedOp::new(Behavior::Hang);
        let fallback = ScriptedOp::new(Behavior::Answer(None));
        let invoker = ResilientInvoker::builder()
            .live(Arc::clone(&live))
            .fallback(Arc::clone(&fallback))
            .aggregator(Arc::new(CounterAggregator::new()))
            .live_timeout(Duration::from_secs(60))
            .build()
            .unwrap();
        let scope = RequestScope::open();
        let ctx = scope.context().clone();

        let task = tokio::spawn({
            let invoker = invoker.clone();
            let ctx = ctx.clone();
            async move { invoker.invoke(Invocation::new(ctx, key())).await }
        });

        while live.calls() == 0 {
            tokio::task::yield_now().await;
        }
        ctx.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            InvocationError::Cancelled {
                stage: InvocationStage::Invoking
            }
        );
        assert_eq!(fallback.calls(), 0);
        assert!(invoker.aggregator().is_empty());
    }

    #[tokio::test]
    async fn torn_down_context_is_rejected_before_calling() {
        let live = ScriptedOp::new(Behavior::Answer(Some(true)));
        let fallback = ScriptedOp::new(Behavior::Answer(None));
        let invoker = invoker(&live, &fallback);
        let scope = RequestScope::open();
        let ctx = scope.context().clone();
        drop(scope);

        let err = invoker.invoke(Invocation::new(ctx, key())).await.unwrap_err();
        assert_eq!(
            err,
            InvocationError::Cancelled {
                stage: InvocationStage::Idle
            }
        );
        assert_eq!(live.calls(), 0);
    }

    #[tokio::test]
    async fn invoker_is_a_tower_service() {
        let live = ScriptedOp::new(Behavior::Answer(Some(true)));
        let fallback = ScriptedOp::new(Behavior::Answer(None));
        let invoker = invoker(&live, &fallback);
        let scope = RequestScope::open();

        let outcome = invoker
            .clone()
            .oneshot(Invocation::new(scope.context().clone(), key()))
            .await
            .unwrap();
        assert_eq!(outcome.value, Some(true));
    }

    #[test]
    fn builder_requires_fallback() {
        let result = ResilientInvoker::<Arc<ScriptedOp>, Arc<ScriptedOp>>::builder()
            .live(ScriptedOp::new(Behavior::Answer(None)))
            .aggregator(Arc::new(CounterAggregator::new()))
            .build();
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingComponent { part: "fallback" })
        ));
    }

    #[test]
    fn builder_requires_aggregator() {
        let result = ResilientInvoker::builder()
            .live(ScriptedOp::new(Behavior::Answer(None)))
            .fallback(ScriptedOp::new(Behavior::Answer(None)))
            .build();
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingComponent { part: "aggregator" })
        ));
    }

    #[test]
    fn builder_rejects_contract_mismatch() {
        let result = ResilientInvoker::builder()
            .live(ScriptedOp::named("inventory.stock", Behavior::Answer(None)))
            .fallback(ScriptedOp::named("catalogue.lookup", Behavior::Answer(None)))
            .aggregator(Arc::new(CounterAggregator::new()))
            .build();
        assert!(matches!(
            result,
            Err(ConfigurationError::ContractMismatch {
                live: "inventory.stock",
                fallback: "catalogue.lookup",
            })
        ));
    }
}
