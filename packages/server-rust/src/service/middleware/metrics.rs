//! Metrics middleware for invocations.
//!
//! Every invocation runs inside an `invocation` span that records its
//! duration and outcome, and is counted in `relay_invocations_total`.

use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::invocation::{Invocation, InvocationError, InvocationFuture, InvocationOutcome};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Records invocation duration and outcome in a tracing span and in
/// `metrics` counters and histograms.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Outcome label shared by logs and metrics.
fn outcome_label(result: &Result<InvocationOutcome, InvocationError>) -> &'static str {
    match result {
        Ok(InvocationOutcome { degraded: false, .. }) => "ok",
        Ok(InvocationOutcome { degraded: true, .. }) => "degraded",
        Err(InvocationError::Cancelled { .. }) => "cancelled",
        Err(InvocationError::FallbackExhausted { .. }) => "exhausted",
        Err(InvocationError::Overloaded) => "overloaded",
    }
}

impl<S> Service<Invocation> for MetricsService<S>
where
    S: Service<Invocation, Response = InvocationOutcome, Error = InvocationError> + Send,
    S::Future: Send + 'static,
{
    type Response = InvocationOutcome;
    type Error = InvocationError;
    type Future = InvocationFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let span = info_span!(
            "invocation",
            request_id = %invocation.ctx.request_id(),
            key = %invocation.key,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(invocation);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome_label(&result);

                let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);

                metrics::counter!("relay_invocations_total", "outcome" => outcome).increment(1);
                metrics::histogram!("relay_invocation_duration_seconds")
                    .record(elapsed.as_secs_f64());

                tracing::info!(duration_ms, outcome, "invocation complete");
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
