//! Pipeline composition: wraps a resilient invoker in the middleware layers.

use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceBuilder};

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use crate::service::config::RelayConfig;
use crate::service::invocation::{Invocation, InvocationError, InvocationOutcome};

/// Type-erased, cloneable invocation pipeline shared across requests.
pub type InvocationPipeline = BoxCloneSyncService<Invocation, InvocationOutcome, InvocationError>;

/// Build the invocation pipeline around `invoker`.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when overloaded, before any work
/// 2. `MetricsLayer` -- record timing and outcome of admitted invocations
///
/// The live-call timeout is enforced inside the invoker so that an expired
/// live call can still be recovered by the fallback.
#[must_use]
pub fn build_invocation_pipeline<S>(invoker: S, config: &RelayConfig) -> InvocationPipeline
where
    S: Service<Invocation, Response = InvocationOutcome, Error = InvocationError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    let service = ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_invocations))
        .layer(MetricsLayer)
        .service(invoker);
    BoxCloneSyncService::new(service)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relay_core::{ObservationKey, TransportError};
    use tower::ServiceExt;

    use super::*;
    use crate::service::analytics::CounterAggregator;
    use crate::service::context::RequestScope;
    use crate::service::invoker::tests::{Behavior, ScriptedOp};
    use crate::service::invoker::ResilientInvoker;

    #[tokio::test]
    async fn pipeline_runs_invocations_through_the_invoker() {
        let live = ScriptedOp::new(Behavior::Fail(TransportError::Status { status: 502 }));
        let fallback = ScriptedOp::new(Behavior::Answer(None));
        let aggregator = Arc::new(CounterAggregator::new());
        let invoker = ResilientInvoker::builder()
            .live(Arc::clone(&live))
            .fallback(Arc::clone(&fallback))
            .aggregator(Arc::clone(&aggregator))
            .build()
            .unwrap();

        let config = RelayConfig {
            max_concurrent_invocations: 4,
            ..RelayConfig::default()
        };
        let svc = build_invocation_pipeline(invoker, &config);

        let scope = RequestScope::open();
        let key = ObservationKey::new("1617294543", "Release It!");
        let outcome = svc
            .oneshot(Invocation::new(scope.context().clone(), key.clone()))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            InvocationOutcome {
                value: None,
                degraded: true
            }
        );
        assert_eq!(fallback.calls(), 1);
        assert_eq!(aggregator.count(&key), 1);
    }

    #[tokio::test]
    async fn zero_capacity_pipeline_sheds_everything() {
        let live = ScriptedOp::new(Behavior::Answer(Some(true)));
        let fallback = ScriptedOp::new(Behavior::Answer(None));
        let invoker = ResilientInvoker::builder()
            .live(Arc::clone(&live))
            .fallback(fallback)
            .aggregator(Arc::new(CounterAggregator::new()))
            .build()
            .unwrap();
        let config = RelayConfig {
            max_concurrent_invocations: 0,
            ..RelayConfig::default()
        };

        let scope = RequestScope::open();
        let err = build_invocation_pipeline(invoker, &config)
            .oneshot(Invocation::new(
                scope.context().clone(),
                ObservationKey::new("1", "One"),
            ))
            .await
            .unwrap_err();
        assert_eq!(err, InvocationError::Overloaded);
        assert_eq!(live.calls(), 0);
    }
}
