//! Types carried through the invocation pipeline: request, outcome, stages
//! and errors.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use relay_core::{ObservationKey, TransportError};

use super::context::RequestContext;

/// Well-known remote operation contract names.
pub mod contract_names {
    pub const INVENTORY_STOCK: &str = "inventory.stock";
}

/// Stage of the per-invocation state machine.
///
/// `Idle -> Invoking -> Succeeded`, or
/// `Invoking -> Failed -> Recovering -> Succeeded | FatalFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStage {
    Idle,
    Invoking,
    Succeeded,
    Failed,
    Recovering,
    FatalFailed,
}

impl InvocationStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Invoking => "invoking",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Recovering => "recovering",
            Self::FatalFailed => "fatal_failed",
        }
    }
}

impl fmt::Display for InvocationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation of the remote operation on behalf of a request.
///
/// The key's `code` is the operation input; the whole key is what gets
/// counted on success.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub ctx: RequestContext,
    pub key: ObservationKey,
}

impl Invocation {
    #[must_use]
    pub fn new(ctx: RequestContext, key: ObservationKey) -> Self {
        Self { ctx, key }
    }

    /// Input passed to the remote operation.
    #[must_use]
    pub fn id(&self) -> &str {
        self.key.code()
    }
}

/// Successful result of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationOutcome {
    /// The operation's answer; `None` is a legitimate "absent".
    pub value: Option<bool>,
    /// `true` when the answer came from the fallback.
    pub degraded: bool,
}

/// Boxed future returned by every service in the invocation pipeline.
pub type InvocationFuture =
    Pin<Box<dyn Future<Output = Result<InvocationOutcome, InvocationError>> + Send>>;

/// Terminal failures of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    #[error("invocation cancelled while {stage}")]
    Cancelled { stage: InvocationStage },
    #[error("{contract}: fallback failed while {stage} (live: {live}; fallback: {fallback})")]
    FallbackExhausted {
        contract: &'static str,
        stage: InvocationStage,
        live: TransportError,
        fallback: TransportError,
    },
    #[error("invoker overloaded, try again later")]
    Overloaded,
}

/// Composition and request-context misuse. Always fatal, never ignored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("propagation token already bound to request {request_id}")]
    TokenAlreadyBound { request_id: String },
    #[error("request context {request_id} is closed")]
    ContextClosed { request_id: String },
    #[error("resilient invoker is missing its {part}")]
    MissingComponent { part: &'static str },
    #[error("fallback contract `{fallback}` does not match live contract `{live}`")]
    ContractMismatch {
        live: &'static str,
        fallback: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names() {
        assert_eq!(InvocationStage::Recovering.to_string(), "recovering");
        assert_eq!(InvocationStage::FatalFailed.as_str(), "fatal_failed");
    }

    #[test]
    fn fallback_exhausted_message_names_stage_and_both_errors() {
        let err = InvocationError::FallbackExhausted {
            contract: contract_names::INVENTORY_STOCK,
            stage: InvocationStage::Recovering,
            live: TransportError::Connect("refused".into()),
            fallback: TransportError::Status { status: 500 },
        };
        let msg = err.to_string();
        assert!(msg.contains("inventory.stock"));
        assert!(msg.contains("recovering"));
        assert!(msg.contains("refused"));
        assert!(msg.contains("500"));
    }
}
