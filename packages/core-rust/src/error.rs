/// Failure of a remote operation at the transport level.
///
/// Every variant is recoverable by a fallback; none of them is ever surfaced
/// raw to the caller of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("remote call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("remote returned status {status}")]
    Status { status: u16 },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether a retry of the same call could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout { .. } => true,
            Self::Status { status } => *status >= 500,
            Self::Malformed(_) => false,
        }
    }
}

/// Failure of an identity provider lookup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("identity provider unreachable: {0}")]
    Transport(String),
    #[error("identity provider returned status {status}")]
    Status { status: u16 },
    #[error("identity provider payload malformed: {0}")]
    Malformed(String),
}
