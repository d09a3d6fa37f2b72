//! Relay core: observation keys, authentication results, and the contracts
//! of the collaborators the invocation layer talks to.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{ProviderError, TransportError};
pub use traits::{CredentialPolicy, IdentityProvider, RemoteOperation};
pub use types::{
    reject_reasons, Authentication, AuthenticationResult, ObservationCount, ObservationKey,
    ObservationReport, OutboundRequest, PropagationToken, ProviderIdentity, ACCESS_TOKEN_KEY,
};
