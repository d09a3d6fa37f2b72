use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute key under which an upstream access token is stored.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Well-known rejection reasons.
pub mod reject_reasons {
    pub const INVALID_CREDENTIALS: &str = "invalid credentials";
    pub const IDENTITY_PROVIDER_ERROR: &str = "identity provider error";
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// Bucketing key for usage observations (e.g. an ISBN plus a book title).
///
/// Equality and hashing are structural: two keys built from the same fields
/// land in the same bucket. Fields are private so a key cannot change after
/// it has been used to bucket a count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObservationKey {
    code: String,
    name: String,
}

impl ObservationKey {
    #[must_use]
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }

    /// Stable identifier, also used as the remote operation input.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Human-readable display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ObservationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.name)
    }
}

/// One `(key, count)` row of an [`ObservationReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationCount {
    #[serde(flatten)]
    pub key: ObservationKey,
    pub count: u64,
}

/// Point-in-time snapshot of the counter map.
///
/// Read-only once built. Serializes as a plain ordered list of
/// `{code, name, count}` objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationReport {
    entries: Vec<ObservationCount>,
}

impl ObservationReport {
    #[must_use]
    pub fn new(entries: Vec<ObservationCount>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[ObservationCount] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObservationCount> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count recorded for `key` at snapshot time, if the bucket existed.
    #[must_use]
    pub fn count_for(&self, key: &ObservationKey) -> Option<u64> {
        self.entries
            .iter()
            .find(|entry| &entry.key == key)
            .map(|entry| entry.count)
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<ObservationCount> {
        self.entries
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Successful authentication: principal, roles and free-form attributes.
///
/// Built by value through the `with_*` methods and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    principal: String,
    roles: BTreeSet<String>,
    attributes: BTreeMap<String, String>,
}

impl Authentication {
    #[must_use]
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            roles: BTreeSet::new(),
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_roles<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    #[must_use]
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Upstream access token stored under [`ACCESS_TOKEN_KEY`], if any.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.attributes.get(ACCESS_TOKEN_KEY).map(String::as_str)
    }
}

/// Outcome of an authentication attempt.
///
/// Rejections are values, never errors: callers branch on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuthenticationResult {
    Authenticated(Authentication),
    Rejected { reason: String },
}

impl AuthenticationResult {
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    #[must_use]
    pub fn authentication(&self) -> Option<&Authentication> {
        match self {
            Self::Authenticated(auth) => Some(auth),
            Self::Rejected { .. } => None,
        }
    }

    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        self.authentication().map(Authentication::principal)
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Authenticated(_) => None,
            Self::Rejected { reason } => Some(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Propagation
// ---------------------------------------------------------------------------

/// Opaque credential carried from an inbound request to its downstream calls.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PropagationToken(String);

impl PropagationToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PropagationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PropagationToken(***)")
    }
}

impl From<String> for PropagationToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for PropagationToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// A single outbound call of a remote operation contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    id: String,
    credential: Option<PropagationToken>,
}

impl OutboundRequest {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            credential: None,
        }
    }

    #[must_use]
    pub fn with_credential(mut self, credential: Option<PropagationToken>) -> Self {
        self.credential = credential;
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn credential(&self) -> Option<&PropagationToken> {
        self.credential.as_ref()
    }

    /// `Authorization` header value for the attached credential.
    #[must_use]
    pub fn bearer_header(&self) -> Option<String> {
        self.credential
            .as_ref()
            .map(|token| format!("Bearer {}", token.as_str()))
    }
}

/// Canonical identity returned by an external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
}
