//! Local identity/secret authentication against a pluggable policy.

use std::collections::{BTreeSet, HashMap};

use relay_core::{reject_reasons, Authentication, AuthenticationResult, CredentialPolicy};
use subtle::ConstantTimeEq;
use tracing::debug;

// ---------------------------------------------------------------------------
// CredentialAuthenticator
// ---------------------------------------------------------------------------

/// Validates identity/secret pairs with a [`CredentialPolicy`].
///
/// Pure: no I/O and no state beyond the policy.
#[derive(Debug, Clone)]
pub struct CredentialAuthenticator<P> {
    policy: P,
}

impl<P: CredentialPolicy> CredentialAuthenticator<P> {
    #[must_use]
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    /// `Authenticated` with the policy's roles on match, otherwise
    /// `Rejected{"invalid credentials"}`.
    #[must_use]
    pub fn authenticate(&self, identity: &str, secret: &str) -> AuthenticationResult {
        if self.policy.matches(identity, secret) {
            debug!(principal = identity, "credentials accepted");
            AuthenticationResult::Authenticated(
                Authentication::new(identity).with_roles(self.policy.roles(identity)),
            )
        } else {
            debug!("credentials rejected");
            AuthenticationResult::rejected(reject_reasons::INVALID_CREDENTIALS)
        }
    }
}

// ---------------------------------------------------------------------------
// StaticCredentialPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Account {
    secret: String,
    roles: BTreeSet<String>,
}

/// Fixed account table.
///
/// Secrets are compared in constant time. An unknown identity is compared
/// against a placeholder so both halves of a failed pair take the same path.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialPolicy {
    accounts: HashMap<String, Account>,
}

impl StaticCredentialPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account. Replaces an existing account with the same identity.
    #[must_use]
    pub fn with_account<I, R>(
        mut self,
        identity: impl Into<String>,
        secret: impl Into<String>,
        roles: I,
    ) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.accounts.insert(
            identity.into(),
            Account {
                secret: secret.into(),
                roles: roles.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    /// The demo accounts: `sherlock` and `watson`, secret `password`, no roles.
    #[must_use]
    pub fn demo() -> Self {
        Self::new()
            .with_account("sherlock", "password", Vec::<String>::new())
            .with_account("watson", "password", Vec::<String>::new())
    }
}

const PLACEHOLDER_SECRET: &str = "\0relay-placeholder-secret\0";

impl CredentialPolicy for StaticCredentialPolicy {
    fn matches(&self, identity: &str, secret: &str) -> bool {
        let (expected, known) = match self.accounts.get(identity) {
            Some(account) => (account.secret.as_str(), true),
            None => (PLACEHOLDER_SECRET, false),
        };
        let secret_ok: bool = expected.as_bytes().ct_eq(secret.as_bytes()).into();
        known & secret_ok
    }

    fn roles(&self, identity: &str) -> BTreeSet<String> {
        self.accounts
            .get(identity)
            .map(|account| account.roles.clone())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sherlock_with_password_is_authenticated() {
        let authenticator = CredentialAuthenticator::new(StaticCredentialPolicy::demo());
        let result = authenticator.authenticate("sherlock", "password");
        assert_eq!(result.principal(), Some("sherlock"));
        let auth = result.authentication().unwrap();
        assert!(auth.roles().is_empty());
        assert!(auth.access_token().is_none());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let authenticator = CredentialAuthenticator::new(StaticCredentialPolicy::demo());
        let result = authenticator.authenticate("sherlock", "wrong");
        assert_eq!(
            result,
            AuthenticationResult::rejected(reject_reasons::INVALID_CREDENTIALS)
        );
    }

    #[test]
    fn unknown_identity_is_rejected_even_with_placeholder_secret() {
        let authenticator = CredentialAuthenticator::new(StaticCredentialPolicy::demo());
        assert!(!authenticator
            .authenticate("moriarty", "password")
            .is_authenticated());
        assert!(!authenticator
            .authenticate("moriarty", PLACEHOLDER_SECRET)
            .is_authenticated());
    }

    #[test]
    fn policy_roles_are_attached() {
        let policy =
            StaticCredentialPolicy::new().with_account("mycroft", "diogenes", ["ROLE_ADMIN"]);
        let authenticator = CredentialAuthenticator::new(policy);
        let result = authenticator.authenticate("mycroft", "diogenes");
        assert!(result.authentication().unwrap().has_role("ROLE_ADMIN"));
    }

    #[test]
    fn closure_policy_is_pluggable() {
        let authenticator =
            CredentialAuthenticator::new(|identity: &str, secret: &str| identity == secret);
        assert!(authenticator.authenticate("same", "same").is_authenticated());
        assert!(!authenticator.authenticate("same", "other").is_authenticated());
    }
}
