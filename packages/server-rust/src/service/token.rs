//! Signed bearer tokens for locally authenticated principals.
//!
//! The access token becomes the propagation token of credential-path
//! requests. Refresh tokens are validated here; access tokens presented by
//! inbound requests are verified elsewhere.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use relay_core::{Authentication, AuthenticationResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::config::RelayConfig;

const TOKEN_TYPE: &str = "Bearer";
const KIND_ACCESS: &str = "access";
const KIND_REFRESH: &str = "refresh";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    roles: Vec<String>,
    iat: u64,
    exp: u64,
    jti: String,
    kind: String,
}

/// Token pair handed back to a client after a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BearerAccessRefreshToken {
    pub username: String,
    pub roles: Vec<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("cannot issue tokens for a rejected authentication")]
    NotAuthenticated,
    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Refresh failures, reported with OAuth 2.0 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("invalid_grant: Refresh token is invalid")]
    InvalidGrant,
}

impl RefreshError {
    #[must_use]
    pub fn error_code(self) -> &'static str {
        match self {
            Self::InvalidGrant => "invalid_grant",
        }
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::InvalidGrant => "Refresh token is invalid",
        }
    }

    /// OAuth error response body.
    #[must_use]
    pub fn to_body(self) -> serde_json::Value {
        json!({
            "error": self.error_code(),
            "error_description": self.description(),
        })
    }
}

/// HS256 issuer for access/refresh token pairs.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            access_ttl,
            refresh_ttl,
        }
    }

    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.token_secret.as_bytes(),
            Duration::from_secs(config.access_token_ttl_secs),
            Duration::from_secs(config.refresh_token_ttl_secs),
        )
    }

    /// Issue a token pair for an authenticated result.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` for a `Rejected` result, `Signing` if encoding fails.
    pub fn issue(
        &self,
        result: &AuthenticationResult,
    ) -> Result<BearerAccessRefreshToken, TokenError> {
        let auth = result.authentication().ok_or(TokenError::NotAuthenticated)?;
        self.issue_for(auth)
    }

    /// Exchange a refresh token for a fresh pair.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` for anything that is not an unexpired refresh token
    /// signed by this issuer.
    pub fn refresh(&self, refresh_token: &str) -> Result<BearerAccessRefreshToken, RefreshError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(refresh_token, &self.decoding, &validation)
            .map_err(|err| {
                debug!(error = %err, "refresh token rejected");
                RefreshError::InvalidGrant
            })?
            .claims;
        if claims.kind != KIND_REFRESH {
            debug!(kind = %claims.kind, "refresh attempted with a non-refresh token");
            return Err(RefreshError::InvalidGrant);
        }

        let auth = Authentication::new(claims.sub).with_roles(claims.roles);
        self.issue_for(&auth).map_err(|_| RefreshError::InvalidGrant)
    }

    fn issue_for(&self, auth: &Authentication) -> Result<BearerAccessRefreshToken, TokenError> {
        let roles: Vec<String> = auth.roles().iter().cloned().collect();
        let access_token = self.sign(auth.principal(), &roles, KIND_ACCESS, self.access_ttl)?;
        let refresh_token = self.sign(auth.principal(), &roles, KIND_REFRESH, self.refresh_ttl)?;
        debug!(principal = auth.principal(), "bearer tokens issued");

        Ok(BearerAccessRefreshToken {
            username: auth.principal().to_string(),
            roles,
            access_token,
            refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.access_ttl.as_secs(),
        })
    }

    fn sign(
        &self,
        subject: &str,
        roles: &[String],
        kind: &str,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let claims = Claims {
            sub: subject.to_string(),
            roles: roles.to_vec(),
            iat: now,
            exp: now.saturating_add(ttl.as_secs()),
            jti: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}
