//! App assertion signing.
//!
//! GitHub Apps authenticate app-level calls with a short-lived JWT signed with
//! the app's RSA private key. The assertion is only ever used to list the
//! app's installations and to mint installation access tokens.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use super::error::AuthError;

/// Assertions are backdated to tolerate clock skew with GitHub.
pub const ASSERTION_BACKDATE_SECS: i64 = 10;

/// Lifetime of an assertion (GitHub allows at most 10 minutes).
pub const ASSERTION_LIFETIME_SECS: i64 = 600;

/// JWT claims for GitHub App authentication.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppClaims {
    /// Issued at time (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer - the GitHub App client ID
    pub iss: String,
}

/// A signed app assertion. Never persisted.
#[derive(Clone)]
pub struct SignedAssertion {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedAssertion")
            .field("value", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Sign an app assertion for `client_id` as of `now`.
///
/// The assertion is signed with RS256 and is valid from `now - 10s` until
/// `now + 600s`. A key that cannot be parsed fails with
/// [`AuthError::KeyParseFailure`]; waiting will not fix it.
pub fn sign_assertion(
    client_id: &str,
    private_key_pem: &str,
    now: DateTime<Utc>,
) -> Result<SignedAssertion, AuthError> {
    let issued_at = now - Duration::seconds(ASSERTION_BACKDATE_SECS);
    let expires_at = now + Duration::seconds(ASSERTION_LIFETIME_SECS);

    let claims = AppClaims {
        iat: issued_at.timestamp(),
        exp: expires_at.timestamp(),
        iss: client_id.to_string(),
    };

    let encoding_key =
        EncodingKey::from_rsa_pem(private_key_pem.as_bytes()).map_err(AuthError::KeyParseFailure)?;

    let value = encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(AuthError::SigningFailure)?;

    Ok(SignedAssertion {
        value,
        issued_at,
        expires_at,
    })
}

/// The app's identity, loaded once from configuration.
#[derive(Clone)]
pub struct AppIdentity {
    client_id: String,
    private_key_pem: String,
}

impl AppIdentity {
    pub fn new(client_id: impl Into<String>, private_key_pem: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            private_key_pem: private_key_pem.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Sign a fresh assertion for this app.
    pub fn sign(&self, now: DateTime<Utc>) -> Result<SignedAssertion, AuthError> {
        sign_assertion(&self.client_id, &self.private_key_pem, now)
    }
}

impl std::fmt::Debug for AppIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppIdentity")
            .field("client_id", &self.client_id)
            .field("private_key_pem", &"[REDACTED]")
            .finish()
    }
}
