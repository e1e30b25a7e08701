use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::errors::DataServiceError;

/// The authenticated user as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub email: Option<String>,
}

/// Bearer token for the hosted service. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Claims we read out of a JWT payload.
#[derive(Deserialize)]
struct TokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

/// Explicit session value threaded through every backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user: UserIdentity,
    pub token: Option<AccessToken>,
}

impl SessionContext {
    /// Session for a known user without a bearer token (local backend).
    pub fn for_user(user: UserIdentity) -> Self {
        Self { user, token: None }
    }

    /// Builds a session from a JWT access token by decoding its payload.
    ///
    /// The signature is not verified here; the hosted service does that on
    /// every request carrying the token.
    pub fn from_access_token(token: &str) -> Result<Self, DataServiceError> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| DataServiceError::Unauthenticated("malformed access token".to_string()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| DataServiceError::Unauthenticated(format!("token payload: {}", e)))?;
        let claims: TokenClaims = serde_json::from_slice(&bytes)
            .map_err(|e| DataServiceError::Unauthenticated(format!("token claims: {}", e)))?;
        Ok(Self {
            user: UserIdentity {
                id: claims.sub,
                email: claims.email,
            },
            token: Some(AccessToken::new(token)),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn bearer(&self) -> Option<&str> {
        self.token.as_ref().map(AccessToken::expose)
    }
}
