use std::collections::HashSet;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use orgguard_core::{PrincipalId, RoleId, TenantId};

/// Session claims supplied by the identity provider.
///
/// Created at authentication and read-only for the rest of the request. The
/// authorization core never persists them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: PrincipalId,
    pub email: String,

    /// Active organization (tenant) for this session.
    pub org_id: TenantId,

    /// Roles held in `org_id`.
    #[serde(default)]
    pub role_ids: Vec<RoleId>,

    /// Literal role name, only consulted by the legacy bypass.
    #[serde(default)]
    pub role_name: Option<String>,

    #[serde(default)]
    pub is_super_admin: bool,

    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("session has expired")]
    Expired,

    #[error("session not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid session time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("invalid session token: {0}")]
    InvalidToken(String),
}

/// Deterministically validate the claims' time window.
///
/// Signature checks belong to the [`SessionClaimsResolver`] implementation.
pub fn validate_claims(claims: &SessionClaims, now: DateTime<Utc>) -> Result<(), ClaimsError> {
    if claims.expires_at <= claims.issued_at {
        return Err(ClaimsError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(ClaimsError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(ClaimsError::Expired);
    }
    Ok(())
}

/// Maps an opaque session token to validated claims.
pub trait SessionClaimsResolver: Send + Sync {
    fn resolve(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, ClaimsError>;
}

/// HS256-signed JWT whose payload is a serialized [`SessionClaims`].
pub struct Hs256SessionResolver {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256SessionResolver {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry lives in `expires_at` and is checked by `validate_claims`.
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl SessionClaimsResolver for Hs256SessionResolver {
    fn resolve(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, ClaimsError> {
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.key, &self.validation)
            .map_err(|e| ClaimsError::InvalidToken(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}
