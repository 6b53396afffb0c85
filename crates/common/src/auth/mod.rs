//! Authentication utilities
//!
//! Provides:
//! - Session token issuing and validation (JWT)
//! - Institutional email domain enforcement
//! - Axum extractors for the signed-in identity

use crate::domain::Identity;
use crate::errors::{AppError, Result};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (identity-provider uid)
    pub sub: String,

    /// Account email
    pub email: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Session token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
    allowed_domain: String,
}

impl JwtManager {
    /// Create a new manager; only identities of `allowed_domain` are accepted
    pub fn new(secret: &str, expiration_secs: u64, allowed_domain: impl Into<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: expiration_secs as i64,
            allowed_domain: allowed_domain.into(),
        }
    }

    pub fn allowed_domain(&self) -> &str {
        &self.allowed_domain
    }

    /// Issue a session token for an identity
    pub fn issue(&self, identity: &Identity) -> Result<String> {
        ensure_domain(identity, &self.allowed_domain)?;

        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = SessionClaims {
            sub: identity.uid.to_string(),
            email: identity.email.clone(),
            name: identity.display_name.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| AppError::Internal {
            message: format!("Failed to issue token: {}", e),
        })
    }

    /// Validate a token and return the identity it carries
    pub fn verify(&self, token: &str) -> Result<Identity> {
        let claims = decode::<SessionClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::InvalidToken,
            })?;

        let identity = Identity::new(claims.sub, claims.email, claims.name);
        ensure_domain(&identity, &self.allowed_domain)?;
        Ok(identity)
    }
}

/// Reject identities outside the institutional domain
pub fn ensure_domain(identity: &Identity, domain: &str) -> Result<()> {
    if identity.belongs_to(domain) {
        Ok(())
    } else {
        Err(AppError::DomainRestricted {
            domain: domain.to_string(),
        })
    }
}

/// Extract the token from an Authorization header
pub fn bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Signed-in caller, available to handlers
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub identity: Identity,

    /// Request ID for tracing
    pub request_id: String,
}

/// Caller that may or may not be signed in
#[derive(Debug, Clone)]
pub struct MaybeAuth(pub Option<AuthContext>);

impl MaybeAuth {
    /// The identity, or an auth-required error naming the attempted action
    pub fn require(self, action: &str) -> Result<AuthContext> {
        self.0.ok_or_else(|| AppError::AuthRequired {
            action: action.to_string(),
        })
    }
}

fn request_id(parts: &Parts) -> String {
    parts
        .headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn authenticate(parts: &Parts, tokens: &JwtManager) -> Result<Option<AuthContext>> {
    let Some(header) = parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
    else {
        return Ok(None);
    };

    let token = bearer_token(header).ok_or(AppError::InvalidToken)?;
    let identity = tokens.verify(token)?;

    Ok(Some(AuthContext {
        identity,
        request_id: request_id(parts),
    }))
}

/// Axum extractor for AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
    Arc<JwtManager>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let tokens = Arc::<JwtManager>::from_ref(state);
        authenticate(parts, &tokens)?.ok_or_else(|| AppError::AuthRequired {
            action: "continue".to_string(),
        })
    }
}

impl<S> FromRequestParts<S> for MaybeAuth
where
    S: Send + Sync,
    Arc<JwtManager>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let tokens = Arc::<JwtManager>::from_ref(state);
        authenticate(parts, &tokens).map(MaybeAuth)
    }
}
