// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bearer token authentication.
//!
//! Tokens are HS256 JWTs issued by the identity provider and carry the user
//! ID in `sub` and the account role in `role`.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use reboque_core::{Actor, Role};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::AppState;
use crate::error::ApiError;

/// Token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: String,
    /// Account role.
    pub role: Role,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
}

/// Signing and verification keys derived from the shared secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtKeys {
    /// Derive keys from an HS256 secret.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign a token for `user_id` valid for `ttl`.
    pub fn issue(
        &self,
        user_id: &str,
        role: Role,
        ttl: chrono::Duration,
    ) -> jsonwebtoken::errors::Result<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            exp: u64::try_from((chrono::Utc::now() + ttl).timestamp()).unwrap_or(0),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    /// Verify a token and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Rejected bearer token");
                ApiError::Unauthorized("invalid or expired token".to_string())
            })
    }
}

/// The authenticated caller, extracted from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Actor);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let claims = state.jwt.verify(token)?;
        Ok(Self(Actor::new(claims.sub, claims.role)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let keys = JwtKeys::new("secret");
        let token = keys
            .issue("drv-1", Role::Driver, chrono::Duration::hours(1))
            .unwrap();

        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, "drv-1");
        assert_eq!(claims.role, Role::Driver);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = JwtKeys::new("secret")
            .issue("cust-1", Role::Customer, chrono::Duration::hours(1))
            .unwrap();

        let err = JwtKeys::new("other").verify(&token).unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let keys = JwtKeys::new("secret");
        let token = keys
            .issue("cust-1", Role::Customer, chrono::Duration::minutes(-10))
            .unwrap();

        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        #[derive(Serialize)]
        struct Raw<'a> {
            sub: &'a str,
            role: &'a str,
            exp: u64,
        }
        let exp = u64::try_from((chrono::Utc::now() + chrono::Duration::hours(1)).timestamp())
            .unwrap();
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &Raw {
                sub: "x",
                role: "superuser",
                exp,
            },
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        assert!(JwtKeys::new("secret").verify(&token).is_err());
    }
}
