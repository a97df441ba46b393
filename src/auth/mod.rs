//! JWT authentication
//!
//! Bearer-token auth for the gateway. The middleware verifies the token and
//! injects an [`AuthenticatedUser`] into request extensions; handlers extract
//! it and never see the raw token.

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::gateway::state::AppState;
use crate::gateway::types::ApiError;
use crate::transfer::{Caller, TransferError};

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// user_id as string
    pub sub: String,
    /// Expiration (UTC timestamp)
    pub exp: usize,
    /// Issued at
    pub iat: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Identity injected into request extensions after verification
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub elevated: bool,
}

impl AuthenticatedUser {
    pub fn caller(&self) -> Caller {
        Caller {
            user_id: self.user_id,
            elevated: self.elevated,
        }
    }
}

pub struct AuthService {
    jwt_secret: String,
}

impl AuthService {
    pub fn new(jwt_secret: String) -> Self {
        Self { jwt_secret }
    }

    /// Issue a token for `user_id`, valid for 24 hours
    pub fn issue_token(&self, user_id: i64, role: Option<String>) -> anyhow::Result<String> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(Duration::hours(24))
            .ok_or_else(|| anyhow::anyhow!("Timestamp overflow"))?
            .timestamp();

        let claims = Claims {
            sub: user_id.to_string(),
            exp: expiration as usize,
            iat: now.timestamp() as usize,
            role,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Verify a token and map its claims to an identity
    pub fn verify_token(&self, token: &str) -> Result<AuthenticatedUser, TransferError> {
        let decoding_key = DecodingKey::from_secret(self.jwt_secret.as_bytes());
        let validation = Validation::new(Algorithm::HS256);
        let token_data = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|_| TransferError::Unauthorized)?;

        let user_id = token_data
            .claims
            .sub
            .parse::<i64>()
            .map_err(|_| TransferError::Unauthorized)?;

        Ok(AuthenticatedUser {
            user_id,
            elevated: token_data.claims.role.as_deref() == Some("admin"),
        })
    }
}

pub async fn jwt_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(TransferError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(TransferError::Unauthorized)?;

    let user = state.auth.verify_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let auth = AuthService::new("test-secret".to_string());
        let token = auth.issue_token(42, None).unwrap();

        let user = auth.verify_token(&token).unwrap();
        assert_eq!(user.user_id, 42);
        assert!(!user.elevated);
    }

    #[test]
    fn test_admin_role_grants_elevation() {
        let auth = AuthService::new("test-secret".to_string());
        let token = auth.issue_token(7, Some("admin".to_string())).unwrap();

        let user = auth.verify_token(&token).unwrap();
        assert!(user.elevated);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = AuthService::new("secret-a".to_string());
        let verifier = AuthService::new("secret-b".to_string());
        let token = issuer.issue_token(1, None).unwrap();

        assert!(matches!(
            verifier.verify_token(&token),
            Err(TransferError::Unauthorized)
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let auth = AuthService::new("test-secret".to_string());
        assert!(matches!(
            auth.verify_token("not-a-jwt"),
            Err(TransferError::Unauthorized)
        ));
    }
}
