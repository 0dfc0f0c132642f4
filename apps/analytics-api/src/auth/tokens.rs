//! Dashboard bearer tokens (HS256 JWT, `sub` = user id).

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Token lifetime in seconds (12 hours).
pub const TOKEN_TTL_SECS: i64 = 12 * 3600;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issue a dashboard token for `user_id`.
pub fn issue_token(secret: &str, user_id: &str, ttl_secs: i64) -> Result<String, ApiError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| {
        tracing::error!(?err, "failed to sign token");
        ApiError::internal("An internal error occurred")
    })
}

/// Validate a dashboard token and return its claims.
pub fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let token = issue_token("secret", "usr_1", 60).unwrap();
        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.sub, "usr_1");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token("secret", "usr_1", 60).unwrap();
        assert!(verify_token("other", &token).is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_token("secret", "usr_1", -3600).unwrap();
        assert!(verify_token("secret", &token).is_none());
    }
}
