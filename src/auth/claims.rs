/// JWT claim payloads (RFC 7519).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AuthError};

/// Claims carried by access tokens: the subject's identity projection plus
/// the standard registered claims.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessClaims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    pub email: String,
    pub role: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

impl AccessClaims {
    pub fn new(
        user_id: Uuid,
        email: String,
        role: String,
        expiry_seconds: i64,
        issuer: String,
        audience: String,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            email,
            role,
            iat: now,
            exp: now + expiry_seconds,
            iss: issuer,
            aud: audience,
        }
    }

    /// Extract the user ID from the subject claim.
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Auth(AuthError::TokenInvalid))
    }
}

/// Claims carried by refresh tokens. Deliberately identity-free: the signed
/// wrapper only proves this server minted the value and bounds its lifetime,
/// while ownership comes from the stored record looked up by hash.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefreshClaims {
    /// Type marker distinguishing refresh tokens from anything else signed
    /// with the same key.
    pub token_type: String,
    /// Random nonce so every issued token hashes to a distinct value.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

pub const REFRESH_TOKEN_TYPE: &str = "refresh";

impl RefreshClaims {
    pub fn new(expiry_seconds: i64, issuer: String, audience: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            token_type: REFRESH_TOKEN_TYPE.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + expiry_seconds,
            iss: issuer,
            aud: audience,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_claims_carry_identity_projection() {
        let user_id = Uuid::new_v4();
        let claims = AccessClaims::new(
            user_id,
            "test@example.com".to_string(),
            "member".to_string(),
            900,
            "platform".to_string(),
            "client".to_string(),
        );

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role, "member");
        assert_eq!(claims.exp - claims.iat, 900);
        assert_eq!(claims.user_id().unwrap(), user_id);
    }

    #[test]
    fn garbled_subject_is_rejected() {
        let mut claims = AccessClaims::new(
            Uuid::new_v4(),
            "test@example.com".to_string(),
            "member".to_string(),
            900,
            "platform".to_string(),
            "client".to_string(),
        );
        claims.sub = "not-a-uuid".to_string();

        assert!(claims.user_id().is_err());
    }

    #[test]
    fn refresh_claims_are_identity_free_and_unique() {
        let a = RefreshClaims::new(604800, "platform".to_string(), "client".to_string());
        let b = RefreshClaims::new(604800, "platform".to_string(), "client".to_string());

        assert_eq!(a.token_type, REFRESH_TOKEN_TYPE);
        assert_ne!(a.jti, b.jti);
    }
}
