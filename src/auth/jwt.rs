/// Token codec: signing and verification of access and refresh tokens.
///
/// Verification failures collapse into exactly two caller-visible kinds,
/// `TokenExpired` and `TokenInvalid`; everything else is an internal error.
/// Callers branch on the variant, never on message text.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::{AccessClaims, RefreshClaims, REFRESH_TOKEN_TYPE};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

fn classify(err: jsonwebtoken::errors::Error) -> AppError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::ExpiredSignature => AppError::Auth(AuthError::TokenExpired),
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::ImmatureSignature
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AppError::Auth(AuthError::TokenInvalid),
        _ => AppError::Internal(format!("Token verification failed: {}", err)),
    }
}

fn validation_for(config: &JwtSettings) -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);
    validation.set_audience(&[&config.audience]);
    validation
}

/// Sign a new access token carrying the user's identity projection.
pub fn sign_access_token(
    user_id: Uuid,
    email: &str,
    role: &str,
    config: &JwtSettings,
) -> Result<String, AppError> {
    let claims = AccessClaims::new(
        user_id,
        email.to_string(),
        role.to_string(),
        config.access_token_expiry,
        config.issuer.clone(),
        config.audience.clone(),
    );

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.access_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

/// Verify an access token and return its claims.
pub fn verify_access_token(token: &str, config: &JwtSettings) -> Result<AccessClaims, AppError> {
    decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(config.access_secret.as_bytes()),
        &validation_for(config),
    )
    .map(|data| data.claims)
    .map_err(classify)
}

/// Sign a new refresh token. Lifetime is 7 days, or 30 under remember-me.
pub fn sign_refresh_token(config: &JwtSettings, remember_me: bool) -> Result<String, AppError> {
    let expiry = if remember_me {
        config.remember_me_expiry
    } else {
        config.refresh_token_expiry
    };
    let claims = RefreshClaims::new(expiry, config.issuer.clone(), config.audience.clone());

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.refresh_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

/// Verify a refresh token's signature, expiry, and type marker.
///
/// This proves only that the server minted the token and it is still within
/// its signed lifetime; whether it is still *active* is the store's call.
pub fn verify_refresh_token(token: &str, config: &JwtSettings) -> Result<RefreshClaims, AppError> {
    let claims = decode::<RefreshClaims>(
        token,
        &DecodingKey::from_secret(config.refresh_secret.as_bytes()),
        &validation_for(config),
    )
    .map(|data| data.claims)
    .map_err(classify)?;

    if claims.token_type != REFRESH_TOKEN_TYPE {
        return Err(AppError::Auth(AuthError::TokenInvalid));
    }

    Ok(claims)
}
