/// Session Manager
///
/// Orchestrates token issuance, rotation, and revocation on top of the
/// codec and the token store. A refresh-token lineage moves
/// Active -> Rotated or Active -> Revoked, then gets purged; it never
/// returns to Active.

use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{self, AuditAction, AuditEntry};
use crate::auth::jwt::{sign_access_token, sign_refresh_token, verify_refresh_token};
use crate::auth::token_store;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// The transient result of issuance or rotation. Returned once, never
/// reconstructed from storage.
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token time-to-live in seconds
    pub expires_in: i64,
}

/// Per-request context forwarded into stored records and audit entries.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub device_fingerprint: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(sqlx::FromRow)]
struct UserProjection {
    id: Uuid,
    email: String,
    role: String,
}

#[derive(Clone)]
pub struct SessionManager {
    pool: PgPool,
    jwt: JwtSettings,
}

impl SessionManager {
    pub fn new(pool: PgPool, jwt: JwtSettings) -> Self {
        Self { pool, jwt }
    }

    /// Issue a fresh access/refresh pair for a live user.
    ///
    /// # Errors
    /// `UserNotFound` if the user row is gone or inactive by the time the
    /// pair is minted (e.g. deleted between trigger and execution).
    pub async fn create_token_pair(
        &self,
        user_id: Uuid,
        ctx: &RequestContext,
        remember_me: bool,
    ) -> Result<TokenPair, AppError> {
        let user = sqlx::query_as::<_, UserProjection>(
            "SELECT id, email, role FROM users WHERE id = $1 AND is_active = true",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::Auth(AuthError::UserNotFound))?;

        let access_token = sign_access_token(user.id, &user.email, &user.role, &self.jwt)?;
        let refresh_token = sign_refresh_token(&self.jwt, remember_me)?;

        let lifetime = if remember_me {
            self.jwt.remember_me_expiry
        } else {
            self.jwt.refresh_token_expiry
        };
        let expires_at = Utc::now() + Duration::seconds(lifetime);

        let record_id = token_store::store_refresh_token(
            &self.pool,
            user.id,
            &refresh_token,
            ctx.device_fingerprint.as_deref(),
            ctx.ip_address.as_deref(),
            ctx.user_agent.as_deref(),
            expires_at,
        )
        .await?;

        audit::record(
            &self.pool,
            AuditEntry::new(AuditAction::TokenRefreshCreated)
                .actor(user.id)
                .target("refresh_token", record_id)
                .metadata(serde_json::json!({
                    "device_fingerprint": ctx.device_fingerprint,
                    "remember_me": remember_me,
                }))
                .request_context(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
        )
        .await;

        tracing::debug!(user_id = %user.id, record_id = %record_id, "Issued token pair");

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.jwt.access_token_expiry,
        })
    }

    /// Exchange a refresh token for a new pair, retiring the old one.
    ///
    /// Rotation is mandatory: a refresh token is single-use, and reuse after
    /// rotation fails with `TokenNotFoundOrInactive`. Signature and claims
    /// are checked before any storage lookup, so forged or expired tokens
    /// fail fast without touching the database.
    ///
    /// Returns the pair together with whether the lineage was issued under
    /// remember-me, so callers can keep cookie lifetimes consistent across
    /// rotations.
    pub async fn refresh_tokens(
        &self,
        presented_token: &str,
        ctx: &RequestContext,
    ) -> Result<(TokenPair, bool), AppError> {
        verify_refresh_token(presented_token, &self.jwt)?;

        let token_hash = token_store::hash_token(presented_token);
        let record = token_store::find_active_by_hash(&self.pool, &token_hash)
            .await?
            .ok_or_else(|| {
                tracing::warn!("Refresh attempt with unknown or inactive token");
                AppError::Auth(AuthError::TokenNotFoundOrInactive)
            })?;

        // The signed exp and the stored expiry are both checked; either
        // being past is enough to reject.
        if record.expires_at < Utc::now() {
            token_store::deactivate(&self.pool, record.id).await?;
            tracing::info!(user_id = %record.user_id, "Refresh token past stored expiry");
            return Err(AppError::Auth(AuthError::TokenExpired));
        }

        // Conditional update: under a double-refresh race exactly one caller
        // flips the row, the other lands here with zero rows affected.
        if !token_store::deactivate(&self.pool, record.id).await? {
            tracing::warn!(
                user_id = %record.user_id,
                "Refresh token already rotated by a concurrent request"
            );
            return Err(AppError::Auth(AuthError::TokenNotFoundOrInactive));
        }

        // Preserve the remember-me lifetime the lineage was issued with.
        let issued_lifetime = (record.expires_at - record.created_at).num_seconds();
        let remember_me = issued_lifetime > self.jwt.refresh_token_expiry;

        let pair = self.create_token_pair(record.user_id, ctx, remember_me).await?;

        audit::record(
            &self.pool,
            AuditEntry::new(AuditAction::TokenRefreshed)
                .actor(record.user_id)
                .target("refresh_token", record.id)
                .request_context(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
        )
        .await;

        Ok((pair, remember_me))
    }

    /// Revoke a single refresh token. When `user_id` is supplied the
    /// deactivation is scoped to that user, so a token hash colliding with
    /// another user's record cannot be revoked cross-tenant.
    pub async fn revoke_refresh_token(
        &self,
        presented_token: &str,
        user_id: Option<Uuid>,
    ) -> Result<(), AppError> {
        let token_hash = token_store::hash_token(presented_token);

        if !token_store::deactivate_by_hash(&self.pool, &token_hash, user_id).await? {
            return Err(AppError::Auth(AuthError::TokenNotFoundOrInactive));
        }

        tracing::info!("Refresh token revoked");
        Ok(())
    }

    /// Revoke every active refresh token a user holds. Used on password
    /// change and reset to force re-authentication everywhere.
    pub async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<u64, AppError> {
        let revoked = token_store::deactivate_all_for_user(&self.pool, user_id).await?;
        tracing::info!(user_id = %user_id, revoked = revoked, "All refresh tokens revoked");
        Ok(revoked)
    }

    /// Delete token rows that can no longer authorize anything. Idempotent
    /// and safe to run from multiple processes.
    pub async fn cleanup_expired_tokens(&self) -> Result<u64, AppError> {
        let purged = token_store::purge_expired_inactive(&self.pool).await?;
        if purged > 0 {
            tracing::info!(purged = purged, "Purged expired token records");
        }
        Ok(purged)
    }
}
