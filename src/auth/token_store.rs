/// Token Store
///
/// Persistence for refresh-token and password-reset-token records. Every
/// lookup is keyed by the SHA-256 hash of the raw token; plaintext token
/// values never reach the database, so presenting a token is "hash it,
/// exact-match lookup" with no timing-sensitive comparison anywhere.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

/// Generate an opaque single-use token for password resets: 64 random
/// alphanumeric characters. The raw value goes to the user once; only the
/// hash is stored.
pub fn generate_reset_token() -> String {
    use rand::distributions::Alphanumeric;
    use rand::{thread_rng, Rng};

    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// SHA-256 hex digest of a raw token. The stored column is this value.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub device_fingerprint: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PasswordResetTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Insert an active refresh-token record for `user_id`. Returns the new
/// record id.
pub async fn store_refresh_token(
    pool: &PgPool,
    user_id: Uuid,
    raw_token: &str,
    device_fingerprint: Option<&str>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
    expires_at: DateTime<Utc>,
) -> Result<Uuid, AppError> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens
            (id, user_id, token_hash, device_fingerprint, expires_at, is_active,
             created_at, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5, true, $6, $7, $8)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(hash_token(raw_token))
    .bind(device_fingerprint)
    .bind(expires_at)
    .bind(Utc::now())
    .bind(ip_address)
    .bind(user_agent)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Look up an **active** refresh-token record by hash. Rotated, revoked, and
/// never-issued tokens all come back as `None`.
pub async fn find_active_by_hash(
    pool: &PgPool,
    token_hash: &str,
) -> Result<Option<RefreshTokenRecord>, AppError> {
    let record = sqlx::query_as::<_, RefreshTokenRecord>(
        r#"
        SELECT id, user_id, token_hash, device_fingerprint, expires_at, is_active,
               last_used_at, created_at, ip_address, user_agent
        FROM refresh_tokens
        WHERE token_hash = $1 AND is_active = true
        "#,
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Conditionally deactivate one record, stamping `last_used_at`.
///
/// Returns whether a row actually flipped. The `is_active = true` guard is
/// the arbiter for concurrent refresh attempts: of two racing rotations,
/// exactly one sees a row flip and the other gets `false`.
pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE refresh_tokens
        SET is_active = false, last_used_at = $1
        WHERE id = $2 AND is_active = true
        "#,
    )
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Deactivate a record by hash, optionally scoped to a user. Returns whether
/// a row flipped.
pub async fn deactivate_by_hash(
    pool: &PgPool,
    token_hash: &str,
    user_id: Option<Uuid>,
) -> Result<bool, AppError> {
    let result = match user_id {
        Some(uid) => {
            sqlx::query(
                r#"
                UPDATE refresh_tokens
                SET is_active = false, last_used_at = $1
                WHERE token_hash = $2 AND user_id = $3 AND is_active = true
                "#,
            )
            .bind(Utc::now())
            .bind(token_hash)
            .bind(uid)
            .execute(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                UPDATE refresh_tokens
                SET is_active = false, last_used_at = $1
                WHERE token_hash = $2 AND is_active = true
                "#,
            )
            .bind(Utc::now())
            .bind(token_hash)
            .execute(pool)
            .await?
        }
    };

    Ok(result.rows_affected() > 0)
}

/// Deactivate every active refresh token a user holds. Returns the count.
pub async fn deactivate_all_for_user(pool: &PgPool, user_id: Uuid) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE refresh_tokens
        SET is_active = false
        WHERE user_id = $1 AND is_active = true
        "#,
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Delete token rows that can no longer authorize anything: refresh rows
/// that are both inactive and past expiry, reset rows that are used or past
/// expiry. Never touches a live row, so it is safe to run concurrently.
pub async fn purge_expired_inactive(pool: &PgPool) -> Result<u64, AppError> {
    let now = Utc::now();

    let refresh = sqlx::query(
        "DELETE FROM refresh_tokens WHERE is_active = false AND expires_at < $1",
    )
    .bind(now)
    .execute(pool)
    .await?;

    // Most reset tokens are requested and never confirmed; expiry alone is
    // enough to reclaim those rows.
    let reset = sqlx::query(
        "DELETE FROM password_reset_tokens WHERE is_used = true OR expires_at < $1",
    )
    .bind(now)
    .execute(pool)
    .await?;

    Ok(refresh.rows_affected() + reset.rows_affected())
}

/// Insert a password-reset-token record. Returns the new record id.
pub async fn store_reset_token(
    pool: &PgPool,
    user_id: Uuid,
    raw_token: &str,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
    expires_at: DateTime<Utc>,
) -> Result<Uuid, AppError> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO password_reset_tokens
            (id, user_id, token_hash, expires_at, is_used, created_at, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, false, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(hash_token(raw_token))
    .bind(expires_at)
    .bind(Utc::now())
    .bind(ip_address)
    .bind(user_agent)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Look up a reset-token record by hash, in whatever state it is in.
/// Callers decide how used and expired rows are reported.
pub async fn find_reset_by_hash(
    pool: &PgPool,
    token_hash: &str,
) -> Result<Option<PasswordResetTokenRecord>, AppError> {
    let record = sqlx::query_as::<_, PasswordResetTokenRecord>(
        r#"
        SELECT id, user_id, token_hash, expires_at, is_used, used_at,
               created_at, ip_address, user_agent
        FROM password_reset_tokens
        WHERE token_hash = $1
        "#,
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Mark a reset token used. The guard makes a second marking report `false`,
/// so a token can authorize at most one reset even under concurrent attempts.
pub async fn mark_reset_used(pool: &PgPool, id: Uuid) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE password_reset_tokens
        SET is_used = true, used_at = $1
        WHERE id = $2 AND is_used = false
        "#,
    )
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
