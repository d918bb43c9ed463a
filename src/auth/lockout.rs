/// Account lockout tracking.
///
/// Five failed logins inside the tracking window lock the account for the
/// configured duration; the lock releases by timestamp, no manual unlock.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::configuration::LockoutSettings;
use crate::error::{AppError, AuthError};

/// Reject if the account is currently locked. `Ok(())` otherwise.
pub fn check_lockout(locked_until: Option<DateTime<Utc>>) -> Result<(), AppError> {
    if let Some(locked_until) = locked_until {
        let now = Utc::now();
        if now < locked_until {
            let remaining = (locked_until - now).num_seconds().max(1);
            return Err(AppError::Auth(AuthError::AccountLocked {
                retry_after_secs: remaining,
            }));
        }
    }
    Ok(())
}

/// Record a failed login attempt, locking the account once the threshold is
/// reached. Returns the new failure count.
pub async fn record_failed_attempt(
    pool: &PgPool,
    user_id: Uuid,
    current_attempts: i32,
    settings: &LockoutSettings,
) -> Result<i32, AppError> {
    let new_count = current_attempts + 1;

    let locked_until = if new_count >= settings.max_failed_attempts {
        Some(Utc::now() + Duration::seconds(settings.lock_duration_seconds))
    } else {
        None
    };

    sqlx::query(
        r#"
        UPDATE users
        SET failed_login_attempts = $1,
            locked_until = COALESCE($2, locked_until),
            updated_at = $3
        WHERE id = $4
        "#,
    )
    .bind(new_count)
    .bind(locked_until)
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;

    if locked_until.is_some() {
        tracing::warn!(
            user_id = %user_id,
            failed_attempts = new_count,
            "Account locked after repeated failed logins"
        );
    }

    Ok(new_count)
}

/// Clear the failure counter and any lock on successful authentication.
pub async fn reset_failed_attempts(pool: &PgPool, user_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE users
        SET failed_login_attempts = 0, locked_until = NULL, updated_at = $1
        WHERE id = $2
        "#,
    )
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}
