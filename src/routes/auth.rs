/// Authentication routes: registration, login, token refresh, logout, and
/// password reset.
///
/// Login and reset-request deliberately answer the same way whether or not
/// the email exists; the real reason goes to the logs and the audit trail,
/// never to the caller.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{self, AuditAction, AuditEntry};
use crate::auth::{
    hash_password, token_store, validate_strength, verify_password, RequestContext,
    SessionManager, TokenPair,
};
use crate::auth::lockout;
use crate::configuration::{JwtSettings, LockoutSettings};
use crate::error::{AppError, AuthError, ValidationError};
use crate::middleware::{AuthenticatedUser, ACCESS_TOKEN_COOKIE};
use crate::validators::{is_valid_email, is_valid_name};

pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

const RESET_TOKEN_LIFETIME_SECS: i64 = 3600;
const RESET_REQUEST_MESSAGE: &str = "If this email exists, a reset link has been sent";

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
}

#[derive(Deserialize)]
pub struct ResetRequestBody {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetConfirmBody {
    pub token: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub created_at: String,
}

#[derive(sqlx::FromRow)]
struct LoginRow {
    id: Uuid,
    password_hash: String,
    is_active: bool,
    failed_login_attempts: i32,
    locked_until: Option<chrono::DateTime<Utc>>,
}

fn request_context(req: &HttpRequest, device_fingerprint: Option<String>) -> RequestContext {
    RequestContext {
        device_fingerprint,
        ip_address: req.connection_info().realip_remote_addr().map(str::to_string),
        user_agent: req
            .headers()
            .get("User-Agent")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string),
    }
}

/// Build the auth response: JSON body plus the cookie pair. The access
/// cookie is client-readable with a max-age matching the token TTL; the
/// refresh cookie is HttpOnly with the full refresh lifetime.
fn auth_response(
    status: actix_web::http::StatusCode,
    pair: TokenPair,
    jwt: &JwtSettings,
    remember_me: bool,
) -> HttpResponse {
    let refresh_lifetime = if remember_me {
        jwt.remember_me_expiry
    } else {
        jwt.refresh_token_expiry
    };

    let access_cookie = Cookie::build(ACCESS_TOKEN_COOKIE, pair.access_token.clone())
        .path("/")
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(jwt.access_token_expiry))
        .finish();

    let refresh_cookie = Cookie::build(REFRESH_TOKEN_COOKIE, pair.refresh_token.clone())
        .path("/auth")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(refresh_lifetime))
        .finish();

    HttpResponse::build(status)
        .cookie(access_cookie)
        .cookie(refresh_cookie)
        .json(AuthResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: pair.expires_in,
        })
}

fn expired_cookie(name: &str, path: &str) -> Cookie<'static> {
    Cookie::build(name.to_string(), "")
        .path(path.to_string())
        .max_age(CookieDuration::ZERO)
        .finish()
}

/// POST /auth/register
pub async fn register(
    req: HttpRequest,
    form: web::Json<RegisterRequest>,
    pool: web::Data<PgPool>,
    jwt: web::Data<JwtSettings>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&form.email)?;
    let name = is_valid_name(&form.name)?;

    let strength = validate_strength(&form.password);
    if !strength.valid {
        return Err(AppError::Validation(ValidationError::WeakPassword(
            strength.errors,
        )));
    }
    let password_hash = hash_password(&form.password)?;

    let user_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO users
            (id, email, name, password_hash, role, is_active,
             failed_login_attempts, created_at, updated_at)
        VALUES ($1, $2, $3, $4, 'member', true, 0, $5, $6)
        "#,
    )
    .bind(user_id)
    .bind(&email)
    .bind(&name)
    .bind(&password_hash)
    .bind(Utc::now())
    .bind(Utc::now())
    .execute(pool.get_ref())
    .await?;

    let ctx = request_context(&req, form.device_fingerprint.clone());
    let pair = sessions.create_token_pair(user_id, &ctx, false).await?;

    tracing::info!(user_id = %user_id, "User registered");

    Ok(auth_response(
        actix_web::http::StatusCode::CREATED,
        pair,
        jwt.get_ref(),
        false,
    ))
}

/// POST /auth/login
///
/// Unknown email and wrong password produce the same response. Lockout is
/// checked before password verification, so a locked account cannot be
/// password-probed while locked.
pub async fn login(
    req: HttpRequest,
    form: web::Json<LoginRequest>,
    pool: web::Data<PgPool>,
    jwt: web::Data<JwtSettings>,
    lockout_settings: web::Data<LockoutSettings>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&form.email)?;
    let ctx = request_context(&req, form.device_fingerprint.clone());

    let user = sqlx::query_as::<_, LoginRow>(
        r#"
        SELECT id, password_hash, is_active, failed_login_attempts, locked_until
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(pool.get_ref())
    .await?;

    let user = match user {
        Some(user) => user,
        None => {
            audit::record(
                pool.get_ref(),
                AuditEntry::new(AuditAction::LoginFailed)
                    .metadata(serde_json::json!({ "email": email }))
                    .request_context(ctx.ip_address.as_deref(), ctx.user_agent.as_deref())
                    .failure("unknown email"),
            )
            .await;
            return Err(AppError::Auth(AuthError::InvalidCredentials));
        }
    };

    if !user.is_active {
        audit::record(
            pool.get_ref(),
            AuditEntry::new(AuditAction::LoginFailed)
                .actor(user.id)
                .request_context(ctx.ip_address.as_deref(), ctx.user_agent.as_deref())
                .failure("account inactive"),
        )
        .await;
        return Err(AppError::Auth(AuthError::AccountInactive));
    }

    if let Err(locked) = lockout::check_lockout(user.locked_until) {
        audit::record(
            pool.get_ref(),
            AuditEntry::new(AuditAction::LoginFailed)
                .actor(user.id)
                .request_context(ctx.ip_address.as_deref(), ctx.user_agent.as_deref())
                .failure("account locked"),
        )
        .await;
        return Err(locked);
    }

    if !verify_password(&form.password, &user.password_hash) {
        let attempts = lockout::record_failed_attempt(
            pool.get_ref(),
            user.id,
            user.failed_login_attempts,
            lockout_settings.get_ref(),
        )
        .await?;

        audit::record(
            pool.get_ref(),
            AuditEntry::new(AuditAction::LoginFailed)
                .actor(user.id)
                .metadata(serde_json::json!({ "failed_attempts": attempts }))
                .request_context(ctx.ip_address.as_deref(), ctx.user_agent.as_deref())
                .failure("invalid password"),
        )
        .await;

        return Err(AppError::Auth(AuthError::InvalidCredentials));
    }

    lockout::reset_failed_attempts(pool.get_ref(), user.id).await?;
    sqlx::query("UPDATE users SET last_login_at = $1 WHERE id = $2")
        .bind(Utc::now())
        .bind(user.id)
        .execute(pool.get_ref())
        .await?;

    let pair = sessions.create_token_pair(user.id, &ctx, form.remember_me).await?;

    audit::record(
        pool.get_ref(),
        AuditEntry::new(AuditAction::LoginSuccess)
            .actor(user.id)
            .metadata(serde_json::json!({ "remember_me": form.remember_me }))
            .request_context(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
    )
    .await;

    tracing::info!(user_id = %user.id, "User logged in");

    Ok(auth_response(
        actix_web::http::StatusCode::OK,
        pair,
        jwt.get_ref(),
        form.remember_me,
    ))
}

/// POST /auth/refresh
///
/// Accepts the refresh token from the body or the HttpOnly cookie. The old
/// token is rotated out; presenting it again fails.
pub async fn refresh(
    req: HttpRequest,
    form: Option<web::Json<RefreshRequest>>,
    jwt: web::Data<JwtSettings>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let form = form.map(|f| f.into_inner()).unwrap_or_default();

    let presented = form
        .refresh_token
        .clone()
        .or_else(|| req.cookie(REFRESH_TOKEN_COOKIE).map(|c| c.value().to_string()))
        .ok_or(AppError::Auth(AuthError::MissingToken))?;

    let ctx = request_context(&req, form.device_fingerprint);
    let (pair, remember_me) = sessions.refresh_tokens(&presented, &ctx).await?;

    Ok(auth_response(
        actix_web::http::StatusCode::OK,
        pair,
        jwt.get_ref(),
        remember_me,
    ))
}

/// POST /auth/logout (authenticated)
///
/// Revokes the presented refresh token, scoped to the caller so a token
/// belonging to someone else cannot be revoked from here, and clears both
/// cookies. Logout is idempotent: an already-rotated token still logs out.
pub async fn logout(
    req: HttpRequest,
    user: web::ReqData<AuthenticatedUser>,
    form: Option<web::Json<RefreshRequest>>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let presented = form
        .and_then(|f| f.into_inner().refresh_token)
        .or_else(|| req.cookie(REFRESH_TOKEN_COOKIE).map(|c| c.value().to_string()));

    if let Some(token) = presented {
        match sessions.revoke_refresh_token(&token, Some(user.id)).await {
            Ok(()) => {}
            Err(AppError::Auth(AuthError::TokenNotFoundOrInactive)) => {
                tracing::debug!(user_id = %user.id, "Logout with already-inactive token");
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(user_id = %user.id, "User logged out");

    Ok(HttpResponse::Ok()
        .cookie(expired_cookie(ACCESS_TOKEN_COOKIE, "/"))
        .cookie(expired_cookie(REFRESH_TOKEN_COOKIE, "/auth"))
        .json(serde_json::json!({ "message": "Logged out" })))
}

/// POST /auth/logout-all (authenticated)
///
/// Revokes every active refresh token the caller holds, on every device.
pub async fn logout_all(
    user: web::ReqData<AuthenticatedUser>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let revoked = sessions.revoke_all_refresh_tokens(user.id).await?;

    Ok(HttpResponse::Ok()
        .cookie(expired_cookie(ACCESS_TOKEN_COOKIE, "/"))
        .cookie(expired_cookie(REFRESH_TOKEN_COOKIE, "/auth"))
        .json(serde_json::json!({ "message": "Logged out everywhere", "revoked": revoked })))
}

/// POST /auth/password-reset/request
///
/// Always answers with the same message; whether a token was issued is not
/// observable from the response.
pub async fn request_password_reset(
    req: HttpRequest,
    form: web::Json<ResetRequestBody>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&form.email)?;
    let ctx = request_context(&req, None);

    let user = sqlx::query_as::<_, (Uuid,)>(
        "SELECT id FROM users WHERE email = $1 AND is_active = true",
    )
    .bind(&email)
    .fetch_optional(pool.get_ref())
    .await?;

    if let Some((user_id,)) = user {
        let raw_token = token_store::generate_reset_token();
        let expires_at = Utc::now() + Duration::seconds(RESET_TOKEN_LIFETIME_SECS);

        let record_id = token_store::store_reset_token(
            pool.get_ref(),
            user_id,
            &raw_token,
            ctx.ip_address.as_deref(),
            ctx.user_agent.as_deref(),
            expires_at,
        )
        .await?;

        // TODO: hand raw_token to the mailer once email delivery is wired
        // up; delivery is an external collaborator of this subsystem.
        audit::record(
            pool.get_ref(),
            AuditEntry::new(AuditAction::PasswordResetRequested)
                .actor(user_id)
                .target("password_reset_token", record_id)
                .request_context(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
        )
        .await;

        tracing::info!(user_id = %user_id, "Password reset token issued");
    } else {
        tracing::info!("Password reset requested for unknown or inactive email");
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": RESET_REQUEST_MESSAGE })))
}

/// POST /auth/password-reset/confirm
///
/// A reset token authorizes exactly one reset. On success every refresh
/// token the user holds is revoked, forcing re-authentication everywhere.
pub async fn confirm_password_reset(
    req: HttpRequest,
    form: web::Json<ResetConfirmBody>,
    pool: web::Data<PgPool>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let ctx = request_context(&req, None);

    let strength = validate_strength(&form.new_password);
    if !strength.valid {
        return Err(AppError::Validation(ValidationError::WeakPassword(
            strength.errors,
        )));
    }

    let token_hash = token_store::hash_token(&form.token);
    let record = token_store::find_reset_by_hash(pool.get_ref(), &token_hash)
        .await?
        .ok_or(AppError::Auth(AuthError::TokenNotFoundOrInactive))?;

    if record.is_used {
        tracing::warn!(user_id = %record.user_id, "Reuse of a consumed reset token");
        return Err(AppError::Auth(AuthError::TokenNotFoundOrInactive));
    }
    if record.expires_at < Utc::now() {
        return Err(AppError::Auth(AuthError::TokenExpired));
    }

    // Conditional update; a concurrent confirm with the same token loses.
    if !token_store::mark_reset_used(pool.get_ref(), record.id).await? {
        return Err(AppError::Auth(AuthError::TokenNotFoundOrInactive));
    }

    let password_hash = hash_password(&form.new_password)?;
    sqlx::query(
        r#"
        UPDATE users
        SET password_hash = $1, failed_login_attempts = 0, locked_until = NULL,
            updated_at = $2
        WHERE id = $3
        "#,
    )
    .bind(&password_hash)
    .bind(Utc::now())
    .bind(record.user_id)
    .execute(pool.get_ref())
    .await?;

    sessions.revoke_all_refresh_tokens(record.user_id).await?;

    audit::record(
        pool.get_ref(),
        AuditEntry::new(AuditAction::PasswordReset)
            .actor(record.user_id)
            .target("password_reset_token", record.id)
            .request_context(ctx.ip_address.as_deref(), ctx.user_agent.as_deref()),
    )
    .await;

    tracing::info!(user_id = %record.user_id, "Password reset completed");

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Password has been reset" })))
}

/// GET /auth/me (authenticated)
pub async fn get_current_user(
    user: web::ReqData<AuthenticatedUser>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, AppError> {
    let row = sqlx::query_as::<_, (Uuid, String, String, String, chrono::DateTime<Utc>)>(
        "SELECT id, email, name, role, created_at FROM users WHERE id = $1 AND is_active = true",
    )
    .bind(user.id)
    .fetch_one(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(UserResponse {
        id: row.0.to_string(),
        email: row.1,
        name: row.2,
        role: row.3,
        created_at: row.4.to_rfc3339(),
    }))
}
