/// Request authentication gate.
///
/// Extracts an access token (Authorization bearer header first, then the
/// access-token cookie), verifies it, re-loads the user's current status
/// from the database, and attaches the authenticated identity to the
/// request extensions for downstream handlers.
///
/// The claims in a token are a snapshot from issuance; the per-request
/// status re-check is what closes the window where a suspended account's
/// still-valid token would keep working for the rest of its lifetime.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use sqlx::PgPool;
use std::rc::Rc;
use uuid::Uuid;

use crate::auth::verify_access_token;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Identity attached to the request after a successful gate pass.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: String,
    pub role: String,
}

/// JWT middleware for protecting routes.
pub struct JwtMiddleware {
    jwt_config: JwtSettings,
}

impl JwtMiddleware {
    pub fn new(jwt_config: JwtSettings) -> Self {
        Self { jwt_config }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            jwt_config: self.jwt_config.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    jwt_config: JwtSettings,
}

/// Bearer header takes precedence over the cookie.
fn extract_token(req: &ServiceRequest) -> Option<String> {
    let bearer = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    bearer.or_else(|| req.cookie(ACCESS_TOKEN_COOKIE).map(|c| c.value().to_string()))
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let jwt_config = self.jwt_config.clone();
        let service = self.service.clone();

        Box::pin(async move {
            let token = match extract_token(&req) {
                Some(token) => token,
                None => {
                    tracing::warn!("Request without authentication token");
                    return Err(AppError::Auth(AuthError::MissingToken).into());
                }
            };

            // Expired and invalid come back as distinct codes, so the
            // client knows whether to refresh or to re-login.
            let claims = match verify_access_token(&token, &jwt_config) {
                Ok(claims) => claims,
                Err(e) => {
                    tracing::warn!(error = %e, "Access token rejected");
                    return Err(e.into());
                }
            };
            let user_id = claims.user_id()?;

            let pool = req
                .app_data::<web::Data<PgPool>>()
                .cloned()
                .ok_or_else(|| AppError::Internal("Database pool not configured".to_string()))?;

            // Claims are only trusted for identity; status comes from the
            // source of truth on every request.
            let user = sqlx::query_as::<_, (String, String, bool)>(
                "SELECT email, role, is_active FROM users WHERE id = $1",
            )
            .bind(user_id)
            .fetch_optional(pool.get_ref())
            .await
            .map_err(AppError::from)?;

            match user {
                Some((email, role, true)) => {
                    req.extensions_mut().insert(AuthenticatedUser {
                        id: user_id,
                        email,
                        role,
                    });
                    tracing::debug!(user_id = %user_id, "Request authenticated");
                    service.call(req).await
                }
                Some((_, _, false)) => {
                    tracing::warn!(user_id = %user_id, "Token for inactive account rejected");
                    Err(AppError::Auth(AuthError::AccountInactive).into())
                }
                None => {
                    tracing::warn!(user_id = %user_id, "Token for deleted account rejected");
                    Err(AppError::Auth(AuthError::AccountInactive).into())
                }
            }
        })
    }
}
