/// Append-only audit log for security-relevant actions.
///
/// The subsystem only ever inserts; rows are never updated or deleted.
/// Action tags are a closed vocabulary: extend by adding new tags, never by
/// repurposing existing ones.

use sqlx::PgPool;
use uuid::Uuid;

/// Enumerated audit action tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    LoginSuccess,
    LoginFailed,
    TokenRefreshCreated,
    TokenRefreshed,
    PasswordChanged,
    PasswordReset,
    PasswordResetRequested,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::LoginSuccess => "LOGIN_SUCCESS",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::TokenRefreshCreated => "TOKEN_REFRESH_CREATED",
            AuditAction::TokenRefreshed => "TOKEN_REFRESHED",
            AuditAction::PasswordChanged => "PASSWORD_CHANGED",
            AuditAction::PasswordReset => "PASSWORD_RESET",
            AuditAction::PasswordResetRequested => "PASSWORD_RESET_REQUESTED",
        }
    }
}

/// One audit entry. `actor_id` is nullable: a failed login may not have
/// resolved an identity yet.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor_id: Option<Uuid>,
    pub action: AuditAction,
    pub target_resource: Option<String>,
    pub target_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl AuditEntry {
    pub fn new(action: AuditAction) -> Self {
        Self {
            actor_id: None,
            action,
            target_resource: None,
            target_id: None,
            metadata: None,
            ip_address: None,
            user_agent: None,
            success: true,
            error_message: None,
        }
    }

    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn target(mut self, resource: &str, id: impl ToString) -> Self {
        self.target_resource = Some(resource.to_string());
        self.target_id = Some(id.to_string());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn request_context(mut self, ip: Option<&str>, user_agent: Option<&str>) -> Self {
        self.ip_address = ip.map(str::to_string);
        self.user_agent = user_agent.map(str::to_string);
        self
    }

    pub fn failure(mut self, error_message: &str) -> Self {
        self.success = false;
        self.error_message = Some(error_message.to_string());
        self
    }
}

/// Append an audit entry.
///
/// A failed insert is logged and swallowed: audit writes ride along with
/// user-facing operations and must not turn a successful login into a 500.
pub async fn record(pool: &PgPool, entry: AuditEntry) {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_logs
            (id, actor_id, action, target_resource, target_id, metadata,
             ip_address, user_agent, success, error_message, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.actor_id)
    .bind(entry.action.as_str())
    .bind(&entry.target_resource)
    .bind(&entry.target_id)
    .bind(&entry.metadata)
    .bind(&entry.ip_address)
    .bind(&entry.user_agent)
    .bind(entry.success)
    .bind(&entry.error_message)
    .bind(chrono::Utc::now())
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::error!(
            action = entry.action.as_str(),
            error = %e,
            "Failed to write audit log entry"
        );
    }
}
