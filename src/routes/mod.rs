mod auth;
mod health_check;

pub use auth::{
    confirm_password_reset, get_current_user, login, logout, logout_all, refresh, register,
    request_password_reset, REFRESH_TOKEN_COOKIE,
};
pub use health_check::health_check;
