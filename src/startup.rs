use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use sqlx::PgPool;
use std::net::TcpListener;

use crate::auth::SessionManager;
use crate::configuration::{JwtSettings, LockoutSettings};
use crate::middleware::JwtMiddleware;
use crate::routes::{
    confirm_password_reset, get_current_user, health_check, login, logout, logout_all, refresh,
    register, request_password_reset,
};

pub fn run(
    listener: TcpListener,
    connection: PgPool,
    jwt_config: JwtSettings,
    lockout_config: LockoutSettings,
) -> Result<Server, std::io::Error> {
    let sessions = web::Data::new(SessionManager::new(connection.clone(), jwt_config.clone()));
    let connection = web::Data::new(connection);
    let jwt_config_data = web::Data::new(jwt_config.clone());
    let lockout_config_data = web::Data::new(lockout_config);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())

            // Shared state
            .app_data(connection.clone())
            .app_data(jwt_config_data.clone())
            .app_data(lockout_config_data.clone())
            .app_data(sessions.clone())

            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/auth/register", web::post().to(register))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/password-reset/request", web::post().to(request_password_reset))
            .route("/auth/password-reset/confirm", web::post().to(confirm_password_reset))

            // Protected routes (require a valid access token)
            .service(
                web::scope("/auth")
                    .wrap(JwtMiddleware::new(jwt_config.clone()))
                    .route("/me", web::get().to(get_current_user))
                    .route("/logout", web::post().to(logout))
                    .route("/logout-all", web::post().to(logout_all)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
