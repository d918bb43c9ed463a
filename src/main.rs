use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::time::Duration;

use huddle_auth::auth::SessionManager;
use huddle_auth::configuration::get_configuration;
use huddle_auth::startup::run;
use huddle_auth::telemetry::init_telemetry;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let connection_string = configuration.database.connection_string();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&connection_string)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    tracing::info!("Database connection pool created");

    // Hourly sweep of token rows that are both inactive and expired.
    // Failures are logged and the next tick tries again.
    let cleanup_sessions = SessionManager::new(pool.clone(), configuration.jwt.clone());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = cleanup_sessions.cleanup_expired_tokens().await {
                tracing::error!(error = %e, "Token cleanup sweep failed");
            }
        }
    });

    let address = format!("127.0.0.1:{}", configuration.application.port);
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(
        listener,
        pool,
        configuration.jwt.clone(),
        configuration.lockout.clone(),
    )?;

    server.await
}
